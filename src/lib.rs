#![forbid(unsafe_code)]

//! Video catalogue backend: a SQLite-backed store of video records, a client
//! for the external media host, and the HTTP API tying them together.

pub mod api;
pub mod config;
pub mod media;
pub mod store;
pub mod telemetry;
