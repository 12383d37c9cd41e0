#![forbid(unsafe_code)]

//! Axum backend for the video catalogue.
//!
//! Video and thumbnail files never stay on this host: uploads are spooled to
//! a temporary directory, pushed to the media host, and only the resulting
//! URLs are stored in SQLite.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use videotube::{
    api::{AppState, router},
    config::{ConfigOverrides, load_config},
    media::HttpMediaUploader,
    store::VideoStore,
    telemetry::init_tracing,
};

#[derive(Debug, Parser)]
#[command(name = "videotube", about = "Serve the video catalogue API")]
struct BackendArgs {
    /// SQLite database file (overrides DATABASE_PATH).
    #[arg(long)]
    database_path: Option<PathBuf>,
    /// Directory for in-flight multipart uploads (overrides UPLOAD_TEMP_DIR).
    #[arg(long)]
    upload_temp_dir: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Upload endpoint of the media host (overrides MEDIA_UPLOAD_URL).
    #[arg(long)]
    media_upload_url: Option<String>,
    /// Dotenv file read before the process environment.
    #[arg(long = "env-file")]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_overrides(self) -> ConfigOverrides {
        ConfigOverrides {
            database_path: self.database_path,
            upload_temp_dir: self.upload_temp_dir,
            host: self.host,
            port: self.port,
            media_upload_url: self.media_upload_url,
            env_path: self.env_file,
        }
    }
}

fn parse_host(value: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/VIDEOTUBE_HOST")
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(BackendArgs::parse().into_overrides())?;
    init_tracing(config.log_format);

    std::fs::create_dir_all(&config.upload_temp_dir).with_context(|| {
        format!(
            "creating upload directory {}",
            config.upload_temp_dir.display()
        )
    })?;
    let store = VideoStore::open(&config.database_path)
        .await
        .with_context(|| format!("opening database {}", config.database_path.display()))?;

    let state = AppState {
        store: Arc::new(store),
        media: Arc::new(HttpMediaUploader::new(config.media.clone())),
        spool_dir: Arc::new(config.upload_temp_dir.clone()),
    };
    let app = router(state, config.max_upload_bytes);

    let addr = SocketAddr::new(parse_host(&config.host)?, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(%addr, database = %config.database_path.display(), "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    tracing::info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to install Ctrl+C handler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_overrides() {
        let args = BackendArgs::try_parse_from([
            "videotube",
            "--database-path",
            "/srv/videos.db",
            "--port",
            "9000",
            "--host=0.0.0.0",
            "--env-file",
            "/etc/videotube.env",
        ])
        .unwrap();
        let overrides = args.into_overrides();
        assert_eq!(overrides.database_path, Some(PathBuf::from("/srv/videos.db")));
        assert_eq!(overrides.port, Some(9000));
        assert_eq!(overrides.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(overrides.env_path, Some(PathBuf::from("/etc/videotube.env")));
        assert!(overrides.media_upload_url.is_none());
        assert!(overrides.upload_temp_dir.is_none());
    }

    #[test]
    fn no_flags_means_no_overrides() {
        let overrides = BackendArgs::try_parse_from(["videotube"])
            .unwrap()
            .into_overrides();
        assert!(overrides.database_path.is_none());
        assert!(overrides.port.is_none());
    }

    #[test]
    fn rejects_bad_port_and_unknown_flags() {
        assert!(BackendArgs::try_parse_from(["videotube", "--port", "http"]).is_err());
        assert!(BackendArgs::try_parse_from(["videotube", "--media-root", "/x"]).is_err());
    }

    #[test]
    fn host_must_be_an_ip_address() {
        assert_eq!(
            parse_host(" ::1 ").unwrap(),
            "::1".parse::<IpAddr>().unwrap()
        );
        assert!(parse_host("localhost").is_err());
    }
}
