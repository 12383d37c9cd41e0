//! Client for the external media host that stores video and image assets.
//!
//! The host accepts a JSON body carrying the file as a base64 data URI and
//! answers with the hosted URL (and a duration for video files). This is
//! the shape of a Cloudinary-style unsigned upload endpoint (`upload_preset`
//! only). When both an API key and secret are configured the request also
//! carries HTTP Basic credentials, which an authenticating upload gateway in
//! front of the host checks; a bare Cloudinary endpoint ignores them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use mime_guess::MimeGuess;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::MediaConfig;

/// Longest slice of an error body kept for logging.
const MAX_ERROR_BODY: usize = 512;

/// A file that now lives on the media host.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedAsset {
    pub url: String,
    /// Reported by the host for audio/video uploads only.
    pub duration: Option<f64>,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("reading upload source {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("media host rejected upload with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("media host unreachable")]
    Transport(#[source] Box<ureq::Transport>),
    #[error("media host response could not be decoded")]
    Decode(#[source] std::io::Error),
    #[error("media host response carried no url")]
    MissingUrl,
    #[error("upload task did not complete")]
    Join(#[from] tokio::task::JoinError),
}

/// Pushes a local file to the media host.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<UploadedAsset, UploadError>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
}

impl UploadResponse {
    fn into_asset(self) -> Result<UploadedAsset, UploadError> {
        let url = self
            .secure_url
            .filter(|url| !url.trim().is_empty())
            .or(self.url.filter(|url| !url.trim().is_empty()))
            .ok_or(UploadError::MissingUrl)?;
        Ok(UploadedAsset {
            url,
            duration: self.duration,
        })
    }
}

/// [`MediaUploader`] backed by a blocking `ureq` agent. Requests run on the
/// blocking thread pool so the async handlers are never stalled.
#[derive(Clone)]
pub struct HttpMediaUploader {
    agent: ureq::Agent,
    config: MediaConfig,
}

impl HttpMediaUploader {
    pub fn new(config: MediaConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { agent, config }
    }

    fn authorization(&self) -> Option<String> {
        let key = self.config.api_key.as_deref()?;
        let secret = self.config.api_secret.as_deref()?;
        Some(format!("Basic {}", STANDARD.encode(format!("{key}:{secret}"))))
    }
}

fn request_body(path: &Path, bytes: &[u8], upload_preset: Option<&str>) -> Value {
    let mime = MimeGuess::from_path(path).first_or_octet_stream();
    let mut body = json!({
        "file": format!("data:{};base64,{}", mime.essence_str(), STANDARD.encode(bytes)),
    });
    if let Some(preset) = upload_preset {
        body["upload_preset"] = json!(preset);
    }
    body
}

fn send_upload(
    agent: ureq::Agent,
    url: String,
    authorization: Option<String>,
    body: Value,
) -> Result<UploadedAsset, UploadError> {
    let mut request = agent.post(&url);
    if let Some(value) = authorization {
        request = request.set("Authorization", &value);
    }

    let response = match request.send_json(body) {
        Ok(response) => response,
        Err(ureq::Error::Status(status, response)) => {
            let mut body = response.into_string().unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(UploadError::Rejected { status, body });
        }
        Err(ureq::Error::Transport(transport)) => {
            return Err(UploadError::Transport(Box::new(transport)));
        }
    };

    response
        .into_json::<UploadResponse>()
        .map_err(UploadError::Decode)?
        .into_asset()
}

#[async_trait]
impl MediaUploader for HttpMediaUploader {
    async fn upload(&self, path: &Path) -> Result<UploadedAsset, UploadError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| UploadError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let body = request_body(path, &bytes, self.config.upload_preset.as_deref());
        drop(bytes);

        let agent = self.agent.clone();
        let url = self.config.upload_url.clone();
        let authorization = self.authorization();
        let source: PathBuf = path.to_path_buf();

        let asset =
            tokio::task::spawn_blocking(move || send_upload(agent, url, authorization, body))
                .await??;
        tracing::info!(
            source = %source.display(),
            url = %asset.url,
            duration = ?asset.duration,
            "uploaded asset to media host"
        );
        Ok(asset)
    }
}
