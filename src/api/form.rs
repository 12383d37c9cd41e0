//! Request body parsing for the upload endpoints.
//!
//! File parts are streamed into temporary files under the spool directory
//! so the media client can read them from a local path. Each temporary
//! file is deleted when its [`SpooledFile`] is dropped, i.e. once the
//! request finishes, whether or not it succeeded.

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use axum::{
    Json,
    extract::{FromRequest, Multipart, Request, multipart::Field},
    http::header,
};
use serde::Deserialize;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use super::{ApiError, AppState};

/// One file part of a multipart request, held on local disk.
#[derive(Debug)]
pub struct SpooledFile {
    pub field: String,
    pub file_name: String,
    pub size: u64,
    file: NamedTempFile,
}

impl SpooledFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Text fields and spooled files of a multipart body. When a name repeats,
/// the first text value is kept; all files are kept in arrival order.
#[derive(Debug, Default)]
pub struct UploadForm {
    fields: HashMap<String, String>,
    files: Vec<SpooledFile>,
}

impl UploadForm {
    pub fn take_text(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    /// Removes and returns the first file sent under `name`.
    pub fn take_file(&mut self, name: &str) -> Option<SpooledFile> {
        let index = self.files.iter().position(|file| file.field == name)?;
        Some(self.files.remove(index))
    }
}

pub async fn read_multipart(mut multipart: Multipart, spool_dir: &Path) -> Result<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .context("reading multipart field")?
    {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let spooled = spool_field(&mut field, name, file_name, spool_dir).await?;
                form.files.push(spooled);
            }
            None => {
                let value = field
                    .text()
                    .await
                    .with_context(|| format!("reading multipart text field `{name}`"))?;
                form.fields.entry(name).or_insert(value);
            }
        }
    }

    Ok(form)
}

async fn spool_field(
    field: &mut Field<'_>,
    name: String,
    file_name: String,
    spool_dir: &Path,
) -> Result<SpooledFile> {
    // Keep the extension so the media client can guess a content type.
    let suffix = Path::new(&file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|ch| ch.is_ascii_alphanumeric()))
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();

    let file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&suffix)
        .tempfile_in(spool_dir)
        .with_context(|| format!("creating spool file in {}", spool_dir.display()))?;
    let mut out = tokio::fs::File::from_std(file.as_file().try_clone()?);

    let mut size = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .with_context(|| format!("reading multipart file field `{name}`"))?
    {
        size += chunk.len() as u64;
        out.write_all(&chunk).await?;
    }
    out.flush().await?;

    tracing::debug!(field = %name, file_name = %file_name, size, "spooled upload");
    Ok(SpooledFile {
        field: name,
        file_name,
        size,
        file,
    })
}

/// Fields accepted by the update endpoint when the body is JSON.
#[derive(Debug, Default, Deserialize)]
struct UpdateFields {
    title: Option<String>,
    description: Option<String>,
}

/// Input of the update endpoint. Accepts a multipart form (with an
/// optional `thumbnail` file) or a JSON object; any other body is treated
/// as an empty update.
#[derive(Debug, Default)]
pub struct VideoUpdateInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<SpooledFile>,
}

pub const THUMBNAIL_FIELD: &str = "thumbnail";

impl FromRequest<AppState> for VideoUpdateInput {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(ApiError::internal)?;
            let mut form = read_multipart(multipart, state.spool_dir.as_path())
                .await
                .map_err(ApiError::internal)?;
            Ok(Self {
                title: form.take_text("title"),
                description: form.take_text("description"),
                thumbnail: form.take_file(THUMBNAIL_FIELD),
            })
        } else if content_type.starts_with("application/json") {
            let Json(fields) = Json::<UpdateFields>::from_request(req, state)
                .await
                .map_err(ApiError::internal)?;
            Ok(Self {
                title: fields.title,
                description: fields.description,
                thumbnail: None,
            })
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest};

    const BOUNDARY: &str = "form-test-boundary";

    fn multipart_request(parts: &[(&str, Option<&str>, &str)]) -> Request {
        let mut body = Vec::new();
        for (name, file_name, contents) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(contents.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        HttpRequest::builder()
            .method("POST")
            .uri("/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn parse(req: Request, spool_dir: &Path) -> UploadForm {
        let multipart = Multipart::from_request(req, &()).await.unwrap();
        read_multipart(multipart, spool_dir).await.unwrap()
    }

    #[tokio::test]
    async fn spools_files_and_collects_text() {
        let spool = tempfile::tempdir().unwrap();
        let req = multipart_request(&[
            ("title", None, "Hello"),
            ("title", None, "ignored"),
            ("videoFile", Some("clip.mp4"), "first"),
            ("videoFile", Some("second.mp4"), "second"),
        ]);
        let mut form = parse(req, spool.path()).await;

        assert_eq!(form.take_text("title").as_deref(), Some("Hello"));
        assert!(form.take_text("title").is_none());

        let file = form.take_file("videoFile").unwrap();
        assert_eq!(file.file_name, "clip.mp4");
        assert_eq!(file.size, 5);
        assert!(file.path().starts_with(spool.path()));
        assert_eq!(file.path().extension().unwrap(), "mp4");
        assert_eq!(std::fs::read(file.path()).unwrap(), b"first");
        assert!(form.take_file("thumbnail").is_none());
    }

    #[tokio::test]
    async fn spooled_files_are_removed_on_drop() {
        let spool = tempfile::tempdir().unwrap();
        let req = multipart_request(&[("thumbnail", Some("t.png"), "png")]);
        let form = parse(req, spool.path()).await;
        assert_eq!(std::fs::read_dir(spool.path()).unwrap().count(), 1);

        drop(form);
        assert_eq!(std::fs::read_dir(spool.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn odd_extensions_are_dropped() {
        let spool = tempfile::tempdir().unwrap();
        let req = multipart_request(&[("thumbnail", Some("evil.p/ng"), "x")]);
        let mut form = parse(req, spool.path()).await;
        let file = form.take_file("thumbnail").unwrap();
        assert!(file.path().extension().is_none());
    }
}
