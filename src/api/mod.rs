//! HTTP surface: shared state, the error type every handler returns, and the
//! routing table.

use std::{path::PathBuf, sync::Arc};

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::{
    media::{MediaUploader, UploadError},
    store::{StoreError, VideoStore},
};

pub mod form;
pub mod videos;

pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong!";
pub const VIDEO_NOT_FOUND_MESSAGE: &str = "Video does not exist";

/// Everything a handler needs. Cloned per request, so only `Arc`s inside.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<VideoStore>,
    pub media: Arc<dyn MediaUploader>,
    /// Directory that receives multipart file parts while a request runs.
    pub spool_dir: Arc<PathBuf>,
}

/// Body shape shared by every error and by plain acknowledgements.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn video_not_found() -> Self {
        Self::not_found(VIDEO_NOT_FOUND_MESSAGE)
    }

    /// Logs `cause` with its full source chain; the client only ever sees
    /// the generic message.
    pub fn internal(cause: impl Into<anyhow::Error>) -> Self {
        let chain = format!("{:#}", cause.into());
        tracing::error!(error = %chain, "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: GENERIC_ERROR_MESSAGE.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::internal(err)
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        Self::internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = MessageBody {
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route(
            "/api/v1/videos",
            get(videos::list_videos).post(videos::publish_video),
        )
        .route(
            "/api/v1/videos/{video_id}",
            get(videos::get_video)
                .patch(videos::update_video)
                .delete(videos::delete_video),
        )
        .route(
            "/api/v1/videos/toggle/publish/{video_id}",
            patch(videos::toggle_publish_status),
        )
        .fallback(endpoint_not_found)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn endpoint_not_found() -> ApiError {
    ApiError::not_found("endpoint not found")
}
