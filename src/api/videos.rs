//! Video handlers: list, publish, fetch, update, delete, toggle publish.
//!
//! Every handler answers 404 only for an id that does not exist; any other
//! failure (bad input, store or media-host error) becomes the generic 500.

use anyhow::{Context, anyhow, bail};
use axum::{
    Json,
    extract::{
        Multipart, Path, Query, State, multipart::MultipartRejection,
        rejection::QueryRejection,
    },
    http::StatusCode,
};
use serde::{Deserialize, Serialize};

use super::{
    ApiError, ApiResult, AppState, MessageBody,
    form::{THUMBNAIL_FIELD, VideoUpdateInput, read_multipart},
};
use crate::store::{
    NewVideo, Page, SortDirection, SortField, Video, VideoFilter, VideoPatch, VideoSort,
};

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;
pub const VIDEO_FILE_FIELD: &str = "videoFile";
pub const DELETED_MESSAGE: &str = "Deleted Video Successfully!";

/// The media host reports durations in hundredths of the stored unit.
pub const DURATION_SCALE: f64 = 100.0;

/// Raw listing parameters. Everything arrives as text and is parsed in the
/// handler so malformed values share the generic failure path.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListVideosQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub query: Option<String>,
    pub sort_by: Option<String>,
    pub sort_type: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub total_videos: u64,
    pub current_page: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoList {
    pub videos: Vec<Video>,
    pub page_info: PageInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VideoEnvelope {
    pub video: Video,
}

/// Listing parameters after validation.
#[derive(Debug, PartialEq)]
struct ListRequest {
    filter: VideoFilter,
    sort: VideoSort,
    page: u64,
    limit: u64,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_positive(name: &str, raw: Option<&str>, default: u64) -> anyhow::Result<u64> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(default);
    };
    let value = raw
        .parse::<u64>()
        .with_context(|| format!("`{name}` must be a positive integer, got `{raw}`"))?;
    if value == 0 {
        bail!("`{name}` must be at least 1");
    }
    Ok(value)
}

impl ListRequest {
    fn parse(query: ListVideosQuery) -> anyhow::Result<Self> {
        let page = parse_positive("page", query.page.as_deref(), DEFAULT_PAGE)?;
        let limit = parse_positive("limit", query.limit.as_deref(), DEFAULT_LIMIT)?;

        let direction = match non_blank(query.sort_type) {
            Some(raw) => SortDirection::parse(&raw)
                .ok_or_else(|| anyhow!("unsupported sortType `{raw}`"))?,
            None => SortDirection::default(),
        };
        let sort = VideoSort {
            field: non_blank(query.sort_by).and_then(|key| SortField::from_key(&key)),
            direction,
        };

        Ok(Self {
            filter: VideoFilter {
                user_id: non_blank(query.user_id),
                search: non_blank(query.query),
            },
            sort,
            page,
            limit,
        })
    }

    fn window(&self) -> Page {
        Page {
            skip: (self.page - 1).saturating_mul(self.limit),
            limit: self.limit,
        }
    }
}

#[tracing::instrument(skip(state, query))]
pub async fn list_videos(
    State(state): State<AppState>,
    query: Result<Query<ListVideosQuery>, QueryRejection>,
) -> ApiResult<Json<VideoList>> {
    let Query(query) = query.map_err(ApiError::internal)?;
    let request = ListRequest::parse(query).map_err(ApiError::internal)?;

    let videos = state
        .store
        .find(&request.filter, request.sort, request.window())
        .await?;
    let total_videos = state.store.count(&request.filter).await?;

    Ok(Json(VideoList {
        videos,
        page_info: PageInfo {
            total_videos,
            current_page: request.page,
            total_pages: total_videos.div_ceil(request.limit),
        },
    }))
}

#[tracing::instrument(skip(state, multipart))]
pub async fn publish_video(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<(StatusCode, Json<VideoEnvelope>)> {
    let multipart = multipart.map_err(ApiError::internal)?;
    let mut form = read_multipart(multipart, state.spool_dir.as_path())
        .await
        .map_err(ApiError::internal)?;

    let video_file = form
        .take_file(VIDEO_FILE_FIELD)
        .ok_or_else(|| ApiError::internal(anyhow!("request carried no `{VIDEO_FILE_FIELD}` file")))?;
    let thumbnail = form
        .take_file(THUMBNAIL_FIELD)
        .ok_or_else(|| ApiError::internal(anyhow!("request carried no `{THUMBNAIL_FIELD}` file")))?;

    let video_asset = state.media.upload(video_file.path()).await?;
    let thumbnail_asset = state.media.upload(thumbnail.path()).await?;
    let reported = video_asset.duration.ok_or_else(|| {
        ApiError::internal(anyhow!(
            "media host reported no duration for {}",
            video_asset.url
        ))
    })?;

    let video = state
        .store
        .create(NewVideo {
            title: form.take_text("title").unwrap_or_default(),
            description: form.take_text("description").unwrap_or_default(),
            video_file: video_asset.url,
            thumbnail: thumbnail_asset.url,
            duration: reported / DURATION_SCALE,
            user_id: non_blank(form.take_text("userId")),
        })
        .await?;

    tracing::info!(video_id = %video.id, "published video");
    Ok((StatusCode::CREATED, Json(VideoEnvelope { video })))
}

#[tracing::instrument(skip(state))]
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<VideoEnvelope>> {
    let video = state
        .store
        .find_by_id(&video_id)
        .await?
        .ok_or_else(ApiError::video_not_found)?;
    Ok(Json(VideoEnvelope { video }))
}

#[tracing::instrument(skip(state, input))]
pub async fn update_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    input: VideoUpdateInput,
) -> ApiResult<Json<VideoEnvelope>> {
    state
        .store
        .find_by_id(&video_id)
        .await?
        .ok_or_else(ApiError::video_not_found)?;

    let mut patch = VideoPatch {
        title: input.title.filter(|title| !title.is_empty()),
        description: input.description.filter(|description| !description.is_empty()),
        thumbnail: None,
    };
    if let Some(file) = &input.thumbnail {
        patch.thumbnail = Some(state.media.upload(file.path()).await?.url);
    }

    let video = state
        .store
        .update(&video_id, &patch)
        .await?
        .ok_or_else(ApiError::video_not_found)?;
    Ok(Json(VideoEnvelope { video }))
}

#[tracing::instrument(skip(state))]
pub async fn delete_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<MessageBody>> {
    let deleted = state
        .store
        .delete(&video_id)
        .await?
        .ok_or_else(ApiError::video_not_found)?;

    tracing::info!(video_id = %deleted.id, "deleted video");
    Ok(Json(MessageBody {
        message: DELETED_MESSAGE.to_string(),
    }))
}

#[tracing::instrument(skip(state))]
pub async fn toggle_publish_status(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<VideoEnvelope>> {
    let video = state
        .store
        .toggle_published(&video_id)
        .await?
        .ok_or_else(ApiError::video_not_found)?;
    Ok(Json(VideoEnvelope { video }))
}
