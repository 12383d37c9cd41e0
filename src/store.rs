//! Document store for the `videos` collection.
//!
//! Each video is one row in a local libSQL database. The store owns id
//! assignment and the `createdAt`/`updatedAt` timestamps, and exposes the
//! usual find/count/create/update/delete operations plus filter, sort and
//! skip/limit pagination for listings.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use libsql::{
    Builder, Connection, Row, Value, params,
    params::{IntoParams, Params},
};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of a video id: 12 random bytes rendered as lowercase hex.
pub const VIDEO_ID_LEN: usize = 24;

const VIDEO_COLUMNS: &str = "id, title, description, video_file, thumbnail, duration, \
                             views, is_published, user_id, created_at, updated_at";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid video id `{0}`")]
    InvalidId(String),
    #[error("database error: {0}")]
    Database(#[from] libsql::Error),
    #[error("stored timestamp `{value}` is not RFC 3339")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("creating database directory {path}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A video document as stored and served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    pub title: String,
    pub description: String,
    pub video_file: String,
    pub thumbnail: String,
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when a video is first published.
#[derive(Debug, Clone, Default)]
pub struct NewVideo {
    pub title: String,
    pub description: String,
    pub video_file: String,
    pub thumbnail: String,
    pub duration: f64,
    pub user_id: Option<String>,
}

/// Partial update; `None` fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoFilter {
    pub user_id: Option<String>,
    /// Substring matched against title and description. Case folding is
    /// ASCII-only, as with SQLite's built-in `LIKE`.
    pub search: Option<String>,
}

impl VideoFilter {
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(user_id) = &self.user_id {
            clauses.push("user_id = ?");
            values.push(Value::Text(user_id.clone()));
        }
        if let Some(search) = &self.search {
            clauses.push("(title LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')");
            let pattern = format!("%{}%", escape_like(search));
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Sortable video fields, keyed by their JSON names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    Title,
    Description,
    Duration,
    Views,
    IsPublished,
    UserId,
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    /// Maps a JSON field name onto a sortable column. Unknown names yield
    /// `None`, which lists in insertion order.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim() {
            "id" | "_id" => Some(Self::Id),
            "title" => Some(Self::Title),
            "description" => Some(Self::Description),
            "duration" => Some(Self::Duration),
            "views" => Some(Self::Views),
            "isPublished" => Some(Self::IsPublished),
            "userId" => Some(Self::UserId),
            "createdAt" => Some(Self::CreatedAt),
            "updatedAt" => Some(Self::UpdatedAt),
            _ => None,
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Title => "title",
            Self::Description => "description",
            Self::Duration => "duration",
            Self::Views => "views",
            Self::IsPublished => "is_published",
            Self::UserId => "user_id",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" | "1" => Some(Self::Ascending),
            "desc" | "descending" | "-1" => Some(Self::Descending),
            _ => None,
        }
    }

    fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoSort {
    pub field: Option<SortField>,
    pub direction: SortDirection,
}

impl VideoSort {
    fn order_by(self) -> String {
        match self.field {
            Some(field) => format!(
                "{} {}, rowid ASC",
                field.column(),
                self.direction.as_sql()
            ),
            None => "rowid ASC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: u64,
    pub limit: u64,
}

async fn configure_connection(conn: &Connection) -> StoreResult<()> {
    // `journal_mode` answers with a row, so it cannot go through `execute`.
    let mut rows = conn.query("PRAGMA journal_mode=WAL", ()).await?;
    while rows.next().await?.is_some() {}
    conn.execute("PRAGMA synchronous=NORMAL", ()).await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS videos (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            video_file TEXT NOT NULL,
            thumbnail TEXT NOT NULL,
            duration REAL NOT NULL,
            views INTEGER NOT NULL DEFAULT 0,
            is_published INTEGER NOT NULL DEFAULT 1,
            user_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_videos_user_id ON videos(user_id);
        "#,
    )
    .await?;
    Ok(())
}

/// Handle to the videos database. One connection is shared by every request.
pub struct VideoStore {
    conn: Connection,
}

impl std::fmt::Debug for VideoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoStore").finish_non_exhaustive()
    }
}

impl VideoStore {
    /// Opens (and if necessary creates) the database and its schema.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    pub async fn find(
        &self,
        filter: &VideoFilter,
        sort: VideoSort,
        page: Page,
    ) -> StoreResult<Vec<Video>> {
        let (where_sql, mut values) = filter.where_clause();
        values.push(Value::Integer(clamp_i64(page.limit)));
        values.push(Value::Integer(clamp_i64(page.skip)));

        let sql = format!(
            "SELECT {VIDEO_COLUMNS} FROM videos{where_sql} ORDER BY {} LIMIT ? OFFSET ?",
            sort.order_by()
        );
        let mut rows = self.conn.query(&sql, Params::Positional(values)).await?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_video(&row)?);
        }
        Ok(videos)
    }

    pub async fn count(&self, filter: &VideoFilter) -> StoreResult<u64> {
        let (where_sql, values) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM videos{where_sql}");
        let mut rows = self.conn.query(&sql, Params::Positional(values)).await?;
        let total = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(total.max(0) as u64)
    }

    pub async fn find_by_id(&self, id: &str) -> StoreResult<Option<Video>> {
        let id = normalize_id(id)?;
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?1"),
                params![id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_video(&row)?)),
            None => Ok(None),
        }
    }

    /// Inserts a new document, assigning its id and timestamps.
    pub async fn create(&self, new: NewVideo) -> StoreResult<Video> {
        let now = now();
        let video = Video {
            id: new_video_id(),
            title: new.title,
            description: new.description,
            video_file: new.video_file,
            thumbnail: new.thumbnail,
            duration: new.duration,
            views: 0,
            is_published: true,
            user_id: new.user_id,
            created_at: now,
            updated_at: now,
        };
        let stamp = format_timestamp(&now);

        self.conn
            .execute(
                &format!(
                    "INSERT INTO videos ({VIDEO_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    video.id.as_str(),
                    video.title.as_str(),
                    video.description.as_str(),
                    video.video_file.as_str(),
                    video.thumbnail.as_str(),
                    video.duration,
                    video.views,
                    video.is_published as i64,
                    video.user_id.as_deref(),
                    stamp.as_str(),
                    stamp.as_str(),
                ],
            )
            .await?;

        Ok(video)
    }

    /// Applies `patch` and returns the updated document, or `None` when the
    /// id does not exist.
    pub async fn update(&self, id: &str, patch: &VideoPatch) -> StoreResult<Option<Video>> {
        let id = normalize_id(id)?;
        let stamp = format_timestamp(&now());
        self.query_one(
            &format!(
                "UPDATE videos SET \
                     title = COALESCE(?1, title), \
                     description = COALESCE(?2, description), \
                     thumbnail = COALESCE(?3, thumbnail), \
                     updated_at = ?4 \
                 WHERE id = ?5 RETURNING {VIDEO_COLUMNS}"
            ),
            params![
                patch.title.as_deref(),
                patch.description.as_deref(),
                patch.thumbnail.as_deref(),
                stamp.as_str(),
                id.as_str(),
            ],
        )
        .await
    }

    /// Flips `isPublished` in a single statement so concurrent toggles
    /// cannot overwrite each other.
    pub async fn toggle_published(&self, id: &str) -> StoreResult<Option<Video>> {
        let id = normalize_id(id)?;
        let stamp = format_timestamp(&now());
        self.query_one(
            &format!(
                "UPDATE videos SET \
                     is_published = CASE is_published WHEN 0 THEN 1 ELSE 0 END, \
                     updated_at = ?1 \
                 WHERE id = ?2 RETURNING {VIDEO_COLUMNS}"
            ),
            params![stamp.as_str(), id.as_str()],
        )
        .await
    }

    /// Removes a document and returns what was deleted.
    pub async fn delete(&self, id: &str) -> StoreResult<Option<Video>> {
        let id = normalize_id(id)?;
        self.query_one(
            &format!("DELETE FROM videos WHERE id = ?1 RETURNING {VIDEO_COLUMNS}"),
            params![id.as_str()],
        )
        .await
    }

    // Row presence comes from the statement itself. The connection-wide
    // change counter is shared with concurrent requests and cannot be trusted.
    async fn query_one(&self, sql: &str, params: impl IntoParams) -> StoreResult<Option<Video>> {
        let mut rows = self.conn.query(sql, params).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_video(&row)?)),
            None => Ok(None),
        }
    }
}

fn normalize_id(raw: &str) -> StoreResult<String> {
    let trimmed = raw.trim();
    if trimmed.len() != VIDEO_ID_LEN || !trimmed.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(StoreError::InvalidId(raw.to_string()));
    }
    Ok(trimmed.to_ascii_lowercase())
}

fn new_video_id() -> String {
    let mut bytes = [0u8; VIDEO_ID_LEN / 2];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

// Millisecond precision so a stored timestamp reads back equal to the
// value handed out at creation.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: String) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| StoreError::Timestamp { value, source })
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Column order must match `VIDEO_COLUMNS`.
fn row_to_video(row: &Row) -> StoreResult<Video> {
    Ok(Video {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        video_file: row.get(3)?,
        thumbnail: row.get(4)?,
        duration: row.get(5)?,
        views: row.get(6)?,
        is_published: row.get::<i64>(7)? != 0,
        user_id: row.get(8)?,
        created_at: parse_timestamp(row.get(9)?)?,
        updated_at: parse_timestamp(row.get(10)?)?,
    })
}
