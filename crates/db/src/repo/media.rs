use sqlx::SqlitePool;

/// Media row as consumed by the streaming layer: `path` is the absolute
/// source file location, `duration_secs` is nullable until a probe fills it.
#[derive(Debug, Clone)]
pub struct MediaRow {
    pub id: String,
    pub library_id: String,
    pub path: String,
    pub media_type: String,
    pub title: String,
    pub duration_secs: Option<f64>,
    pub size_bytes: i64,
    pub mtime_ts: i64,
    pub created_ts: i64,
    pub updated_ts: i64,
}

type MediaTuple = (
    String,
    String,
    String,
    String,
    String,
    Option<f64>,
    i64,
    i64,
    i64,
    i64,
);

const MEDIA_COLUMNS: &str = "id, library_id, path, media_type, title, duration_secs, \
     size_bytes, mtime_ts, created_ts, updated_ts";

fn row_from_tuple(r: MediaTuple) -> MediaRow {
    MediaRow {
        id: r.0,
        library_id: r.1,
        path: r.2,
        media_type: r.3,
        title: r.4,
        duration_secs: r.5,
        size_bytes: r.6,
        mtime_ts: r.7,
        created_ts: r.8,
        updated_ts: r.9,
    }
}

pub async fn get_media(
    pool: &SqlitePool,
    media_id: &str,
) -> Result<Option<MediaRow>, sqlx::Error> {
    let row: Option<MediaTuple> =
        sqlx::query_as(&format!("SELECT {MEDIA_COLUMNS} FROM media WHERE id = ?"))
            .bind(media_id)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(row_from_tuple))
}

pub async fn list_library_media(
    pool: &SqlitePool,
    library_id: &str,
) -> Result<Vec<MediaRow>, sqlx::Error> {
    let rows: Vec<MediaTuple> = sqlx::query_as(&format!(
        "SELECT {MEDIA_COLUMNS} FROM media WHERE library_id = ? ORDER BY title"
    ))
    .bind(library_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_from_tuple).collect())
}

/// Insert a freshly scanned media row. Returns the new id.
#[allow(clippy::too_many_arguments)]
pub async fn insert_media(
    pool: &SqlitePool,
    library_id: &str,
    path: &str,
    media_type: &str,
    title: &str,
    duration_secs: Option<f64>,
    size_bytes: i64,
    mtime_ts: i64,
) -> Result<String, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        "INSERT INTO media (id, library_id, path, media_type, title, duration_secs, \
         size_bytes, mtime_ts, created_ts, updated_ts) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(library_id)
    .bind(path)
    .bind(media_type)
    .bind(title)
    .bind(duration_secs)
    .bind(size_bytes)
    .bind(mtime_ts)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(id)
}

pub async fn media_exists_by_path(pool: &SqlitePool, path: &str) -> Result<bool, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT id FROM media WHERE path = ?")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Every media id in the catalog; the live set fed to the orphan sweeps.
pub async fn list_media_ids(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM media")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}
