use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct LibraryRow {
    pub id: String,
    pub name: String,
    pub created_ts: i64,
}

#[derive(Debug, Clone)]
pub struct LibraryPathRow {
    pub id: String,
    pub library_id: String,
    pub path: String,
}

/// Create a library with its root paths. Returns the new row.
pub async fn create_library(
    pool: &SqlitePool,
    name: &str,
    paths: &[String],
) -> Result<LibraryRow, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    sqlx::query("INSERT INTO library (id, name, created_ts) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(now)
        .execute(pool)
        .await?;

    for path in paths {
        sqlx::query("INSERT INTO library_path (id, library_id, path) VALUES (?, ?, ?)")
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&id)
            .bind(path)
            .execute(pool)
            .await?;
    }

    Ok(LibraryRow {
        id,
        name: name.to_string(),
        created_ts: now,
    })
}

pub async fn get_library(
    pool: &SqlitePool,
    library_id: &str,
) -> Result<Option<LibraryRow>, sqlx::Error> {
    let row: Option<(String, String, i64)> =
        sqlx::query_as("SELECT id, name, created_ts FROM library WHERE id = ?")
            .bind(library_id)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(|(id, name, created_ts)| LibraryRow {
        id,
        name,
        created_ts,
    }))
}

pub async fn list_libraries(pool: &SqlitePool) -> Result<Vec<LibraryRow>, sqlx::Error> {
    let rows: Vec<(String, String, i64)> =
        sqlx::query_as("SELECT id, name, created_ts FROM library ORDER BY created_ts")
            .fetch_all(pool)
            .await?;

    Ok(rows
        .into_iter()
        .map(|(id, name, created_ts)| LibraryRow {
            id,
            name,
            created_ts,
        })
        .collect())
}

pub async fn get_library_paths(
    pool: &SqlitePool,
    library_id: &str,
) -> Result<Vec<LibraryPathRow>, sqlx::Error> {
    let rows: Vec<(String, String, String)> =
        sqlx::query_as("SELECT id, library_id, path FROM library_path WHERE library_id = ?")
            .bind(library_id)
            .fetch_all(pool)
            .await?;

    Ok(rows
        .into_iter()
        .map(|(id, library_id, path)| LibraryPathRow {
            id,
            library_id,
            path,
        })
        .collect())
}

/// All library root paths across every library (direct-play path validation).
pub async fn get_all_library_paths(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT path FROM library_path")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(p,)| p).collect())
}
