use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use password_hash::rand_core::OsRng;
use sqlx::SqlitePool;

/// User row from the database.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_ts: i64,
}

/// Create a new user. Returns the user ID.
pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    password: &str,
    role: &str,
) -> Result<String, crate::DbError> {
    let id = uuid::Uuid::new_v4().to_string();
    let hash = hash_password(password)?;
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        "INSERT INTO user (id, username, password_hash, role, created_ts) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(username)
    .bind(&hash)
    .bind(role)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Find user by username.
pub async fn find_by_username(
    pool: &SqlitePool,
    username: &str,
) -> Result<Option<UserRow>, sqlx::Error> {
    let row: Option<(String, String, String, String, i64)> = sqlx::query_as(
        "SELECT id, username, password_hash, role, created_ts FROM user WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id, username, password_hash, role, created_ts)| UserRow {
        id,
        username,
        password_hash,
        role,
        created_ts,
    }))
}

/// Find user by ID.
pub async fn find_by_id(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Option<UserRow>, sqlx::Error> {
    let row: Option<(String, String, String, String, i64)> = sqlx::query_as(
        "SELECT id, username, password_hash, role, created_ts FROM user WHERE id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id, username, password_hash, role, created_ts)| UserRow {
        id,
        username,
        password_hash,
        role,
        created_ts,
    }))
}

/// Check if any users exist (for admin bootstrap).
pub async fn count_users(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

/// Whether a non-admin user has been granted access to a library.
pub async fn is_library_allowed(
    pool: &SqlitePool,
    user_id: &str,
    library_id: &str,
) -> Result<bool, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT user_id FROM user_library_access WHERE user_id = ? AND library_id = ?",
    )
    .bind(user_id)
    .bind(library_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// Replace a user's library access set.
pub async fn set_library_access(
    pool: &SqlitePool,
    user_id: &str,
    library_ids: &[String],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM user_library_access WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;

    for library_id in library_ids {
        sqlx::query("INSERT INTO user_library_access (user_id, library_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(library_id)
            .execute(pool)
            .await?;
    }

    Ok(())
}

fn hash_password(password: &str) -> Result<String, crate::DbError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| crate::DbError::Hash(e.to_string()))
}

/// Verify a password against a stored argon2 hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, crate::DbError> {
    let parsed = PasswordHash::new(hash).map_err(|e| crate::DbError::Hash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
