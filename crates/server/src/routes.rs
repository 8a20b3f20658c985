use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use kinema_core::error::ApiError;
use serde::{Deserialize, Serialize};

use crate::auth::{AdminUser, AuthUser, issue_token, require_library_access};
use crate::error::AppError;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_router())
        .nest("/stream", stream_router())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn stream_router() -> Router<AppState> {
    Router::new()
        .route("/file/{media_id}", get(crate::streaming::stream_file_range))
        .route(
            "/hls/{media_id}/{quality}/index.m3u8",
            get(crate::streaming::hls_vod_playlist),
        )
        .route(
            "/hls/{media_id}/{quality}/live.m3u8",
            get(crate::streaming::hls_live_playlist),
        )
        .route(
            "/hls/{media_id}/{quality}/{segment}",
            get(crate::streaming::hls_segment),
        )
}

fn api_router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(auth_login))
        .route("/users/me", get(users_me))
        .route("/users/{id}/libraries", axum::routing::put(set_user_libraries))
        .route("/libraries", post(create_library).get(list_libraries))
        .route("/libraries/{id}/scan", post(scan_library))
        .route("/libraries/{id}/media", get(list_library_media))
        .route("/media/{id}", get(get_media))
        .route("/media/{id}/thumbnail", get(crate::thumbs::get_media_thumbnail))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    sqlx::query("SELECT 1")
        .execute(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("database check failed: {e}")))?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    user_id: String,
    username: String,
    role: String,
}

async fn auth_login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let user = kinema_db::repo::users::find_by_username(&state.db, &body.username)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .ok_or_else(|| ApiError::Unauthorized("invalid credentials".into()))?;

    let valid = kinema_db::repo::users::verify_password(&body.password, &user.password_hash)
        .map_err(|e| ApiError::Internal(format!("hash error: {e}")))?;

    if !valid {
        return Err(ApiError::Unauthorized("invalid credentials".into()).into());
    }

    let token = issue_token(&user.id, &user.username, &user.role, &state.jwt_secret)?;

    Ok(Json(LoginResponse {
        token,
        user_id: user.id,
        username: user.username,
        role: user.role,
    }))
}

#[derive(Serialize)]
struct UserMeResponse {
    id: String,
    username: String,
    role: String,
}

async fn users_me(auth: AuthUser) -> Json<UserMeResponse> {
    Json(UserMeResponse {
        id: auth.user_id,
        username: auth.username,
        role: auth.role,
    })
}

#[derive(Deserialize)]
struct SetUserLibrariesRequest {
    library_ids: Vec<String>,
}

async fn set_user_libraries(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<SetUserLibrariesRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = kinema_db::repo::users::find_by_id(&state.db, &user_id)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    if user.role == "admin" {
        return Err(ApiError::BadRequest("admin users are not limited to libraries".into()).into());
    }

    for library_id in &body.library_ids {
        let exists = kinema_db::repo::libraries::get_library(&state.db, library_id)
            .await
            .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
            .is_some();
        if !exists {
            return Err(ApiError::BadRequest(format!("unknown library id: {library_id}")).into());
        }
    }

    kinema_db::repo::users::set_library_access(&state.db, &user_id, &body.library_ids)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(
        serde_json::json!({ "ok": true, "library_ids": body.library_ids }),
    ))
}

// ---------------------------------------------------------------------------
// Libraries
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateLibraryRequest {
    name: String,
    paths: Vec<String>,
}

#[derive(Serialize)]
struct LibraryResponse {
    id: String,
    name: String,
    paths: Vec<String>,
    created_ts: i64,
}

async fn create_library(
    _admin: AdminUser,
    State(state): State<AppState>,
    Json(body): Json<CreateLibraryRequest>,
) -> Result<(axum::http::StatusCode, Json<LibraryResponse>), AppError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("library name required".into()).into());
    }
    if body.paths.is_empty() {
        return Err(ApiError::BadRequest("at least one path required".into()).into());
    }

    let lib = kinema_db::repo::libraries::create_library(&state.db, &body.name, &body.paths)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok((
        axum::http::StatusCode::CREATED,
        Json(LibraryResponse {
            id: lib.id,
            name: lib.name,
            paths: body.paths,
            created_ts: lib.created_ts,
        }),
    ))
}

async fn list_libraries(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<LibraryResponse>>, AppError> {
    let libs = kinema_db::repo::libraries::list_libraries(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let mut result = Vec::with_capacity(libs.len());
    for lib in libs {
        if require_library_access(&auth, &state, &lib.id).await.is_err() {
            continue;
        }
        let paths = kinema_db::repo::libraries::get_library_paths(&state.db, &lib.id)
            .await
            .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
        result.push(LibraryResponse {
            id: lib.id,
            name: lib.name,
            paths: paths.into_iter().map(|p| p.path).collect(),
            created_ts: lib.created_ts,
        });
    }

    Ok(Json(result))
}

async fn scan_library(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(axum::http::StatusCode, Json<serde_json::Value>), AppError> {
    let lib = kinema_db::repo::libraries::get_library(&state.db, &id)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .ok_or_else(|| ApiError::NotFound("library not found".into()))?;

    // Run the scan in the background; progress lands in the logs.
    let pool = state.db.clone();
    let ffprobe = state.ffprobe_path.clone();
    let lib_id = lib.id.clone();
    tokio::spawn(async move {
        match kinema_scanner::scan::run_library_scan(&pool, &ffprobe, &lib_id).await {
            Ok(result) => {
                tracing::info!(
                    library_id = %lib_id,
                    added = result.added,
                    skipped = result.skipped,
                    "scan completed"
                );
            }
            Err(e) => {
                tracing::error!(library_id = %lib_id, error = %e, "scan failed");
            }
        }
    });

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "scan started", "library_id": id })),
    ))
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct MediaResponse {
    id: String,
    library_id: String,
    media_type: String,
    title: String,
    duration_secs: Option<f64>,
    size_bytes: i64,
    created_ts: i64,
}

fn media_to_response(row: kinema_db::repo::media::MediaRow) -> MediaResponse {
    MediaResponse {
        id: row.id,
        library_id: row.library_id,
        media_type: row.media_type,
        title: row.title,
        duration_secs: row.duration_secs,
        size_bytes: row.size_bytes,
        created_ts: row.created_ts,
    }
}

async fn list_library_media(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<MediaResponse>>, AppError> {
    let lib = kinema_db::repo::libraries::get_library(&state.db, &id)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .ok_or_else(|| ApiError::NotFound("library not found".into()))?;
    require_library_access(&auth, &state, &lib.id).await?;

    let rows = kinema_db::repo::media::list_library_media(&state.db, &id)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows.into_iter().map(media_to_response).collect()))
}

async fn get_media(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MediaResponse>, AppError> {
    let row = kinema_db::repo::media::get_media(&state.db, &id)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .ok_or_else(|| ApiError::NotFound("media not found".into()))?;
    require_library_access(&auth, &state, &row.library_id).await?;

    Ok(Json(media_to_response(row)))
}
