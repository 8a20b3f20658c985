use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, StatusCode, header};
use axum_test::TestServer;
use kinema_server::routes::build_router;
use kinema_server::state::AppState;
use serde_json::{Value, json};
use sqlx::SqlitePool;

struct TestContext {
    server: TestServer,
    db: SqlitePool,
    media_dir: tempfile::TempDir,
    _cache_dir: tempfile::TempDir,
}

/// Test server with an in-memory catalog and an HLS engine whose encoder
/// binary does not exist, so transcode attempts fail fast. That is exactly
/// what the backpressure tests need.
async fn test_app() -> TestContext {
    let pool = kinema_db::connect(":memory:").await.unwrap();
    kinema_db::migrate::run(&pool).await.unwrap();

    kinema_db::repo::users::create_user(&pool, "admin", "admin123", "admin")
        .await
        .unwrap();

    let cache_dir = tempfile::tempdir().unwrap();
    let media_dir = tempfile::tempdir().unwrap();

    let hls_config = kinema_hls::HlsConfig {
        ffmpeg_path: "/nonexistent/ffmpeg".into(),
        cache_root: cache_dir.path().join("hls"),
        max_concurrent_jobs: 2,
        segment_wait_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    };
    let engine = Arc::new(kinema_hls::engine::HlsEngine::new(hls_config));

    let state = AppState {
        db: pool.clone(),
        jwt_secret: "test-secret-key".to_string(),
        hls: engine,
        cache_dir: cache_dir.path().to_path_buf(),
        ffmpeg_path: "/nonexistent/ffmpeg".into(),
        ffprobe_path: "/nonexistent/ffprobe".into(),
    };

    let server = TestServer::new(build_router(state)).unwrap();
    TestContext {
        server,
        db: pool,
        media_dir,
        _cache_dir: cache_dir,
    }
}

async fn login(server: &TestServer, username: &str, password: &str) -> String {
    let resp = server
        .post("/api/v1/auth/login")
        .json(&json!({ "username": username, "password": password }))
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    body["token"].as_str().unwrap().to_string()
}

fn bearer(token: &str) -> HeaderValue {
    format!("Bearer {token}").parse().unwrap()
}

/// Seed one library and one video row whose source file really exists.
async fn seed_media(ctx: &TestContext, duration_secs: Option<f64>) -> (String, String) {
    let lib = kinema_db::repo::libraries::create_library(
        &ctx.db,
        "Movies",
        &[ctx.media_dir.path().to_string_lossy().to_string()],
    )
    .await
    .unwrap();

    let source = ctx.media_dir.path().join("example.mkv");
    std::fs::write(&source, b"not really matroska").unwrap();

    let media_id = kinema_db::repo::media::insert_media(
        &ctx.db,
        &lib.id,
        &source.to_string_lossy(),
        "video",
        "Example",
        duration_secs,
        19,
        0,
    )
    .await
    .unwrap();

    (lib.id, media_id)
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let ctx = test_app().await;
    let resp = ctx.server.get("/health").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn login_with_valid_credentials() {
    let ctx = test_app().await;
    let resp = ctx
        .server
        .post("/api/v1/auth/login")
        .json(&json!({ "username": "admin", "password": "admin123" }))
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert!(body["token"].as_str().is_some());
    assert_eq!(body["role"], "admin");
}

#[tokio::test]
async fn login_with_invalid_credentials() {
    let ctx = test_app().await;
    let resp = ctx
        .server
        .post("/api/v1/auth/login")
        .json(&json!({ "username": "admin", "password": "wrong" }))
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn users_me_requires_auth() {
    let ctx = test_app().await;
    let resp = ctx.server.get("/api/v1/users/me").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn segment_route_rejects_unknown_quality() {
    let ctx = test_app().await;
    let resp = ctx
        .server
        .get("/stream/hls/some-id/ultra/segment-000.ts")
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn segment_route_rejects_malformed_names_before_lookup() {
    let ctx = test_app().await;
    // The media id is unknown, but name validation must come first: these
    // all fail with 400, not 404.
    for bad in ["segment-99.ts", "segment-0000.ts", "segment-abc.ts", "passwd.ts"] {
        let resp = ctx
            .server
            .get(&format!("/stream/hls/some-id/high/{bad}"))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn segment_route_unknown_media_is_404() {
    let ctx = test_app().await;
    let resp = ctx
        .server
        .get("/stream/hls/no-such-media/high/segment-000.ts")
        .await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn segment_route_surfaces_encoder_failure_as_503() {
    let ctx = test_app().await;
    let (_, media_id) = seed_media(&ctx, Some(20.0)).await;

    // The engine's ffmpeg binary does not exist, so the job fails fast and
    // the waiter gets backpressure rather than a hang.
    let resp = ctx
        .server
        .get(&format!("/stream/hls/{media_id}/high/segment-000.ts"))
        .await;
    resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "unavailable");
}

#[tokio::test]
async fn vod_playlist_requires_known_duration() {
    let ctx = test_app().await;
    let (_, media_id) = seed_media(&ctx, None).await;

    let resp = ctx
        .server
        .get(&format!("/stream/hls/{media_id}/medium/index.m3u8"))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn vod_playlist_backpressures_when_segments_never_arrive() {
    let ctx = test_app().await;
    let (_, media_id) = seed_media(&ctx, Some(20.0)).await;

    let resp = ctx
        .server
        .get(&format!("/stream/hls/{media_id}/medium/index.m3u8"))
        .await;
    resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn live_playlist_unknown_media_is_404() {
    let ctx = test_app().await;
    let resp = ctx
        .server
        .get("/stream/hls/no-such-media/low/live.m3u8")
        .await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn live_playlist_answers_while_generation_is_pending() {
    let ctx = test_app().await;
    let (_, media_id) = seed_media(&ctx, Some(20.0)).await;

    let resp = ctx
        .server
        .get(&format!("/stream/hls/{media_id}/low/live.m3u8"))
        .await;
    resp.assert_status_ok();

    let cache = resp.header(header::CACHE_CONTROL);
    assert_eq!(cache.to_str().unwrap(), "no-cache");

    let body = resp.text();
    assert!(body.starts_with("#EXTM3U"));
    assert!(!body.contains("#EXT-X-ENDLIST"));
}

#[tokio::test]
async fn media_routes_require_auth() {
    let ctx = test_app().await;
    let (_, media_id) = seed_media(&ctx, Some(20.0)).await;

    let resp = ctx.server.get(&format!("/api/v1/media/{media_id}")).await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let resp = ctx
        .server
        .get(&format!("/api/v1/media/{media_id}/thumbnail"))
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn media_detail_visible_to_admin() {
    let ctx = test_app().await;
    let (_, media_id) = seed_media(&ctx, Some(20.0)).await;
    let token = login(&ctx.server, "admin", "admin123").await;

    let resp = ctx
        .server
        .get(&format!("/api/v1/media/{media_id}"))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["title"], "Example");
    assert_eq!(body["duration_secs"], json!(20.0));
}

#[tokio::test]
async fn library_access_fails_closed_for_unprivileged_users() {
    let ctx = test_app().await;
    let (_, media_id) = seed_media(&ctx, Some(20.0)).await;

    // A user with no library grants sees 403, not the media row.
    kinema_db::repo::users::create_user(&ctx.db, "viewer", "viewerpw", "user")
        .await
        .unwrap();
    let token = login(&ctx.server, "viewer", "viewerpw").await;

    let resp = ctx
        .server
        .get(&format!("/api/v1/media/{media_id}"))
        .add_header(header::AUTHORIZATION, bearer(&token))
        .await;
    resp.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn granting_library_access_opens_the_catalog() {
    let ctx = test_app().await;
    let (library_id, media_id) = seed_media(&ctx, Some(20.0)).await;

    let viewer_id = kinema_db::repo::users::create_user(&ctx.db, "viewer", "viewerpw", "user")
        .await
        .unwrap();
    let viewer_token = login(&ctx.server, "viewer", "viewerpw").await;
    let admin_token = login(&ctx.server, "admin", "admin123").await;

    // Denied before the grant.
    let resp = ctx
        .server
        .get(&format!("/api/v1/media/{media_id}"))
        .add_header(header::AUTHORIZATION, bearer(&viewer_token))
        .await;
    resp.assert_status(StatusCode::FORBIDDEN);

    let resp = ctx
        .server
        .put(&format!("/api/v1/users/{viewer_id}/libraries"))
        .add_header(header::AUTHORIZATION, bearer(&admin_token))
        .json(&json!({ "library_ids": [library_id] }))
        .await;
    resp.assert_status_ok();

    let resp = ctx
        .server
        .get(&format!("/api/v1/media/{media_id}"))
        .add_header(header::AUTHORIZATION, bearer(&viewer_token))
        .await;
    resp.assert_status_ok();
}

#[tokio::test]
async fn non_admin_cannot_create_libraries() {
    let ctx = test_app().await;
    kinema_db::repo::users::create_user(&ctx.db, "viewer", "viewerpw", "user")
        .await
        .unwrap();
    let token = login(&ctx.server, "viewer", "viewerpw").await;

    let resp = ctx
        .server
        .post("/api/v1/libraries")
        .add_header(header::AUTHORIZATION, bearer(&token))
        .json(&json!({ "name": "Movies", "paths": ["/media/movies"] }))
        .await;
    resp.assert_status(StatusCode::FORBIDDEN);
}
