use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // DB path: use KINEMA_DB env or default
    let db_path = std::env::var("KINEMA_DB").unwrap_or_else(|_| "kinema.db".to_string());
    info!(db_path = %db_path, "connecting to database");

    let pool = kinema_db::connect(&db_path)
        .await
        .context("failed to connect to database")?;

    kinema_db::migrate::run(&pool)
        .await
        .context("failed to run migrations")?;
    info!("migrations complete");

    // Bootstrap admin if no users exist
    let user_count = kinema_db::repo::users::count_users(&pool)
        .await
        .context("failed to count users")?;

    if user_count == 0 {
        let admin_pass =
            std::env::var("KINEMA_ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());
        let role = kinema_core::types::UserRole::Admin.as_str();
        kinema_db::repo::users::create_user(&pool, "admin", &admin_pass, role)
            .await
            .context("failed to bootstrap admin user")?;
        info!("admin user bootstrapped (username: admin)");
    }

    // JWT secret: use env or generate random
    let jwt_secret =
        std::env::var("KINEMA_JWT_SECRET").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

    // HLS engine configuration
    let cache_dir: std::path::PathBuf = std::env::var("KINEMA_CACHE_DIR")
        .unwrap_or_else(|_| "/tmp/kinema_cache".to_string())
        .into();
    std::fs::create_dir_all(&cache_dir).context("failed to create cache dir")?;

    let max_transcodes: usize = std::env::var("KINEMA_MAX_TRANSCODES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4);
    let ffmpeg_path: std::path::PathBuf = std::env::var("KINEMA_FFMPEG")
        .unwrap_or_else(|_| "ffmpeg".to_string())
        .into();
    let ffprobe_path: std::path::PathBuf = std::env::var("KINEMA_FFPROBE")
        .unwrap_or_else(|_| "ffprobe".to_string())
        .into();

    let hls_config = kinema_hls::HlsConfig {
        ffmpeg_path: ffmpeg_path.clone(),
        cache_root: cache_dir.join("hls"),
        max_concurrent_jobs: max_transcodes,
        ..Default::default()
    };
    let engine = std::sync::Arc::new(kinema_hls::engine::HlsEngine::new(hls_config));

    let app_state = kinema_server::state::AppState {
        db: pool,
        jwt_secret,
        hls: engine,
        cache_dir,
        ffmpeg_path,
        ffprobe_path,
    };

    // Periodic orphan sweep for HLS caches and thumbnails
    kinema_server::maintenance::spawn_orphan_reaper(
        app_state.clone(),
        Duration::from_secs(15 * 60),
    );

    let app = kinema_server::routes::build_router(app_state);

    let bind_addr = std::env::var("KINEMA_BIND").unwrap_or_else(|_| "0.0.0.0:8099".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context("failed to bind")?;
    info!(addr = %bind_addr, "server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
