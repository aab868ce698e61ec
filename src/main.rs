use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use tutorbook::auth::JwtGateway;
use tutorbook::config::Config;
use tutorbook::engine::ReservationEngine;
use tutorbook::http::{build_router, AppState};
use tutorbook::store::ReservationStore;
use tutorbook::{compactor, directory};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    tutorbook::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(ReservationStore::open(config.wal_path(), config.lock_timeout)?);
    directory::seed_tutors(&store, &config.seed_tutors).await?;
    tokio::spawn(compactor::run_compactor(
        store.clone(),
        config.compact_threshold,
        Duration::from_secs(30),
    ));

    let engine = Arc::new(ReservationEngine::new(store.clone()).with_retry(config.retry));
    if config.uses_dev_secret() {
        warn!("TUTORBOOK_JWT_SECRET is unset; signing tokens with the development key");
    }
    let gateway = Arc::new(JwtGateway::new(store.clone(), &config.jwt_secret, config.token_ttl));
    let app = build_router(AppState::new(engine, gateway, store.clone()));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("tutorbook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  lock_timeout: {:?}, max_attempts: {}", config.lock_timeout, config.retry.max_attempts);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("tutorbook stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, draining requests");
}
