use std::time::Duration;

use sql_chat::{logging, router, AppConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load();
    logging::init_logging();

    let bind = config.bind;
    let state = AppState::new(config);

    let connections = state.connections.clone();
    let sessions = state.sessions.clone();
    let session_idle = state.config.session_idle();
    let sweep_every = state
        .config
        .cache_ttl()
        .min(session_idle)
        .max(Duration::from_secs(60));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            connections.evict_expired().await;
            let evicted = sessions.evict_idle(session_idle).await;
            if evicted > 0 {
                tracing::info!(evicted, "dropped idle sessions");
            }
        }
    });

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "chat widget available at http://{}", bind);

    axum::serve(listener, app).await?;

    Ok(())
}
