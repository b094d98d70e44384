#![forbid(unsafe_code)]

use anyhow::Context;
use forge_core::adapter::Adapters;
use forge_engine::Engine;
use forge_server::config::Config;
use forge_server::persist;
use forge_server::routes::{AppState, router};
use forge_server::sse::EventHub;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().map_err(anyhow::Error::msg)?;
    init_logging(&config);

    let mut store = config.open_store().context("open persistence backend")?;
    let adapters = Adapters::new(config.python_parser());
    let engine = match store.load().context("load snapshot")? {
        Some(doc) => Engine::from_snapshot(doc, adapters),
        None => Engine::new(adapters),
    };
    let engine = Arc::new(RwLock::new(engine));

    let persister = persist::spawn(engine.clone(), store);
    let app = AppState {
        engine,
        hub: Arc::new(EventHub::new()),
        persister,
        log_state_updates: config.log_state_updates,
    };
    let router = router(app);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("forge server listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;
    Ok(())
}

fn init_logging(config: &Config) {
    let Some(filter) = config.log_level.as_filter() else {
        return;
    };
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down");
}
