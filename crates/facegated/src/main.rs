use anyhow::{Context, Result};
use facegate_core::{Gallery, RustfaceLocator, SampleStore};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = config::Config::from_env();

    // Open the store and load the model synchronously (fail-fast)
    let store = SampleStore::open(&config.db_path)
        .with_context(|| format!("opening sample store {}", config.db_path.display()))?;
    let locator = RustfaceLocator::load(&config.model_path, config.locator_settings())?;

    let mut gallery = Gallery::new(store, Box::new(locator), config.gallery_settings());
    tracing::info!(
        patch_size = config.patch_size,
        match_threshold = config.match_threshold,
        enroll_policy = %config.enroll_policy,
        "gallery configured"
    );

    if config.retrain_on_startup {
        if let Err(e) = gallery.retrain() {
            tracing::warn!(
                error = %e,
                "startup retrain failed; recognition stays untrained until the next enrollment"
            );
        }
    }

    let engine = engine::spawn_engine(gallery)?;
    let app = http::router(engine, &config.static_dir, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(addr = %config.bind, "facegated ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facegated shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
