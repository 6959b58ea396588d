use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use axiom_llm_service::{
    AppConfig, EngineSettings, HubStore, InferenceServer, ModelProvisioner, build_router,
    model::InferenceRuntime,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        addr = %config.listen_addr,
        artifact = %config.artifact,
        cache_dir = %config.cache_dir.display(),
        "configuration loaded"
    );

    let store = Arc::new(HubStore::new(config.hub_endpoint.clone())?);
    let provisioner = Arc::new(ModelProvisioner::new(
        config.cache_dir.clone(),
        store,
        config.hub_token.clone(),
    ));

    let engine = Arc::new(InferenceServer::new(EngineSettings::from(&config), runtime()));
    engine.start(provisioner, config.artifact.clone());

    let router = build_router(engine);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(feature = "llama-backend")]
fn runtime() -> Arc<dyn InferenceRuntime> {
    Arc::new(axiom_llm_service::model::llama::LlamaRuntime)
}

#[cfg(not(feature = "llama-backend"))]
fn runtime() -> Arc<dyn InferenceRuntime> {
    tracing::warn!("built without llama-backend, the model will report offline");
    Arc::new(axiom_llm_service::model::UnavailableRuntime)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
