use anyhow::{Context, Result};
use model_server::{bootstrap, http, Reconciler, ServerSettings};
use modelops_registry::RegistryService;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    modelops_core::init_tracing("model-server")?;
    let settings: ServerSettings = modelops_core::load_config("model-server")?;
    let serving = settings.serving.clone();

    let registry: Arc<dyn RegistryService> = Arc::new(settings.registry.mlflow().context("building registry client")?);
    let artifacts = settings.registry.artifact_store().context("building artifact store")?;
    let state = Arc::new(bootstrap(registry.as_ref(), artifacts.as_ref(), &serving).await.context("loading initial model")?);

    let reconciler = Arc::new(Reconciler::new(registry, artifacts, state.clone(), serving.request_timeout()));
    let handle = reconciler.spawn(serving.poll_interval(), serving.auto_reload);

    let addr = modelops_core::start_admin_server(serving.admin_port, http::router(state.clone(), handle.trigger())).await?;
    modelops_core::mark_ready();
    info!(%addr, version = ?state.current().active.version(), model = state.current().model.name(), "model server ready");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown requested");
    modelops_core::clear_ready();
    handle.shutdown().await;
    Ok(())
}
