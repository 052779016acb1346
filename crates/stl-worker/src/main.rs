//! STL render worker binary.

use std::sync::Arc;

use tracing::{error, info};

use stl_render::OpenScadRenderer;
use stl_store::PgJobStore;
use stl_worker::logging::init_tracing;
use stl_worker::metrics::init_metrics;
use stl_worker::preflight::run_preflight;
use stl_worker::{install_shutdown_handler, JobExecutor, WorkerConfig, WorkerResult};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting stl-worker");

    if let Err(e) = run().await {
        error!("Worker error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn run() -> WorkerResult<()> {
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);
    config.validate()?;

    if let Some(addr) = config.metrics_addr {
        init_metrics(addr)?;
        info!("Serving metrics on {}", addr);
    }

    run_preflight(&config).await?;

    let store = PgJobStore::connect(&config.database_url, config.database_max_connections).await?;
    let renderer = OpenScadRenderer::new(config.render_settings());
    let shutdown = install_shutdown_handler();

    let executor = JobExecutor::new(config, Arc::new(store.clone()), Arc::new(renderer));
    let result = executor.run(shutdown).await;

    store.close().await;
    result.map(|_| ())
}
