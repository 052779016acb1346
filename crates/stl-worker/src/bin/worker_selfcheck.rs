use stl_store::PgJobStore;
use stl_worker::preflight::run_preflight;
use stl_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with sku={} output_dir={}",
        config.target_sku,
        config.output_dir_abs.display()
    );
    config.validate()?;

    let report = run_preflight(&config).await?;
    println!("worker-selfcheck: renderer {}", report.renderer.display());
    println!("worker-selfcheck: template {}", report.template.display());

    ensure_database(&config).await?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_database(config: &WorkerConfig) -> anyhow::Result<()> {
    let store = PgJobStore::connect(&config.database_url, 1)
        .await
        .map_err(|e| anyhow::anyhow!("database not reachable: {}", e))?;
    let result = store.health_check().await;
    store.close().await;
    result.map_err(|e| anyhow::anyhow!("database health check failed: {}", e))
}
