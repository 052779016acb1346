//! Maintenance commands for the print task table.

use clap::{Parser, Subcommand};

use stl_store::PgJobStore;

#[derive(Debug, Parser)]
#[command(name = "stl-tasks", about = "Inspect and repair STL render jobs")]
struct Cli {
    /// Job database connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending schema migrations
    Migrate,
    /// Show job counts per state and jobs currently rendering
    Status {
        /// Only jobs for this product SKU
        #[arg(long, env = "TARGET_SKU")]
        sku: Option<String>,
    },
    /// Return jobs stuck in (in_progress, running) to the eligible pool
    ResetStuck {
        #[arg(long)]
        sku: Option<String>,
    },
    /// Return permanently failed jobs to the eligible pool with a fresh retry budget
    ResetFailed {
        #[arg(long)]
        sku: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let store = PgJobStore::connect(&cli.database_url, 1).await?;
    let result = run(&store, cli.command).await;
    store.close().await;
    result
}

async fn run(store: &PgJobStore, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Migrate => {
            store.run_migrations().await?;
            println!("migrations applied");
        }
        Command::Status { sku } => {
            let counts = store.state_counts(sku.as_deref()).await?;
            if counts.is_empty() {
                println!("no jobs");
            }
            for row in &counts {
                println!(
                    "{:<12} {:<10} {}",
                    row.status.as_str(),
                    row.render_state.as_str(),
                    row.count
                );
            }

            let running = store.running_jobs(sku.as_deref()).await?;
            if !running.is_empty() {
                println!();
                println!("rendering ({}):", running.len());
                for job in running {
                    println!(
                        "  {} sku={} retries={} created_at={}",
                        job.id, job.product_sku, job.render_retries, job.created_at
                    );
                }
            }
        }
        Command::ResetStuck { sku } => {
            let reset = store.reset_stuck(sku.as_deref()).await?;
            println!("reset {reset} stuck job(s)");
        }
        Command::ResetFailed { sku } => {
            let reset = store.reset_failed(sku.as_deref()).await?;
            println!("reset {reset} failed job(s)");
        }
    }
    Ok(())
}
