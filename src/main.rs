use anyhow::Context;
use clap::{Parser, Subcommand};
use kvmigrate::migration::create_registry;
use kvmigrate::utils::DEFAULT_STORE_PATH;
use kvmigrate::{read_config, JsonFileStore, KeyValueStore, MigrationRunner};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_CONFIG_PATH: &str = ".kvmigrate/config.json";

/// kvmigrate - run dependency-ordered data migrations against a local store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON file store
    #[arg(short, long, env = "KVMIGRATE_STORE", default_value = DEFAULT_STORE_PATH)]
    store: PathBuf,

    /// Path to the engine configuration file. Defaults apply if it does not exist.
    #[arg(short, long, env = "KVMIGRATE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Comma-separated record domains for the record migrations.
    /// Overrides `recordDomains` from the configuration file.
    #[arg(long, value_delimiter = ',')]
    domains: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved execution order and which migrations are applied
    Plan,
    /// Print applied and pending counts
    Status,
    /// Run all pending migrations
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse CLI arguments
    let args = Args::parse();

    let mut config = read_config(&args.config)
        .await
        .with_context(|| format!("Failed to read config {}", args.config.display()))?
        .unwrap_or_default();

    let domains: Vec<String> = args
        .domains
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if !domains.is_empty() {
        config.record_domains = domains;
    }

    let store: Arc<dyn KeyValueStore> = Arc::new(
        JsonFileStore::open(&args.store)
            .await
            .with_context(|| format!("Failed to open store {}", args.store.display()))?,
    );

    info!(
        store = %args.store.display(),
        domains = %config.record_domains.join(","),
        "Loaded migration store"
    );

    let registry = create_registry(Arc::clone(&store), config.record_domains.clone())?;
    let runner = MigrationRunner::new(Arc::new(registry), store, config);

    match args.command {
        Command::Plan => {
            let plan = runner.plan()?;
            let applied = runner.ledger().applied_set().await?;

            for (i, step) in plan.steps().iter().enumerate() {
                let marker = if applied.contains(step.name()) { "x" } else { " " };
                println!(
                    "{:>3}. [{}] {} (run order {}){}",
                    i + 1,
                    marker,
                    step.name(),
                    step.run_order(),
                    step.description()
                        .map(|d| format!(" - {d}"))
                        .unwrap_or_default()
                );
            }
            println!("fingerprint: {}", plan.fingerprint());
        }
        Command::Status => {
            let plan = runner.plan()?;
            let pending = runner.pending().await?;
            println!("registered: {}", plan.len());
            println!("applied:    {}", plan.len() - pending.len());
            println!("pending:    {}", pending.len());
            for name in pending.names() {
                println!("  - {name}");
            }
        }
        Command::Run => {
            let report = runner.run().await?;
            for name in &report.completed {
                println!("applied  {name}");
            }
            println!(
                "{} applied, {} already applied, {}ms",
                report.completed.len(),
                report.skipped.len(),
                report.duration_ms
            );
            report.into_result()?;
        }
    }

    Ok(())
}
