//! ledger-workload CLI
//!
//! ```text
//! ledger-workload init --accounts 10k --regions all
//! ledger-workload transfer --threads 8 --legs 4 --duration 15m
//! ledger-workload balance --follower-reads --duration 5m
//! ledger-workload report
//! ```
//!
//! `--dry-run` swaps the database for a seeded in-memory store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use ledger_workload::config::{AppConfig, ConfigError};
use ledger_workload::db::Database;
use ledger_workload::engine::{CallMetrics, WorkerPool};
use ledger_workload::ledger::{AccountStore, InMemoryAccountStore, Money, PgAccountStore, pg};
use ledger_workload::units::{format_duration, parse_count, parse_duration};
use ledger_workload::workload::{
    BalanceOptions, InitOptions, SuperviseOptions, TransferOptions, init_accounts, ledger_report,
    start_balance_workload, start_transfer_workload, supervise,
};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

/// Regions of the in-memory store used by `--dry-run`
const DRY_RUN_REGIONS: [&str; 2] = ["us-east-1", "eu-west-1"];

#[derive(Parser)]
#[command(name = "ledger-workload")]
#[command(version = VERSION)]
#[command(about = "Balanced multi-leg transfer workload for distributed SQL databases")]
struct Cli {
    /// Config environment, loads config/<env>.yaml
    #[arg(short, long, global = true, default_value = "dev")]
    env: String,

    /// Explicit config file path, takes precedence over --env
    #[arg(long, global = true)]
    config: Option<String>,

    /// Database URL, overrides the configured one
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Run against an in-memory store instead of the database
    #[arg(long, global = true)]
    dry_run: bool,

    /// Accounts seeded per region for dry runs (e.g. 1k)
    #[arg(long, global = true, default_value = "1k")]
    seed_accounts: String,

    /// Worker pool size, 0 derives it from the CPU count
    #[arg(long, global = true)]
    pool_size: Option<usize>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema and the initial accounts
    Init {
        /// Initial balance of every account
        #[arg(long, default_value = "100000.00")]
        balance: String,

        #[arg(long, default_value = "USD")]
        currency: String,

        /// Accounts per region (e.g. 10k, 1.5m)
        #[arg(long, default_value = "10k")]
        accounts: String,

        /// Rows per insert statement
        #[arg(long, default_value_t = 64)]
        batch_size: usize,

        /// all, gateway or a comma separated list
        #[arg(long, default_value = "all")]
        regions: String,

        /// Drop existing tables first
        #[arg(long)]
        drop: bool,

        /// Assume the schema exists
        #[arg(long)]
        skip_schema: bool,
    },

    /// Run concurrent balanced transfers
    Transfer {
        #[command(flatten)]
        run: RunArgs,

        /// Legs per transfer, must be even
        #[arg(long, default_value_t = 2)]
        legs: usize,
    },

    /// Run concurrent balance reads
    Balance {
        #[command(flatten)]
        run: RunArgs,

        /// Read from the nearest replica (AS OF SYSTEM TIME)
        #[arg(long)]
        follower_reads: bool,
    },

    /// Print account summaries and balance totals
    Report {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Workers per region
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// all, gateway or a comma separated list
    #[arg(long, default_value = "all")]
    regions: String,

    /// Max accounts loaded per region
    #[arg(long, default_value_t = 5000)]
    limit: u64,

    /// Run time (e.g. 45m, 1h30m, 90s)
    #[arg(long, default_value = "45m")]
    duration: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, fallback) = load_config(&cli)?;
    if let Some(size) = cli.pool_size {
        config.pool.size = size;
    }
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }

    let _log_guard = ledger_workload::logging::init_logging(&config, cli.verbose);
    info!(version = VERSION, env = %cli.env, dry_run = cli.dry_run, "Starting ledger-workload");
    if let Some(e) = fallback {
        warn!(error = %e, "Config file not found, using defaults");
    }

    match &cli.command {
        Commands::Init {
            balance,
            currency,
            accounts,
            batch_size,
            regions,
            drop,
            skip_schema,
        } => {
            let options = InitOptions {
                initial_balance: Money::parse(balance, currency)?,
                accounts: parse_count(accounts)?,
                batch_size: *batch_size,
                regions: regions.clone(),
            };

            let store: Arc<dyn AccountStore> = if cli.dry_run {
                Arc::new(InMemoryAccountStore::with_regions(DRY_RUN_REGIONS))
            } else {
                let db = connect(&config).await?;
                if *drop {
                    pg::drop_schema(db.pool()).await.context("Failed to drop schema")?;
                    info!("Schema dropped");
                }
                if !*skip_schema {
                    pg::create_schema(db.pool()).await.context("Failed to create schema")?;
                    info!("Schema created");
                }
                Arc::new(PgAccountStore::new(db.pool().clone()))
            };

            let created = init_accounts(store.as_ref(), &options).await?;
            println!("Created {} accounts", created);
        }

        Commands::Transfer { run, legs } => {
            let options = TransferOptions {
                threads: run.threads,
                regions: run.regions.clone(),
                limit: run.limit,
                legs: *legs,
                duration: parse_duration(&run.duration)?,
            };
            let store = open_store(&cli, &config).await?;
            let pool = worker_pool(&config);
            info!(
                threads = options.threads,
                legs = options.legs,
                duration = %format_duration(options.duration),
                pool_size = pool.size(),
                "Starting transfer workload"
            );
            let handles = start_transfer_workload(&pool, store, &options).await?;
            if handles.is_empty() {
                anyhow::bail!("No region has enough accounts for {} legs", options.legs);
            }
            drive(pool, &config).await?;
        }

        Commands::Balance {
            run,
            follower_reads,
        } => {
            let options = BalanceOptions {
                threads: run.threads,
                regions: run.regions.clone(),
                limit: run.limit,
                duration: parse_duration(&run.duration)?,
                follower_reads: *follower_reads,
            };
            let store = open_store(&cli, &config).await?;
            let pool = worker_pool(&config);
            info!(
                threads = options.threads,
                follower_reads = options.follower_reads,
                duration = %format_duration(options.duration),
                pool_size = pool.size(),
                "Starting balance workload"
            );
            let handles = start_balance_workload(&pool, store, &options).await?;
            if handles.is_empty() {
                anyhow::bail!("No accounts found in the selected regions");
            }
            drive(pool, &config).await?;
        }

        Commands::Report { json } => {
            let store = open_store(&cli, &config).await?;
            let report = ledger_report(store.as_ref()).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report);
            }
        }
    }

    Ok(())
}

/// `--config` must exist. A missing `config/<env>.yaml` falls back to
/// defaults and hands the error back so it can be logged once logging is up.
fn load_config(cli: &Cli) -> anyhow::Result<(AppConfig, Option<ConfigError>)> {
    if let Some(path) = &cli.config {
        return Ok((AppConfig::load_from(path)?, None));
    }
    match AppConfig::load(&cli.env) {
        Ok(config) => Ok((config, None)),
        Err(e @ ConfigError::Read { .. }) => Ok((AppConfig::default(), Some(e))),
        Err(e) => Err(e.into()),
    }
}

async fn connect(config: &AppConfig) -> anyhow::Result<Database> {
    let db = Database::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    match db.version().await {
        Ok(version) => info!(version = %version, "Connected to database"),
        Err(e) => warn!(error = %e, "Connected, but version query failed"),
    }
    Ok(db)
}

async fn open_store(cli: &Cli, config: &AppConfig) -> anyhow::Result<Arc<dyn AccountStore>> {
    if !cli.dry_run {
        let db = connect(config).await?;
        return Ok(Arc::new(PgAccountStore::new(db.pool().clone())));
    }

    let store = InMemoryAccountStore::with_regions(DRY_RUN_REGIONS);
    let seed = InitOptions {
        initial_balance: Money::parse("100000.00", "USD")?,
        accounts: parse_count(&cli.seed_accounts)?,
        batch_size: 256,
        regions: "all".to_string(),
    };
    init_accounts(&store, &seed).await?;
    Ok(Arc::new(store))
}

fn worker_pool(config: &AppConfig) -> Arc<WorkerPool> {
    let metrics = Arc::new(CallMetrics::new(config.metrics.sample_capacity));
    Arc::new(WorkerPool::new(config.pool.effective_size(), metrics))
}

/// Supervise until the workers finish or Ctrl-C, then fail if any task failed
async fn drive(pool: Arc<WorkerPool>, config: &AppConfig) -> anyhow::Result<()> {
    let options = SuperviseOptions {
        report_interval: Duration::from_secs(config.metrics.report_interval_secs),
        sample_interval: Duration::from_secs(config.sampler.interval_secs),
        sample_capacity: config.sampler.capacity,
    };
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let outcome = supervise(pool, options, interrupt).await;
    for report in outcome.reports.iter().filter(|r| r.completion.is_failure()) {
        error!(task = %report.id, completion = %report.completion, "Task failed");
    }

    let failures = outcome.failures();
    if failures > 0 {
        anyhow::bail!("{} of {} tasks failed", failures, outcome.reports.len());
    }
    info!(
        tasks = outcome.reports.len(),
        interrupted = outcome.interrupted,
        "Workload finished"
    );
    Ok(())
}
