//! chaintask CLI — inspect crosscheck and task state.
//!
//! Usage:
//! ```bash
//! chaintask inspect ./chaintask.db --prefix cc: --task-prefix Task:
//! chaintask inspect ./chaintask.db --config crosscheck.json --json
//! chaintask validate crosscheck.json
//! chaintask info
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chaintask_core::store::Store;
use chaintask_crosscheck::config::{
    DEFAULT_BATCH_BLOCKS_COUNT, DEFAULT_DELAY_BLOCK_FROM_LATEST, DEFAULT_POLLING_INTERVAL_MS,
};
use chaintask_crosscheck::{CrosscheckConfig, LogCache, WindowPlanner};
use chaintask_storage::SqliteStore;

#[derive(Parser)]
#[command(
    name = "chaintask",
    about = "Event-log crosscheck and persisted task pipeline",
    version
)]
struct Cli {
    /// Log filter ("trace" .. "error" or a full directive); RUST_LOG wins when set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show checkpoint, cached logs and task counts of a SQLite store
    Inspect(InspectArgs),

    /// Check a crosscheck config (JSON) and print effective values
    Validate {
        /// Path to the config file
        file: PathBuf,
    },

    /// Show defaults
    Info,

    /// Print version
    Version,
}

#[derive(clap::Args, Debug)]
struct InspectArgs {
    /// SQLite database path
    db: String,
    /// Crosscheck cache key prefix
    #[arg(long, default_value = "", conflicts_with = "config")]
    prefix: String,
    /// Take the cache prefix from a crosscheck config (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Pending task prefix
    #[arg(long, default_value = "Task:")]
    task_prefix: String,
    /// Done task prefix
    #[arg(long, default_value = "Done-Task:")]
    done_prefix: String,
    /// Delete expired rows first
    #[arg(long)]
    purge: bool,
    /// Print the report and logs as JSON
    #[arg(long)]
    json: bool,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogConfig {
    /// "trace" | "debug" | "info" | "warn" | "error", or a full filter directive.
    level: String,
    /// Emit JSON structured logs instead of human-readable text.
    json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            json: false,
        }
    }
}

/// `RUST_LOG` wins over `config.level` when set.
fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Info => {
            cmd_info();
            Ok(())
        }
        Commands::Version => {
            println!("chaintask {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Inspect(args) => {
            init_tracing(&LogConfig {
                level: cli.log_level,
                json: args.json,
            });
            cmd_inspect(args)
        }
    }
}

fn cmd_info() {
    println!("ChainTask v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default crosscheck batch: {DEFAULT_BATCH_BLOCKS_COUNT} blocks");
    println!("  Default polling interval: {DEFAULT_POLLING_INTERVAL_MS} ms");
    println!("  Default delay from latest: {DEFAULT_DELAY_BLOCK_FROM_LATEST} block(s)");
    println!("  Default provider call policy: 15000 ms timeout, 3 retries");
    println!("  Default task prefixes: Task: / Done-Task: (ttl 60 s)");
    println!("  Storage backends: memory, SQLite");
}

fn read_config(path: &Path) -> anyhow::Result<CrosscheckConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let config = read_config(path)?;
    WindowPlanner::validate(&config)?;

    println!("{}: ok", path.display());
    println!("  mode:              {}", if config.is_bounded() { "bounded" } else { "continuous" });
    println!("  from_block:        {:?}", config.from_block);
    println!("  to_block:          {:?}", config.to_block);
    println!("  batch_blocks:      {}", config.batch_blocks());
    println!("  polling_interval:  {} ms", config.polling_interval().as_millis());
    println!("  delay_from_latest: {}", config.delay_block_from_latest);
    println!("  store_key_prefix:  {:?}", config.store_key_prefix);
    match config.store_ttl() {
        Some(ttl) => println!("  store_ttl:         {} ms", ttl.as_millis()),
        None => println!("  store_ttl:         never expires"),
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct Report {
    checkpoint: Option<u64>,
    cached_logs: Vec<String>,
    pending_tasks: usize,
    done_tasks: usize,
    purged: u64,
}

fn cmd_inspect(mut args: InspectArgs) -> anyhow::Result<()> {
    if let Some(path) = &args.config {
        args.prefix = read_config(path)?.store_key_prefix;
    }

    let rt = tokio::runtime::Runtime::new().context("starting runtime")?;
    let report = rt.block_on(inspect(&args))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    println!("Store: {}", args.db);
    match report.checkpoint {
        Some(block) => println!("  Checkpoint:    {block}"),
        None => println!("  Checkpoint:    (none)"),
    }
    println!("  Cached logs:   {}", report.cached_logs.len());
    for id in report.cached_logs.iter().take(20) {
        println!("    {id}");
    }
    if report.cached_logs.len() > 20 {
        println!("    ... {} more", report.cached_logs.len() - 20);
    }
    println!("  Pending tasks: {}", report.pending_tasks);
    println!("  Done tasks:    {}", report.done_tasks);
    if args.purge {
        println!("  Purged rows:   {}", report.purged);
    }
    Ok(())
}

async fn inspect(args: &InspectArgs) -> anyhow::Result<Report> {
    tracing::debug!(db = %args.db, prefix = %args.prefix, "Inspecting store");
    let store = SqliteStore::open(&args.db)
        .await
        .with_context(|| format!("opening {}", args.db))?;
    let purged = if args.purge {
        store.purge_expired().await?
    } else {
        0
    };

    let pending_tasks = store.keys(Some(&format!("{}*", args.task_prefix))).await?.len();
    let done_tasks = store.keys(Some(&format!("{}*", args.done_prefix))).await?.len();

    let store = std::sync::Arc::new(store);
    let cache = LogCache::new(store, args.prefix.clone(), None);
    let checkpoint = cache.get_checkpoint().await?;
    let cached_logs = cache
        .get_logs()
        .await
        .context("decoding cache keys (is --prefix right?)")?
        .iter()
        .map(ToString::to_string)
        .collect();

    Ok(Report {
        checkpoint,
        cached_logs,
        pending_tasks,
        done_tasks,
        purged,
    })
}
