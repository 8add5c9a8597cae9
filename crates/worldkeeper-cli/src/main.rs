//! worldkeeper - persist a game's worlds and mods between sessions.
//!
//! ## Usage
//!
//! ```bash
//! # Mirror a game data directory until Ctrl-C
//! worldkeeper run --fs ./game-data
//!
//! # Inspect and manage what is stored
//! worldkeeper stats
//! worldkeeper worlds
//! worldkeeper clear worlds
//! worldkeeper clear all --force
//!
//! # Archives
//! worldkeeper export worlds worlds.zip
//! worldkeeper import worlds worlds.zip
//! ```
//!
//! Storage is chosen by `--config <file>` (TOML) and the override flags.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use worldkeeper_core::{
    ClearArea, LocalBackend, MemoryBackend, NoticeLevel, StorageArea, StorageConfig,
    StoragePolicy, SyncEngine, VfsOps, change_channel, watch_local,
};

/// Persist a game's virtual filesystem between sessions.
#[derive(Parser, Debug)]
#[command(name = "worldkeeper")]
#[command(about = "Persist game worlds and mods between sessions")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Storage policy: no-storage, indexeddb or directory
    #[arg(long, global = true)]
    policy: Option<StoragePolicy>,

    /// SQLite database file (indexeddb policy)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Granted storage directory (directory policy)
    #[arg(long, global = true)]
    directory: Option<PathBuf>,

    /// Game root inside the virtual filesystem
    #[arg(long, global = true)]
    root: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mirror a host directory as the game filesystem until Ctrl-C
    Run {
        /// Directory holding the game's data
        #[arg(long = "fs")]
        fs_root: PathBuf,

        /// Seconds between sync passes (overrides the config file)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Show stored file counts and sizes
    Stats {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Delete stored data for an area
    Clear {
        /// worlds, mods or all
        area: ClearArea,

        /// Wipe every stored record, including anything outside the areas
        #[arg(long)]
        force: bool,
    },
    /// Write one stored area to a zip archive
    Export { area: StorageArea, output: PathBuf },
    /// Replace one stored area with the contents of a zip archive
    Import { area: StorageArea, input: PathBuf },
    /// List stored worlds
    Worlds,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = resolve_config(&cli)?;

    match cli.command {
        Command::Run { fs_root, interval } => {
            if let Some(secs) = interval {
                config.sync_interval_secs = secs;
                config.validate()?;
            }
            run(&config, &fs_root).await
        }
        Command::Stats { json } => stats(&config, json).await,
        Command::Clear { area, force } => clear(&config, area, force).await,
        Command::Export { area, output } => export(&config, area, &output).await,
        Command::Import { area, input } => import(&config, area, &input).await,
        Command::Worlds => worlds(&config).await,
    }
}

/// Config file (or defaults) with command line overrides applied.
fn resolve_config(cli: &Cli) -> Result<StorageConfig> {
    let mut config = match &cli.config {
        Some(path) => StorageConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StorageConfig::default(),
    };
    if let Some(policy) = cli.policy {
        config.policy = policy;
    }
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    if let Some(directory) = &cli.directory {
        config.directory = Some(directory.clone());
    }
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    config.validate().context("invalid storage configuration")?;
    Ok(config)
}

/// Engine over a scratch in-memory filesystem, for the management commands.
async fn open_engine(config: &StorageConfig) -> Result<SyncEngine> {
    if config.policy == StoragePolicy::NoStorage {
        bail!("storage policy is no-storage; nothing is persisted");
    }
    let vfs: Arc<dyn VfsOps> = Arc::new(MemoryBackend::new());
    let engine = SyncEngine::new(config.layout(), vfs);
    engine
        .initialize(config)
        .await
        .with_context(|| format!("opening {} storage", config.policy))?;
    Ok(engine)
}

async fn run(config: &StorageConfig, fs_root: &Path) -> Result<()> {
    tokio::fs::create_dir_all(fs_root)
        .await
        .with_context(|| format!("creating {}", fs_root.display()))?;
    let local = LocalBackend::new(fs_root);
    let engine = SyncEngine::new(config.layout(), Arc::new(local.clone()));

    let mut notices = engine.notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            match notice.level {
                NoticeLevel::Info => tracing::info!(notice = %notice.message),
                NoticeLevel::Warning => tracing::warn!(notice = %notice.message),
                NoticeLevel::Error => tracing::error!(notice = %notice.message),
            }
        }
    });

    // Keep playing without persistence when storage cannot be opened
    if let Err(e) = engine.initialize(config).await {
        tracing::warn!(error = %e, "storage unavailable, running without persistence");
    }

    // Start watching after the initial load so restored files are not echoed
    let (tx, rx) = change_channel();
    let watcher = watch_local(&local, tx).context("starting filesystem watcher")?;
    let listener = engine.spawn_change_listener(rx);

    engine.start_periodic(config.sync_interval()).await?;
    tracing::info!(
        fs = %local.root().display(),
        policy = %engine.policy(),
        "worldkeeper running, Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("shutting down");

    watcher.stop();
    let result = engine.teardown().await;
    listener.abort();

    if let Some(report) = result? {
        tracing::info!(summary = %report.summary(), "final sync");
    }
    print_stats(&engine.refresh_stats().await.formatted());
    print_metrics(&engine.metrics());
    Ok(())
}

fn print_metrics(metrics: &worldkeeper_core::SyncMetrics) {
    println!(
        "passes: {} (average {} ms)",
        metrics.sync_count,
        metrics.average_duration().as_millis()
    );
}

async fn stats(config: &StorageConfig, json: bool) -> Result<()> {
    let engine = open_engine(config).await?;
    let stats = engine.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats(&stats.formatted());
    }
    Ok(())
}

fn print_stats(formatted: &worldkeeper_core::FormattedStats) {
    println!("worlds: {}", formatted.worlds);
    println!("mods:   {}", formatted.mods);
    println!("total:  {}", formatted.total);
}

async fn clear(config: &StorageConfig, area: ClearArea, force: bool) -> Result<()> {
    let engine = open_engine(config).await?;
    if force {
        engine.force_clear_storage().await?;
        println!("all stored data removed");
    } else {
        engine.clear_storage(area).await?;
        println!("cleared {area}");
    }
    Ok(())
}

async fn export(config: &StorageConfig, area: StorageArea, output: &Path) -> Result<()> {
    let engine = open_engine(config).await?;
    let bytes = engine.export_area(area).await?;
    tokio::fs::write(output, &bytes)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    println!("exported {area} to {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}

async fn import(config: &StorageConfig, area: StorageArea, input: &Path) -> Result<()> {
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    let engine = open_engine(config).await?;
    let restored = engine.import_area(area, bytes).await?;
    println!("imported {restored} files into {area}");
    Ok(())
}

async fn worlds(config: &StorageConfig) -> Result<()> {
    let engine = open_engine(config).await?;
    for world in engine.list_worlds().await? {
        println!("{world}");
    }
    Ok(())
}
