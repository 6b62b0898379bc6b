//! Dirsnap CLI
//!
//! Run with: dirsnap [run|restore|view]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dirsnap::config::expand_path;
use dirsnap::store::S3Backend;
use dirsnap::{snapshot_prefix, BackupEngine, Config, DirsnapError, Tier};

#[derive(Parser, Debug)]
#[command(name = "dirsnap")]
#[command(about = "Tiered directory snapshots on S3-compatible storage")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(
        long,
        global = true,
        env = "DIRSNAP_CONFIG",
        default_value = "~/.config/dirsnap/config.toml"
    )]
    config: String,

    /// Object store endpoint URL
    #[arg(long, global = true, env = "DIRSNAP_ENDPOINT")]
    endpoint: Option<String>,

    /// Object store region
    #[arg(long, global = true, env = "DIRSNAP_REGION")]
    region: Option<String>,

    #[arg(long, global = true, env = "DIRSNAP_ACCESS_KEY", hide_env_values = true)]
    access_key: Option<String>,

    #[arg(long, global = true, env = "DIRSNAP_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Back up configured directories now and then on every interval (default)
    Run,
    /// Download a snapshot into a local directory
    Restore {
        /// Directory to restore into
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        bucket: String,
        /// Backup prefix the snapshot was taken under
        #[arg(long)]
        key: String,
        /// daily, weekly or monthly
        #[arg(long)]
        rotation: Tier,
        /// Snapshot date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,
    },
    /// Print the snapshots held in a bucket
    View {
        #[arg(long)]
        bucket: String,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
        }))
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let path = expand_path(&cli.config);
    let mut config = if path.exists() {
        Config::load(&path).with_context(|| format!("loading {}", path.display()))?
    } else {
        tracing::warn!("No config file at {}, using defaults", path.display());
        Config::default()
    };

    let remote = &mut config.remote;
    for (value, slot) in [
        (&cli.endpoint, &mut remote.endpoint),
        (&cli.region, &mut remote.region),
        (&cli.access_key, &mut remote.access_key),
        (&cli.secret_key, &mut remote.secret_key),
    ] {
        if value.is_some() {
            slot.clone_from(value);
        }
    }
    Ok(config)
}

async fn run(engine: BackupEngine, config: Config) -> anyhow::Result<()> {
    if !config.dirbackup.enabled {
        tracing::info!("Directory backup is disabled");
        return Ok(());
    }
    if config.targets()?.is_empty() {
        bail!("no directories to back up");
    }

    let engine = Arc::new(engine);
    let config = Arc::new(config);
    let period = Duration::from_secs(config.dirbackup.seconds_interval);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tracing::info!("Backing up every {}s", period.as_secs());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let engine = engine.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    let targets = match config.targets() {
                        Ok(targets) => targets,
                        Err(e) => {
                            tracing::error!("Invalid directory configuration: {}", e);
                            return;
                        }
                    };
                    match engine.run_backup(&targets, &config.retention()).await {
                        Ok(_) => {}
                        Err(DirsnapError::AlreadyRunning) => {
                            tracing::warn!("Previous backup still running, skipping this interval");
                        }
                        Err(e) => tracing::error!("Backup run failed: {}", e),
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config = load_config(&cli)?;
    let backend = S3Backend::connect(&config.remote)
        .await
        .context("connecting to object store")?;
    let engine = BackupEngine::new(Arc::new(backend))
        .with_ignore(config.ignore_set()?)
        .with_options(config.engine_options());

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(engine, config).await,
        Commands::Restore {
            dir,
            bucket,
            key,
            rotation,
            date,
        } => {
            if bucket.trim().is_empty() || key.trim().is_empty() {
                bail!("--bucket and --key must not be empty");
            }
            let snapshot = snapshot_prefix(key.trim_matches('/'), rotation, date);
            let report = engine.restore(&dir, &bucket, &snapshot).await?;
            if report.failed > 0 || report.listing_errors > 0 {
                bail!(
                    "restore incomplete: {} failed, {} listing errors",
                    report.failed,
                    report.listing_errors
                );
            }
            Ok(())
        }
        Commands::View { bucket } => {
            let catalog = engine.catalog(&bucket).await?;
            println!("{}", catalog.to_pretty_json()?);
            Ok(())
        }
    }
}
