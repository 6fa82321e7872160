//! # Ratewatch: hotel rate watcher
//!
//! Runs precision-scheduled batches of price observations through browser
//! tabs driven by a connected agent, and reports each price to the backend.
//!
//! Usage:
//!   ratewatch serve                      # Start scheduler + gateway
//!   ratewatch status                     # Print the persisted batch state
//!   ratewatch alarms                     # Print the next alarm anchors
//!   ratewatch hotels import hotels.json  # Replace the stored hotel list
//!   ratewatch config show                # Print the effective config

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ratewatch_core::config::StoreBackend;
use ratewatch_core::traits::store::keys;
use ratewatch_core::traits::{Clock, StateStore, StateStoreExt, SystemClock};
use ratewatch_core::{BatchSnapshot, Hotel, RatewatchConfig, SchedulerState};
use ratewatch_gateway::{AppState, UnitBridge};
use ratewatch_orchestrator::{Collaborators, Orchestrator};
use ratewatch_scheduler::{HttpReporter, JsonFileStore, PrecisionScheduler, SqliteStore, TokioAlarms};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ratewatch", version, about = "🏨 Ratewatch: precision-scheduled hotel rate collection")]
struct Cli {
    /// Config file (default: ~/.ratewatch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler and the gateway
    Serve {
        /// Override the gateway port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the persisted batch state
    Status,
    /// Print the next hourly/daily anchors
    Alarms,
    /// Manage the stored hotel list
    Hotels {
        #[command(subcommand)]
        action: HotelsAction,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum HotelsAction {
    /// Replace the hotel list with a JSON array from a file
    Import { file: PathBuf },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

fn load_config(path: Option<&str>) -> Result<RatewatchConfig> {
    let config = match path {
        Some(p) => RatewatchConfig::load_from(&PathBuf::from(shellexpand::tilde(p).to_string()))?,
        None => RatewatchConfig::load()?,
    };
    Ok(config)
}

fn open_store(config: &RatewatchConfig) -> Result<Arc<dyn StateStore>> {
    let path = config.store.resolved_path();
    let store: Arc<dyn StateStore> = match config.store.backend {
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(&path)?),
        StoreBackend::Json => Arc::new(JsonFileStore::open(&path)?),
    };
    tracing::debug!("💾 State store: {:?} at {}", config.store.backend, path.display());
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "ratewatch=debug,ratewatch_core=debug,ratewatch_orchestrator=debug,ratewatch_scheduler=debug,ratewatch_gateway=debug,tower_http=debug"
    } else {
        "ratewatch=info,ratewatch_orchestrator=info,ratewatch_scheduler=info,ratewatch_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            serve(config).await
        }
        Command::Status => {
            let store = open_store(&config)?;
            match store.get_as::<BatchSnapshot>(keys::BATCH_STATE)? {
                Some(snapshot) => {
                    println!("📦 Batch #{}: {}", snapshot.batch_id, snapshot.status);
                    println!("   Progress: {}/{}", snapshot.current, snapshot.total);
                    println!("   In flight: {}", snapshot.in_flight);
                    if let Some(reason) = &snapshot.pause_reason {
                        println!("   Pause reason: {reason}");
                    }
                    for obs in snapshot.results.iter().take(10) {
                        println!("   {} {} {}: {:?}", obs.date, obs.kind, obs.hotel_name, obs.price);
                    }
                }
                None => println!("No batch has run yet."),
            }
            Ok(())
        }
        Command::Alarms => {
            let now = SystemClock.now();
            println!("⏰ Now:         {now}");
            println!("   Next hourly: {}", ratewatch_scheduler::anchors::next_hourly(now));
            println!(
                "   Next daily:  {}",
                ratewatch_scheduler::anchors::next_daily(now, config.scheduler.daily_hour)
            );
            let store = open_store(&config)?;
            if let Some(state) = store.get_as::<SchedulerState>(keys::SCHEDULER_STATE)? {
                println!("   Active hours: {:?}", state.active_hours);
                println!("   Future window: days {}..={}", state.min_days_offset, state.max_days_offset);
            }
            Ok(())
        }
        Command::Hotels {
            action: HotelsAction::Import { file },
        } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            let hotels: Vec<Hotel> = serde_json::from_value(value.clone())
                .context("Hotel list must be a JSON array of hotels")?;
            let active = ratewatch_core::types::active_unique(&hotels).len();
            let store = open_store(&config)?;
            store.set(keys::HOTELS, value)?;
            println!("🏨 Imported {} hotels ({active} active, unique)", hotels.len());
            Ok(())
        }
        Command::Config {
            action: ConfigAction::Show,
        } => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn serve(config: RatewatchConfig) -> Result<()> {
    println!("🏨 Ratewatch v{}", env!("CARGO_PKG_VERSION"));

    let store = open_store(&config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (alarms, wake) = TokioAlarms::new(clock.clone());
    let bridge = Arc::new(UnitBridge::new());
    let reporter = Arc::new(HttpReporter::new(&config.backend).with_store(store.clone()));

    let orchestrator = Orchestrator::new(
        &config,
        Collaborators {
            units: bridge.clone(),
            store: store.clone(),
            alarms: alarms.clone(),
            clock: clock.clone(),
            reporter: Some(reporter),
        },
    );
    if orchestrator.hydrate() {
        tracing::info!("🔄 Resumed interrupted batch, waiting for the unit agent");
    }

    let scheduler = Arc::new(PrecisionScheduler::new(
        config.scheduler.clone(),
        orchestrator.clone(),
        store,
        alarms,
        clock,
    ));
    scheduler.arm()?;
    tokio::spawn(ratewatch_scheduler::run_alarm_loop(scheduler.clone(), wake));

    let state = AppState {
        gateway_config: config.gateway.clone(),
        orchestrator,
        scheduler,
        bridge,
        start_time: std::time::Instant::now(),
    };
    ratewatch_gateway::start(state).await
}
