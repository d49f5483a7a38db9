use alert_engine::{AlertMonitor, AlertRepository, AlertStore, JsonFileAlertRepository};
use clap::{Parser, Subcommand};
use core_types::{StreamMode, SymbolKey, Tick};
use events::TriggerEvent;
use indicators::IndicatorEngine;
use market_feed::FeedHub;
use ohlc_cache::OhlcCache;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// The main entry point for the tickmux market-data daemon.
#[tokio::main]
async fn main() {
    // Load environment variables (TICKMUX__FEED__API_KEY etc.) from .env.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Watch(args) => handle_watch(args).await,
        Commands::Monitor(args) => handle_monitor(args).await,
    };
    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Multiplexes one upstream market-data connection across subscribers
/// and evaluates price/indicator alerts against the live tick stream.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream live ticks for a set of symbols to stdout.
    Watch(WatchArgs),
    /// Run the alert monitor against a persisted alert file.
    Monitor(MonitorArgs),
}

#[derive(Parser)]
struct WatchArgs {
    /// Symbols to subscribe to, as SYMBOL:EXCHANGE (e.g. "SBIN:NSE").
    #[arg(long, required = true, value_delimiter = ',')]
    symbols: Vec<SymbolKey>,

    /// Stream depth: "ltp", "quote", or "full".
    #[arg(long, default_value = "ltp")]
    mode: String,
}

#[derive(Parser)]
struct MonitorArgs {
    /// Path to the persisted alert definitions.
    #[arg(long, default_value = "alerts.json")]
    alerts: PathBuf,
}

fn parse_mode(raw: &str) -> anyhow::Result<StreamMode> {
    match raw {
        "ltp" => Ok(StreamMode::Ltp),
        "quote" => Ok(StreamMode::Quote),
        "full" => Ok(StreamMode::Full),
        other => anyhow::bail!("unknown stream mode {other:?} (expected ltp, quote, or full)"),
    }
}

async fn handle_watch(args: WatchArgs) -> anyhow::Result<()> {
    let settings = configuration::load_config()?;
    let mode = parse_mode(&args.mode)?;

    let hub = FeedHub::new(settings.feed)?;
    let mut state = hub.connection_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            info!(state = ?*state.borrow(), "Connection state");
        }
    });

    let subscription = hub.subscribe(
        &args.symbols,
        mode,
        Arc::new(|tick: &Tick| {
            println!(
                "{} {} @ {}",
                tick.timestamp.format("%H:%M:%S%.3f"),
                tick.key(),
                tick.last_price
            );
        }),
    )?;

    info!(symbols = args.symbols.len(), "Watching. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    subscription.close();
    Ok(())
}

async fn handle_monitor(args: MonitorArgs) -> anyhow::Result<()> {
    let settings = configuration::load_config()?;

    let hub = Arc::new(FeedHub::new(settings.feed)?);
    let cache = Arc::new(OhlcCache::new(Duration::from_secs(settings.cache.ttl_secs)));
    let _sweeper = ohlc_cache::start_sweeper(
        Arc::clone(&cache),
        Duration::from_secs(settings.cache.sweep_secs),
    );
    let engine = Arc::new(IndicatorEngine::new(&settings.indicators));
    let repo: Arc<dyn AlertRepository> = Arc::new(JsonFileAlertRepository::new(args.alerts));
    let store = Arc::new(AlertStore::new(repo, settings.alerts.retention_hours));

    let monitor = AlertMonitor::new(hub, store, cache, engine, settings.alerts);
    let handle = monitor
        .start(Arc::new(|event: TriggerEvent| {
            match serde_json::to_string(&event) {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::error!(error = %e, "Failed to serialize a trigger event."),
            }
        }))
        .await?;

    info!("Alert monitor running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    handle.stop();
    Ok(())
}
