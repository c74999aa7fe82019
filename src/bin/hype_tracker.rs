use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use hype_tracker::api::HyperliquidClient;
use hype_tracker::config::{AppConfig, CONFIG_PATH};
use hype_tracker::kv::FileStore;
use hype_tracker::metrics::MetricsCalculator;
use hype_tracker::poller::{Poller, PollerHandle};
use hype_tracker::reporter;
use hype_tracker::store::TrackerStore;
use hype_tracker::types::WalletId;

#[derive(Parser)]
#[command(name = "hype-tracker", about = "Track HYPE unstaking and sell pressure across wallets")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a config file with the default settings
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
    /// Start tracking an address
    Add {
        /// 0x-prefixed 40-hex-char address
        address: String,
        /// Display label (defaults to the shortened address)
        #[arg(long, default_value = "")]
        label: String,
    },
    /// Stop tracking a wallet (by id or address)
    Remove { wallet: String },
    /// Change a wallet's label
    Label { wallet: String, label: String },
    /// Restart sell tracking from the wallet's last known balance
    Reset { wallet: String },
    /// Print tracked wallets
    List,
    /// Fetch every wallet once and print reports
    Refresh,
    /// Poll continuously, printing reports each cycle. Ctrl+C to stop.
    Watch,
}

fn resolve(store: &TrackerStore, wallet: &str) -> Result<WalletId> {
    store
        .find(wallet)
        .map(|w| w.id)
        .with_context(|| format!("no tracked wallet matches {wallet:?}"))
}

fn start_poller(
    config: &AppConfig,
    store: TrackerStore,
    kv: FileStore,
    reports_tx: mpsc::UnboundedSender<Vec<hype_tracker::types::WalletReport>>,
) -> Result<PollerHandle> {
    let settings = &config.settings;
    let client = HyperliquidClient::new(&config.endpoints, &config.staking, settings.request_timeout())?;
    let calculator = MetricsCalculator::new(&settings.tracked_coin, settings.sell_window());
    Ok(Poller::new(
        store,
        kv,
        client,
        calculator,
        &settings.tracked_coin,
        settings.poll_interval(),
    )
    .with_reports(reports_tx)
    .start())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Command::Init { force } = cli.command {
        if cli.config.exists() && !force {
            anyhow::bail!("{} already exists; pass --force to overwrite", cli.config.display());
        }
        AppConfig::default().save(&cli.config)?;
        info!("Wrote default config to {}", cli.config.display());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)?;
    let settings = &config.settings;

    let mut kv = FileStore::open(&settings.store_dir)?;
    // Everything but `list` writes the store; a running `watch` would
    // otherwise overwrite these edits with its next save.
    let _lock = match cli.command {
        Command::List => None,
        _ => Some(kv.lock()?),
    };
    let mut store = TrackerStore::load(&kv)?;

    match cli.command {
        Command::Init { .. } => unreachable!("handled before the store is opened"),
        Command::Add { address, label } => {
            let wallet = store.add_wallet(&address, &label)?;
            store.save(&mut kv)?;
            reporter::report_wallets(std::slice::from_ref(&wallet));
        }
        Command::Remove { wallet } => {
            let id = resolve(&store, &wallet)?;
            store.delete_wallet(id)?;
            store.save(&mut kv)?;
        }
        Command::Label { wallet, label } => {
            let id = resolve(&store, &wallet)?;
            store.update_label(id, &label)?;
            store.save(&mut kv)?;
        }
        Command::Reset { wallet } => {
            let id = resolve(&store, &wallet)?;
            let episode = store.reset_tracking(id, Utc::now())?;
            store.save(&mut kv)?;
            reporter::report_episode(&episode);
        }
        Command::List => {
            let calculator = MetricsCalculator::new(&settings.tracked_coin, settings.sell_window());
            reporter::report_cycle(&store.reports(&calculator, Utc::now()));
        }
        Command::Refresh => {
            if store.wallets().is_empty() {
                warn!("No wallets tracked; add one with `hype-tracker add <address>`");
                return Ok(());
            }
            let (tx, mut rx) = mpsc::unbounded_channel();
            let handle = start_poller(&config, store, kv, tx)?;
            // The poller refreshes once on start.
            if let Some(reports) = rx.recv().await {
                reporter::report_cycle(&reports);
            }
            handle.stop().await?;
        }
        Command::Watch => {
            info!(
                "Watching {} wallet(s) every {}s (sell window {}s). Press Ctrl+C to stop.",
                store.wallets().len(),
                settings.poll_interval_secs,
                settings.sell_window_secs,
            );
            let (tx, mut rx) = mpsc::unbounded_channel();
            let handle = start_poller(&config, store, kv, tx)?;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown signal received");
                        break;
                    }
                    reports = rx.recv() => {
                        match reports {
                            Some(reports) => reporter::report_cycle(&reports),
                            None => break,
                        }
                    }
                }
            }
            handle.stop().await?;
        }
    }

    Ok(())
}
