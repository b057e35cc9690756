//! Miner client
//!
//! Command-line front end for a yield-farming contract:
//! - Connects a local-key wallet and keeps it on the configured network
//! - Shows account and contract stats with fiat values
//! - Submits Acquire / Compound / Liquidate actions
//! - Polls state and price in watch mode

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use miner_chain::{OperationRegistry, RpcWallet, WalletProvider};
use miner_core::{
    units, ActionCoordinator, ActionOutcome, ClientConfig, FileStore, NoticeBoard,
    PollingScheduler, SessionManager, StatsRefresher, StatsSnapshot, CONFIG_ENV,
};

/// Environment variable names.
mod env {
    pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
}

#[derive(Debug, Parser)]
#[command(name = "miner", version, about = "Client for a yield-farming contract")]
struct Cli {
    /// Config file (overrides MINER_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show session, account and contract stats
    Status,
    /// Connect the wallet and remember the session
    Connect,
    /// Forget the session
    Disconnect,
    /// Buy units with an amount of the native asset
    Acquire {
        /// Amount in native units, e.g. 0.1
        amount: String,
        /// Referral address (defaults to your own)
        #[arg(long)]
        referral: Option<String>,
    },
    /// Reinvest accrued yield
    Compound {
        /// Referral address (defaults to your own)
        #[arg(long)]
        referral: Option<String>,
    },
    /// Sell accrued yield for the native asset
    Liquidate,
    /// Poll and print stats until interrupted
    Watch,
}

/// Wired components.
struct App {
    config: ClientConfig,
    session: SessionManager,
    stats: Arc<StatsRefresher>,
    actions: ActionCoordinator,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,miner_core=debug,miner_chain=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::from_env().with_context(|| format!("Failed to load {CONFIG_ENV}"))?,
    };
    config.log_config();

    let app = build(config)?;

    match cli.command {
        Command::Connect => {
            let snapshot = app.session.connect().await?;
            info!(account = ?snapshot.account, chain_id = ?snapshot.chain_id, "Wallet connected");
            app.stats.refresh_price().await;
            app.stats.refresh().await?;
            print_stats(&app.stats.snapshot());
        }
        Command::Disconnect => {
            app.session.disconnect();
            println!("Disconnected");
        }
        Command::Status => {
            let connected = resume(&app).await?;
            app.stats.refresh_price().await;
            if connected {
                app.stats.refresh().await?;
            } else {
                println!("Not connected");
            }
            print_stats(&app.stats.snapshot());
        }
        Command::Acquire { amount, referral } => {
            require_session(&app).await?;
            let outcome = app.actions.acquire(&amount, referral.as_deref()).await?;
            print_outcome(&app, &outcome);
        }
        Command::Compound { referral } => {
            require_session(&app).await?;
            let outcome = app.actions.compound(referral.as_deref()).await?;
            print_outcome(&app, &outcome);
        }
        Command::Liquidate => {
            require_session(&app).await?;
            let outcome = app.actions.liquidate().await?;
            print_outcome(&app, &outcome);
        }
        Command::Watch => watch(&app).await?,
    }

    Ok(())
}

fn build(config: ClientConfig) -> Result<App> {
    let private_key = std::env::var(env::PRIVATE_KEY)
        .map_err(|_| anyhow::anyhow!("Missing env var: {}", env::PRIVATE_KEY))?;

    let wallet = RpcWallet::new(&private_key, config.network.primary_rpc()?)?
        .with_network(config.network.to_params());
    let providers: Vec<Arc<dyn WalletProvider>> = vec![Arc::new(wallet)];

    let mut registry = OperationRegistry::builtin();
    if let Some(path) = &config.contract.operations_file {
        registry = registry.with_overrides(OperationRegistry::from_file(path)?);
        info!(path = ?path, "Candidate signature overrides loaded");
    }

    let store = Arc::new(FileStore::new(&config.storage.path));
    let session = SessionManager::new(
        providers,
        config.network.to_params(),
        config.contract.address()?,
        Arc::new(registry),
        store,
    );

    let stats = Arc::new(StatsRefresher::new(session.clone(), config.price_feed.client()));
    let notices = Arc::new(NoticeBoard::new(config.actions.notice_ttl()));
    let actions = ActionCoordinator::new(
        session.clone(),
        Arc::clone(&stats),
        notices,
        config.actions.clone(),
    );

    Ok(App {
        config,
        session,
        stats,
        actions,
    })
}

/// Restore a remembered session. Returns whether a session is active.
async fn resume(app: &App) -> Result<bool> {
    match app.session.auto_connect().await {
        Ok(Some(_)) => Ok(true),
        Ok(None) => Ok(false),
        Err(e) => {
            warn!(error = %e, "Auto-connect failed");
            Ok(false)
        }
    }
}

async fn require_session(app: &App) -> Result<()> {
    if !resume(app).await? {
        bail!("Not connected; run `miner connect` first");
    }
    Ok(())
}

async fn watch(app: &App) -> Result<()> {
    resume(app).await?;

    let handle = PollingScheduler::new(app.session.clone(), Arc::clone(&app.stats), &app.config.polling)
        .start();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(app.config.polling.state_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => print_stats(&app.stats.snapshot()),
            _ = &mut shutdown => break,
        }
    }
    info!("Shutting down");

    handle.stop();
    Ok(())
}

fn print_outcome(app: &App, outcome: &ActionOutcome) {
    println!("{} confirmed via {}", outcome.kind, outcome.candidate);
    match app.config.network.tx_url(outcome.receipt.tx_hash) {
        Some(url) => println!("  {url}"),
        None => println!("  tx {}", outcome.receipt.tx_hash),
    }
    print_stats(&app.stats.snapshot());
}

fn print_stats(stats: &StatsSnapshot) {
    println!("Price           ${:.2}", stats.price);
    println!(
        "Contract        {} ({}, {})",
        units::format_native(stats.contract.locked_balance),
        if stats.contract.initialized { "open" } else { "not started" },
        units::format_fiat(stats.contract.total_value_locked_fiat)
    );
    println!("Units           {}", units::format_count(stats.user.unit_count));
    println!(
        "Yield           {} ({} / {})",
        units::format_count(stats.user.yield_units),
        units::format_native(stats.user.yield_value),
        units::format_fiat(stats.yield_value_fiat())
    );
    if !stats.unresolved.is_empty() {
        println!("Unsupported     {}", stats.unresolved.join(", "));
    }
}
