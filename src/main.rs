//! FLUX wallet CLI
//!
//! Command-line front end for the wallet orchestrator: balances, prices,
//! buy/sell, transfers, staking, and history.

use clap::{Parser, Subcommand};
use flux_wallet::aggregator::AggregatorClient;
use flux_wallet::balances::{BalanceTracker, IndexerClient};
use flux_wallet::chain::EvmClient;
use flux_wallet::config::WALLET_KEY_ENV;
use flux_wallet::history::{Direction, HistoryClient};
use flux_wallet::prices::PriceOracle;
use flux_wallet::staking::{self, StakeOrchestrator};
use flux_wallet::store::{FileStore, KvStore, MemoryStore};
use flux_wallet::swap::send_transfer;
use flux_wallet::tokens::{self, FLUX, FORGE, NATIVE};
use flux_wallet::wallet::LocalWallet;
use flux_wallet::{Config, Error, Result, SettleOutcome, SwapOrchestrator};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "flux-wallet")]
#[command(about = "Swap and staking orchestrator for the FLUX token economy on Base")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show balances, staked position, and fiat values
    Overview,

    /// Refresh and show the current price set
    Prices,

    /// Buy FLUX with native ETH
    Buy {
        /// ETH amount to spend
        #[arg(long)]
        amount: String,

        /// Slippage tolerance in percent
        #[arg(long)]
        slippage: Option<f64>,
    },

    /// Sell FLUX for native ETH
    Sell {
        /// FLUX amount to sell
        #[arg(long)]
        amount: String,

        /// Slippage tolerance in percent
        #[arg(long)]
        slippage: Option<f64>,
    },

    /// Send tokens to another address
    Send {
        /// Token symbol (FLUX, FORGE, ETH)
        #[arg(long)]
        token: String,

        /// Recipient address
        #[arg(long)]
        to: String,

        /// Amount in display units
        #[arg(long)]
        amount: String,
    },

    /// Stake FORGE to accrue FLUX rewards
    Stake {
        /// Whole FORGE tokens to stake (minimum 1)
        #[arg(long)]
        amount: u64,
    },

    /// Unstake the entire FORGE position
    Unstake,

    /// Claim all accrued FLUX reward
    Claim,

    /// Show recent transactions
    History {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = if let Some(config_path) = cli.config {
        let content =
            std::fs::read_to_string(&config_path).map_err(|e| Error::Config(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| Error::Config(e.to_string()))?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Overview => run_overview(&config).await?,
        Commands::Prices => run_prices(&config).await?,
        Commands::Buy { amount, slippage } => {
            run_swap(&config, SwapSide::Buy, &amount, slippage).await?
        }
        Commands::Sell { amount, slippage } => {
            run_swap(&config, SwapSide::Sell, &amount, slippage).await?
        }
        Commands::Send { token, to, amount } => run_send(&config, &token, &to, &amount).await?,
        Commands::Stake { amount } => run_stake(&config, amount).await?,
        Commands::Unstake => run_unstake(&config).await?,
        Commands::Claim => run_claim(&config).await?,
        Commands::History { limit } => run_history(&config, limit).await?,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config).map_err(Error::from)?);
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Arc<dyn KvStore> {
    match &config.cache_path {
        Some(path) => Arc::new(FileStore::open(path)),
        None => Arc::new(MemoryStore::new()),
    }
}

fn load_wallet() -> Result<LocalWallet> {
    LocalWallet::from_env(WALLET_KEY_ENV)
}

fn report_outcome(operation: &str, outcome: SettleOutcome) {
    match outcome {
        SettleOutcome::Verified => {
            println!("{} confirmed: balance change verified on chain", operation);
        }
        SettleOutcome::Unverified => {
            // degraded success, deliberately distinct from the verified path
            println!(
                "{} submitted, but the balance change could not be verified yet. \
                 The transaction may still settle; check your balances shortly.",
                operation
            );
        }
    }
}

async fn run_overview(config: &Config) -> Result<()> {
    let wallet = load_wallet()?;
    let account = wallet.address();
    let chain = EvmClient::new(&config.endpoints.rpc_url, &wallet)?;

    let tracker = BalanceTracker::new(
        IndexerClient::new(config),
        account,
        vec![NATIVE, FLUX, FORGE],
    );
    tracker.refresh().await;

    println!("account {}", account);
    for token in [&NATIVE, &FLUX, &FORGE] {
        let display = tracker
            .snapshot(token)
            .map(|s| s.display)
            .unwrap_or_else(|| "unknown".to_string());
        println!("  {:<6} {}", token.symbol, display);
    }

    let mut stake_view = StakeOrchestrator::new(chain, IndexerClient::new(config), account);
    let overview = *stake_view.refresh().await;
    println!(
        "  staked {} FORGE (rewards {} FLUX accrued)",
        overview.user.staked,
        FLUX.format_raw(overview.user.claimable_raw)
    );

    let oracle = PriceOracle::new(AggregatorClient::new(config), open_store(config));
    let prices = oracle.refresh().await;
    if let Some(snapshot) = tracker.snapshot(&FLUX) {
        let amount = tokens::units_to_f64(snapshot.raw, FLUX.decimals);
        println!(
            "  FLUX value ~{:.2} EUR ({:.4} EUR each)",
            amount * prices.utility_fiat,
            prices.utility_fiat
        );
    }
    if let Some(reason) = prices.degraded {
        println!("  (price estimate degraded: {})", reason);
    }
    Ok(())
}

async fn run_prices(config: &Config) -> Result<()> {
    let oracle = PriceOracle::new(AggregatorClient::new(config), open_store(config));
    let prices = oracle.refresh().await;
    println!("ETH/EUR        {:.2}", prices.gas_fiat);
    println!("FLUX per ETH   {:.2}", prices.utility_per_gas);
    println!("FLUX/EUR       {:.4}", prices.utility_fiat);
    if let Some(reason) = prices.degraded {
        println!("degraded: {}", reason);
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum SwapSide {
    Buy,
    Sell,
}

async fn run_swap(
    config: &Config,
    side: SwapSide,
    amount: &str,
    slippage: Option<f64>,
) -> Result<()> {
    let wallet = load_wallet()?;
    let account = wallet.address();
    let chain = EvmClient::new(&config.endpoints.rpc_url, &wallet)?;
    let dex = AggregatorClient::new(config);
    let balances = IndexerClient::new(config);
    let slippage = slippage.unwrap_or(config.default_slippage_pct);

    let (mut orchestrator, operation) = match side {
        SwapSide::Buy => (
            SwapOrchestrator::buy(chain, dex, balances, account),
            "purchase",
        ),
        SwapSide::Sell => (
            SwapOrchestrator::sell(chain, dex, balances, account),
            "sale",
        ),
    };

    orchestrator.fetch_quote(amount, slippage).await?;
    if let Some(quote) = orchestrator.quote() {
        let (out_token, out_display) = match side {
            SwapSide::Buy => (&FLUX, FLUX.format_raw(quote.out_amount)),
            SwapSide::Sell => (&NATIVE, NATIVE.format_raw(quote.out_amount)),
        };
        println!("quote: receive {} {}", out_display, out_token.symbol);
    }

    if orchestrator.needs_approval() {
        println!("authorizing the aggregator router to spend FLUX...");
        orchestrator.approve().await?;
    }

    let outcome = orchestrator.execute().await?;
    report_outcome(operation, outcome);
    Ok(())
}

async fn run_send(config: &Config, token: &str, to: &str, amount: &str) -> Result<()> {
    let token = tokens::by_symbol(token)
        .ok_or_else(|| Error::InvalidArgument(format!("unknown token: {}", token)))?;
    let recipient = alloy::primitives::Address::from_str(to)
        .map_err(|e| Error::InvalidArgument(format!("invalid recipient address: {}", e)))?;

    let wallet = load_wallet()?;
    let chain = EvmClient::new(&config.endpoints.rpc_url, &wallet)?;
    let balances = IndexerClient::new(config);

    let outcome = send_transfer(
        &chain,
        &balances,
        wallet.address(),
        token,
        recipient,
        amount,
    )
    .await?;
    report_outcome("transfer", outcome);
    Ok(())
}

async fn run_stake(config: &Config, amount: u64) -> Result<()> {
    let wallet = load_wallet()?;
    let chain = EvmClient::new(&config.endpoints.rpc_url, &wallet)?;
    let mut orchestrator = StakeOrchestrator::new(chain, IndexerClient::new(config), wallet.address());

    let overview = *orchestrator.refresh().await;
    let rate = overview.status.reward_rate;
    println!(
        "staking {} FORGE at stage {} ({}% weekly): preview {:.2} FLUX per week",
        amount,
        overview.status.stage,
        staking::format_rate(rate),
        staking::weekly_reward(amount, rate)
    );
    if let Some(secs) =
        staking::seconds_until_min_claim(amount, rate, tokens::units_to_f64(overview.min_claim_raw, FLUX.decimals))
    {
        println!(
            "first claim reachable in about {}",
            staking::format_countdown(secs as u64)
        );
    }

    let outcome = orchestrator.stake(amount).await?;
    report_outcome("stake", outcome);
    Ok(())
}

async fn run_unstake(config: &Config) -> Result<()> {
    let wallet = load_wallet()?;
    let chain = EvmClient::new(&config.endpoints.rpc_url, &wallet)?;
    let mut orchestrator = StakeOrchestrator::new(chain, IndexerClient::new(config), wallet.address());

    let outcome = orchestrator.unstake().await?;
    report_outcome("unstake", outcome);
    Ok(())
}

async fn run_claim(config: &Config) -> Result<()> {
    let wallet = load_wallet()?;
    let chain = EvmClient::new(&config.endpoints.rpc_url, &wallet)?;
    let mut orchestrator = StakeOrchestrator::new(chain, IndexerClient::new(config), wallet.address());

    let claimable = orchestrator.refresh().await.user.claimable_raw;
    println!("claiming {} FLUX", FLUX.format_raw(claimable));

    let outcome = orchestrator.claim().await?;
    report_outcome("claim", outcome);
    Ok(())
}

async fn run_history(config: &Config, limit: u32) -> Result<()> {
    let wallet = load_wallet()?;
    let client = HistoryClient::new(config);
    let entries = client.recent(wallet.address(), limit).await?;

    if entries.is_empty() {
        println!("no transactions found");
        return Ok(());
    }
    for entry in entries {
        let direction = match entry.direction {
            Direction::Sent => "sent    ->",
            Direction::Received => "received <-",
        };
        let when = chrono::DateTime::from_timestamp_millis(entry.timestamp_ms)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown time".to_string());
        let status = if entry.success { "" } else { " [failed]" };
        println!(
            "{} {} {} ({} ETH) {}{}",
            when,
            direction,
            entry.counterparty,
            NATIVE.format_raw(entry.value_wei),
            entry.hash,
            status
        );
    }
    Ok(())
}
