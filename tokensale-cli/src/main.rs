//! Tokensale CLI - terminal storefront for the token sale
//!
//! Shows live sale state and drives the approve → purchase flow from a
//! local signing key.

#![allow(clippy::print_stdout, clippy::print_stderr)] // CLI program intentionally uses stdout

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokensale::config::ConfigError;
use tokensale::prelude::*;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Tokensale - buy the sale token with a stablecoin
#[derive(Parser)]
#[command(name = "tokensale")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(
        short,
        long,
        env = "TOKENSALE_CONFIG",
        default_value = "tokensale.toml",
        global = true
    )]
    config: PathBuf,

    /// Wallet private key; without it the session is read-only
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true, global = true)]
    private_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show sale and wallet state
    Status,

    /// Approve (if needed) and buy tokens
    Buy(BuyArgs),

    /// Follow sale state until interrupted
    Watch,

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the buy command
#[derive(Args)]
struct BuyArgs {
    /// Whole tokens to buy; separators like `1,000` are accepted
    #[arg(short, long, default_value = "1")]
    quantity: String,
}

/// Arguments for the config command
#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "tokensale={level},tokensale_cli={level},{}",
            if verbosity >= 2 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let config = load_config_from(&cli.config).await?.with_env()?;

    match cli.command {
        Commands::Status => cmd_status(config, cli.private_key).await,
        Commands::Buy(args) => cmd_buy(args, config, cli.private_key).await,
        Commands::Watch => cmd_watch(config, cli.private_key).await,
        Commands::Config(args) => cmd_config(&args, &config),
    }
}

/// Connect to the configured RPC endpoint.
async fn connect(config: &SaleConfig, private_key: Option<&str>) -> Result<(EvmChain, EvmClient)> {
    let rpc_url = config
        .rpc_url
        .as_deref()
        .ok_or_else(|| ConfigError::InvalidValue("rpc_url is not set".into()))?;

    let client = match private_key {
        Some(key) => EvmClient::from_private_key(key, rpc_url).await?,
        None => EvmClient::connect(rpc_url).await?,
    }
    .with_confirmation(config.receipt_poll(), config.confirmation_timeout());

    if let Some(expected) = config.chain_id.filter(|id| *id != client.chain().id()) {
        tracing::warn!(
            expected,
            actual = client.chain().id(),
            "RPC endpoint serves a different chain than configured"
        );
    }

    Ok((client.chain().clone(), client))
}

async fn orchestrator(
    config: SaleConfig,
    private_key: Option<&str>,
) -> Result<(EvmChain, Arc<PurchaseOrchestrator>)> {
    let (chain, client) = connect(&config, private_key).await?;
    let orchestrator = PurchaseOrchestrator::new(config, Arc::new(client));
    Ok((chain, Arc::new(orchestrator)))
}

/// Show status.
async fn cmd_status(config: SaleConfig, private_key: Option<String>) -> Result<()> {
    let (chain, orchestrator) = orchestrator(config, private_key.as_deref()).await?;
    orchestrator.reader().refresh().await;
    let status = orchestrator.refresh_status().await;

    println!("Tokensale Status\n");
    println!("Network: {chain}");
    print_status(&status);
    Ok(())
}

/// Approve if needed, then buy.
async fn cmd_buy(args: BuyArgs, config: SaleConfig, private_key: Option<String>) -> Result<()> {
    if private_key.is_none() {
        return Err(ChainError::NotConnected.into());
    }
    let quantity = parse_quantity_input(&args.quantity, config.max_quantity);
    let (chain, orchestrator) = orchestrator(config, private_key.as_deref()).await?;

    orchestrator.set_quantity(quantity).await;
    println!("Buying {quantity} tokens on {chain}\n");

    // At most one approval round precedes the purchase.
    for _ in 0..2 {
        match orchestrator.handle_purchase().await {
            Outcome::Approved { tx } => {
                println!("Approved: {}", tx_link(&chain, tx));
            }
            Outcome::Purchased { tx } => {
                println!("Purchased: {}", tx_link(&chain, tx));
                println!();
                print_status(&orchestrator.status());
                return Ok(());
            }
            Outcome::Busy => println!("A transaction is already in flight"),
            Outcome::Blocked(failure) | Outcome::Failed(failure) => {
                return Err(failure.into());
            }
        }
    }

    println!("Allowance is still short after approval; run the command again.");
    Ok(())
}

/// Follow sale state until Ctrl+C.
async fn cmd_watch(config: SaleConfig, private_key: Option<String>) -> Result<()> {
    let (chain, orchestrator) = orchestrator(config, private_key.as_deref()).await?;
    let mut updates = orchestrator.subscribe();
    orchestrator.start();

    println!("Watching sale on {chain}. Press Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().clone();
                print_summary(&status);
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    orchestrator.stop();
    Ok(())
}

/// Configuration management.
fn cmd_config(args: &ConfigArgs, config: &SaleConfig) -> Result<()> {
    match args.command {
        ConfigCommands::Show => {
            let content = config.to_toml()?;
            println!("{content}");
        }
        ConfigCommands::Validate => {
            let issues = config.validate();
            if issues.is_empty() {
                println!("Configuration is valid");
            }
            for issue in &issues {
                println!("{issue}");
            }
            if !config.is_valid() {
                return Err(ConfigError::InvalidValue("configuration has errors".into()).into());
            }
        }
    }
    Ok(())
}

fn tx_link(chain: &EvmChain, tx: TxHash) -> String {
    chain.tx_url(tx).unwrap_or_else(|| format!("{tx:#x}"))
}

fn or_dash(value: Option<String>) -> String {
    value.unwrap_or_else(|| "-".to_string())
}

fn print_summary(status: &PurchaseStatus) {
    let sold = status
        .progress
        .map_or_else(|| "-".to_string(), |p| format!("{:.2}%", p.percent_sold()));
    println!(
        "price {} | left {} | sold {sold}{}",
        or_dash(status.formatted_price()),
        or_dash(status.formatted_inventory()),
        if status.is_closed { " | closed" } else { "" },
    );
}

fn print_status(status: &PurchaseStatus) {
    println!();
    println!("Sale:");
    println!("  Price per token: {}", or_dash(status.formatted_price()));
    println!("  Available:       {}", or_dash(status.formatted_inventory()));
    if let Some(progress) = status.progress {
        println!("  Sold:            {:.2}%", progress.percent_sold());
    }
    println!(
        "  State:           {}",
        if status.is_closed { "closed" } else { "live" }
    );

    println!();
    println!("Wallet:");
    println!(
        "  Connected:       {}",
        if status.validation.is_connected { "yes" } else { "no" }
    );
    println!("  Balance:         {}", or_dash(status.formatted_balance()));
    println!(
        "  Allowance:       {}",
        or_dash(status.allowance.map(|v| format_amount(v, status.stablecoin_decimals)))
    );
    println!(
        "  Tokens held:     {}",
        or_dash(status.token_balance.map(|v| format_amount(v, status.token_decimals)))
    );

    println!();
    println!("Quote for {} tokens:", status.quantity);
    println!("  Total cost:      {}", or_dash(status.formatted_total_cost()));
    println!(
        "  Needs approval:  {}",
        if status.needs_approval { "yes" } else { "no" }
    );

    if let Some(message) = status.error_message() {
        println!();
        println!("error: {message}");
    }
    if let Some(message) = &status.read_error {
        println!();
        println!("read error: {message}");
    }
}
