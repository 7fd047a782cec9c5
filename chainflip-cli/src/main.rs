mod commands;
mod config;

use chainflip_core::{Address, Chain, ChainFlipClient, ChainFlipError, Session};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chainflip")]
#[command(about = "ChainFlip - peer-to-peer coin-flip wagers")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Chain name or id (amoy, sepolia, bnb-testnet, anvil)
    #[arg(long, global = true)]
    chain: Option<Chain>,

    /// JSON-RPC endpoint
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    /// ChainFlip contract address
    #[arg(long, global = true)]
    contract: Option<Address>,

    /// Account to act as (falls back to CHAINFLIP_ACCOUNT)
    #[arg(short, long, global = true)]
    account: Option<Address>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match listing, creation, joining and canceling
    #[command(subcommand)]
    Match(commands::MatchCommands),

    /// Your stats, games and refunds
    #[command(subcommand)]
    Player(commands::PlayerCommands),

    /// Top winners across all matches
    Leaderboard {
        /// Number of entries to show
        #[arg(short, long, default_value_t = 10)]
        top: usize,
    },

    /// Owner-only protocol administration
    #[command(subcommand)]
    Admin(commands::AdminCommands),

    /// Follow contract events and keep the views in sync
    Watch,

    /// Show or write the client configuration
    #[command(subcommand)]
    Config(commands::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "chainflip={},chainflip_core={}",
            log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let overrides = config::Overrides {
        path: cli.config.clone(),
        chain: cli.chain,
        rpc_url: cli.rpc_url.clone(),
        contract: cli.contract,
    };

    let result = run(cli, overrides).await;

    if let Err(e) = result {
        match e.downcast_ref::<ChainFlipError>() {
            Some(ChainFlipError::NoAccount) => {
                eprintln!("Error: No account selected");
                eprintln!("Pass --account <address> or set CHAINFLIP_ACCOUNT");
            }
            Some(ChainFlipError::AlreadyPending(key)) => {
                eprintln!("Error: A {} transaction is already in flight", key);
            }
            Some(ChainFlipError::BetTooLow { minimum, offered }) => {
                eprintln!("Error: Bet below the minimum");
                eprintln!(
                    "Minimum: {}, Offered: {}",
                    chainflip_core::Wei::from_wei(*minimum),
                    chainflip_core::Wei::from_wei(*offered)
                );
            }
            Some(ChainFlipError::Rejected(reason)) => {
                eprintln!("Transaction rejected: {}", reason);
            }
            Some(ChainFlipError::Reverted(reason)) => {
                eprintln!("Transaction reverted: {}", reason);
            }
            _ => {
                eprintln!("Error: {:#}", e);
            }
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli, overrides: config::Overrides) -> anyhow::Result<()> {
    let command = match cli.command {
        Commands::Config(cmd) => return commands::handle_config_command(cmd, &overrides).await,
        other => other,
    };

    let client_config = config::resolve(&overrides).await?;
    let mut session = Session::new(client_config.chain);
    if let Some(account) = config::account(cli.account)? {
        session = session.with_account(account);
    }
    let client = ChainFlipClient::connect(client_config)?;

    match command {
        Commands::Match(cmd) => commands::handle_match_command(cmd, &client, &session).await,
        Commands::Player(cmd) => commands::handle_player_command(cmd, &client, &session).await,
        Commands::Leaderboard { top } => commands::show_leaderboard(&client, &session, top).await,
        Commands::Admin(cmd) => commands::handle_admin_command(cmd, &client, &session).await,
        Commands::Watch => commands::watch(&client, &session).await,
        Commands::Config(_) => Ok(()),
    }
}
