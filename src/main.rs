/// DiamondChain RewardBot - Main entry point
///
/// This file contains the main function and serves as the entry point
/// for the DiamondChain RewardBot service.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};

use rewardbot::chain_adapters::{ChainClient, EvmAdapter};
use rewardbot::config::{initialize_default_config, ConfigManager};
use rewardbot::sources::parse_owner_address;
use rewardbot::{greeting, init_api_server, init_logging, metric, RewardService};

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config/rewardbot.yaml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Subcommands
#[derive(Subcommand)]
enum Commands {
    /// Generate default configuration
    Init,

    /// Run the service
    Run,

    /// Fetch and print the reward summary for an owner address
    Rewards {
        /// Owner address (0x-prefixed)
        #[arg(short, long)]
        address: String,

        /// Chain ID to query
        #[arg(short = 'i', long)]
        chain_id: u32,
    },

    /// Test a connection to the specified chain
    TestChain {
        /// Chain ID to test
        #[arg(short = 'i', long)]
        chain_id: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging; the guard flushes the file appender on exit
    let _log_guard = init_logging(&cli.log_level)?;

    // Show greeting
    println!("{}", greeting());

    // Create config manager
    let config_manager = Arc::new(ConfigManager::new(&cli.config));

    // Process commands
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Init => {
            init_config(config_manager).await?;
        }
        Commands::Run => {
            run_service(config_manager).await?;
        }
        Commands::Rewards { address, chain_id } => {
            print_rewards(config_manager, &address, chain_id).await?;
        }
        Commands::TestChain { chain_id } => {
            test_chain_connection(config_manager, chain_id).await?;
        }
    }

    Ok(())
}

/// Initialize configuration with defaults
async fn init_config(config_manager: Arc<ConfigManager>) -> Result<()> {
    info!(
        "Initializing default configuration at {}",
        config_manager.config_path
    );

    let default_config = initialize_default_config();
    config_manager.update_config(default_config).await?;

    info!("Default configuration generated successfully");
    info!("You can now edit the configuration file and run the service");

    Ok(())
}

/// Run the reward reconciliation service
async fn run_service(config_manager: Arc<ConfigManager>) -> Result<()> {
    // Load configuration
    config_manager.load().await?;
    let config = config_manager.get_config().await;

    // Install the metrics recorder before any component records
    if config.general.enable_metrics {
        metric::init_metrics()?;
    }

    // Build and start the service
    let service = Arc::new(RewardService::from_config(config_manager).await?);
    service.start().await?;

    // Status API
    init_api_server(service.clone(), &config.status).await?;

    info!("Service started successfully");

    // Wait for shutdown signal
    wait_for_shutdown().await;

    // Stop the service
    service.stop().await;

    info!("Service stopped successfully");
    Ok(())
}

/// Fetch and print the reward summary for one owner
async fn print_rewards(
    config_manager: Arc<ConfigManager>,
    address: &str,
    chain_id: u32,
) -> Result<()> {
    config_manager.load().await?;

    let owner = parse_owner_address(address).context("Invalid owner address")?;
    let service = RewardService::from_config(config_manager).await?;

    let summary = service
        .get_reward_summary(owner, chain_id)
        .await
        .with_context(|| format!("Failed to fetch rewards on chain {}", chain_id))?;

    println!(
        "Rewards for {} on chain {}:",
        address, chain_id
    );
    println!("  pending:  {}", rewardbot::format_amount(&summary.total_pending));
    println!("  claimed:  {}", rewardbot::format_amount(&summary.total_claimed));
    for bundle in &summary.claimable_bundles {
        println!(
            "  claimable bundle on chain {}: {} across {} records",
            bundle.chain_id,
            rewardbot::format_amount(&bundle.total_amount),
            bundle.record_ids.len()
        );
    }

    Ok(())
}

/// Test chain connection
async fn test_chain_connection(config_manager: Arc<ConfigManager>, chain_id: u32) -> Result<()> {
    // Load configuration
    config_manager.load().await?;

    // Get chain configuration
    let chain_config = config_manager
        .get_chain_config(chain_id)
        .await
        .context(format!("Chain ID {} not found in configuration", chain_id))?;

    info!(
        "Testing connection to chain {} ({})",
        chain_config.name, chain_id
    );

    // Create and initialize the adapter
    let adapter = EvmAdapter::new(chain_id, chain_config)?;
    adapter.init().await?;

    // Test connection by reading chain basics
    let block_number = adapter.get_latest_block().await?;
    let gas_price = adapter.get_gas_price().await?;

    info!("Connection successful!");
    info!("Latest block: {}", block_number);
    info!("Gas price: {} gwei", gas_price / 1_000_000_000u64);

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C)
async fn wait_for_shutdown() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
