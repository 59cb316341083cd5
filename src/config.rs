/// Configuration module for RewardBot
///
/// This module defines the configuration structures used throughout the
/// reward reconciliation service: chain configurations with reward contract
/// addresses, the upstream reward API, realtime channel settings, claim
/// settings and the status API.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::types::ChainType;

/// Main configuration structure for the RewardBot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardBotConfig {
    /// General service settings
    pub general: GeneralConfig,

    /// Chain-specific configurations
    pub chains: HashMap<u32, ChainConfig>,

    /// Upstream reward/referral API
    pub reward_api: RewardApiConfig,

    /// Realtime push channel settings
    pub realtime: RealtimeConfig,

    /// Claim lifecycle settings
    pub claim: ClaimConfig,

    /// Local status API server
    pub status: StatusApiConfig,
}

impl Default for RewardBotConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            chains: HashMap::new(),
            reward_api: RewardApiConfig::default(),
            realtime: RealtimeConfig::default(),
            claim: ClaimConfig::default(),
            status: StatusApiConfig::default(),
        }
    }
}

impl RewardBotConfig {
    /// Look up a chain configuration
    ///
    /// Returns `None` when the chain is unknown or inactive, which callers
    /// must treat as "chain unsupported for this operation", not an error.
    pub fn chain(&self, chain_id: u32) -> Option<&ChainConfig> {
        self.chains.get(&chain_id).filter(|c| c.active)
    }

    /// Look up a contract address for a role on a chain
    pub fn contract_address(&self, chain_id: u32, role: ContractRole) -> Option<Address> {
        self.chain(chain_id)
            .and_then(|c| c.contracts.get(&role))
            .and_then(|raw| raw.parse::<Address>().ok())
    }

    /// Look up gas settings for a chain
    pub fn gas_settings(&self, chain_id: u32) -> Option<&GasSettings> {
        self.chain(chain_id).map(|c| &c.gas)
    }

    /// Chain IDs that are active in this configuration, ascending
    pub fn active_chain_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .chains
            .values()
            .filter(|c| c.active)
            .map(|c| c.chain_id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// General service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Service name/identifier
    pub service_name: String,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,

    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Default chain ID to use
    pub default_chain_id: u32,

    /// Interval between polling refreshes, in seconds
    pub poll_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            service_name: "DiamondChain RewardBot".to_string(),
            log_level: "info".to_string(),
            enable_metrics: true,
            default_chain_id: 8453, // Base
            poll_interval_secs: 60,
        }
    }
}

/// Roles a configured contract address can play on a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractRole {
    /// Holds accrued referral/staking rewards and executes claims
    RewardVault,

    /// Tracks the referral tree and tier levels
    ReferralRegistry,

    /// Staking pool the rewards accrue from
    StakingPool,
}

/// Chain-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain ID
    pub chain_id: u32,

    /// Chain name
    pub name: String,

    /// Chain type
    pub chain_type: ChainType,

    /// RPC endpoints
    pub rpc_urls: Vec<String>,

    /// Websocket endpoints
    pub ws_urls: Option<Vec<String>>,

    /// Block explorer URL
    pub explorer_url: String,

    /// Native token symbol
    pub native_token: String,

    /// Native token decimals
    pub native_decimals: u8,

    /// Reward token decimals used when converting on-chain amounts
    pub reward_token_decimals: u8,

    /// Contract addresses by role
    pub contracts: HashMap<ContractRole, String>,

    /// Gas settings
    pub gas: GasSettings,

    /// Is this chain active
    pub active: bool,
}

/// Gas pricing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasSettings {
    /// Use EIP-1559 (if supported by chain)
    pub use_eip1559: bool,

    /// Priority fee for EIP-1559 in gwei
    pub priority_fee_gwei: Option<f64>,

    /// Maximum gas price willing to pay in gwei
    pub max_gas_gwei: f64,
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            use_eip1559: true,
            priority_fee_gwei: Some(1.5),
            max_gas_gwei: 300.0,
        }
    }
}

/// Upstream reward/referral API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardApiConfig {
    /// Base URL of the reward history and claim endpoints
    pub base_url: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Optional API key sent as a bearer token
    pub api_key: Option<String>,
}

impl Default for RewardApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.diamondchain.io".to_string(),
            request_timeout_secs: 10,
            api_key: None,
        }
    }
}

/// Realtime push channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Enable the push channel; when disabled the service polls only
    pub enabled: bool,

    /// Websocket endpoint of the notification backend
    pub ws_url: Option<String>,

    /// Fixed delay between reconnect attempts, in seconds
    pub reconnect_delay_secs: u64,

    /// Reconnect attempts before latching the degraded state
    pub max_reconnect_attempts: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ws_url: Some("wss://push.diamondchain.io/rewards".to_string()),
            reconnect_delay_secs: 5,
            max_reconnect_attempts: 10,
        }
    }
}

/// Claim lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfig {
    /// Bound on the receipt wait, in seconds; `None` waits indefinitely
    pub confirm_timeout_secs: Option<u64>,

    /// Interval between receipt polls, in milliseconds
    pub receipt_poll_interval_ms: u64,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            confirm_timeout_secs: Some(180),
            receipt_poll_interval_ms: 2000,
        }
    }
}

/// Local status API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusApiConfig {
    /// Enable the status API server
    pub enable_api: bool,

    /// Status API server port
    pub port: u16,

    /// CORS allowed origins
    pub cors_origins: Vec<String>,
}

impl Default for StatusApiConfig {
    fn default() -> Self {
        Self {
            enable_api: true,
            port: 3000,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// Configuration manager for handling config loading/saving
pub struct ConfigManager {
    /// Current configuration
    config: RwLock<RewardBotConfig>,

    /// Configuration file path
    pub config_path: String,
}

impl ConfigManager {
    /// Create a new configuration manager
    pub fn new(config_path: &str) -> Self {
        Self {
            config: RwLock::new(RewardBotConfig::default()),
            config_path: config_path.to_string(),
        }
    }

    /// Load configuration from file
    pub async fn load(&self) -> Result<()> {
        let path = Path::new(&self.config_path);

        if !path.exists() {
            info!("Configuration file not found, using default configuration");
            return Ok(());
        }

        let config_content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", self.config_path))?;

        let config: RewardBotConfig =
            serde_yaml::from_str(&config_content).context("Failed to parse configuration file")?;

        *self.config.write().await = config;
        info!("Configuration loaded from {}", self.config_path);

        Ok(())
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config = self.config.read().await;
        let config_yaml =
            serde_yaml::to_string(&*config).context("Failed to serialize configuration")?;

        let path = Path::new(&self.config_path);

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {:?}", parent))?;
            }
        }

        fs::write(path, config_yaml)
            .with_context(|| format!("Failed to write configuration to file: {}", self.config_path))?;

        info!("Configuration saved to {}", self.config_path);
        Ok(())
    }

    /// Get the current configuration
    pub async fn get_config(&self) -> RewardBotConfig {
        self.config.read().await.clone()
    }

    /// Update the configuration
    pub async fn update_config(&self, config: RewardBotConfig) -> Result<()> {
        *self.config.write().await = config;
        self.save().await?;
        Ok(())
    }

    /// Replace the in-memory configuration without touching the file
    ///
    /// Used when the configuration is assembled programmatically, e.g. in
    /// tests or when the caller manages persistence itself.
    pub async fn update_config_in_memory(&self, config: RewardBotConfig) {
        *self.config.write().await = config;
    }

    /// Get a specific chain configuration
    pub async fn get_chain_config(&self, chain_id: u32) -> Result<ChainConfig> {
        let config = self.config.read().await;

        config
            .chains
            .get(&chain_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Chain configuration not found for chain ID {}", chain_id))
    }

    /// Look up a contract address for a role on a chain
    pub async fn contract_address(&self, chain_id: u32, role: ContractRole) -> Option<Address> {
        self.config.read().await.contract_address(chain_id, role)
    }
}

/// Create a default Base chain configuration
pub fn default_base_config() -> ChainConfig {
    ChainConfig {
        chain_id: 8453,
        name: "Base".to_string(),
        chain_type: ChainType::EVM(8453),
        rpc_urls: vec!["https://mainnet.base.org".to_string()],
        ws_urls: Some(vec!["wss://mainnet.base.org".to_string()]),
        explorer_url: "https://basescan.org".to_string(),
        native_token: "ETH".to_string(),
        native_decimals: 18,
        reward_token_decimals: 18,
        contracts: {
            let mut contracts = HashMap::new();
            contracts.insert(
                ContractRole::RewardVault,
                "0x52908400098527886E0F7030069857D2E4169EE7".to_string(),
            );
            contracts.insert(
                ContractRole::ReferralRegistry,
                "0x8617E340B3D01FA5F11F306F4090FD50E238070D".to_string(),
            );
            contracts
        },
        gas: GasSettings::default(),
        active: true,
    }
}

/// Create a default BSC chain configuration
pub fn default_bsc_config() -> ChainConfig {
    ChainConfig {
        chain_id: 56,
        name: "BSC".to_string(),
        chain_type: ChainType::EVM(56),
        rpc_urls: vec!["https://bsc-dataseed.binance.org".to_string()],
        ws_urls: Some(vec!["wss://bsc-ws-node.nariox.org:443".to_string()]),
        explorer_url: "https://bscscan.com".to_string(),
        native_token: "BNB".to_string(),
        native_decimals: 18,
        reward_token_decimals: 18,
        contracts: {
            let mut contracts = HashMap::new();
            contracts.insert(
                ContractRole::RewardVault,
                "0xde709f2102306220921060314715629080e2fb77".to_string(),
            );
            contracts
        },
        gas: GasSettings {
            use_eip1559: false,
            priority_fee_gwei: None,
            max_gas_gwei: 10.0,
        },
        active: true,
    }
}

/// Initialize default configuration with common chains
pub fn initialize_default_config() -> RewardBotConfig {
    let mut config = RewardBotConfig::default();

    let base_config = default_base_config();
    config.chains.insert(base_config.chain_id, base_config);

    let bsc_config = default_bsc_config();
    config.chains.insert(bsc_config.chain_id, bsc_config);

    config
}
