//! EVM Adapter
//!
//! Adapter for interacting with EVM chains (Ethereum, BSC, Base, Polygon).
//! Wraps an ethers HTTP provider with the reward-vault contract surface the
//! service reads and writes: per-owner totals, per-token breakdowns and the
//! claim entry points. Reads are retried a bounded number of times before
//! the adapter gives up; receipt watching polls until the chain answers.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ethers::abi::{parse_abi, Abi, Token};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256, U64};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::chain_adapters::{ChainClient, ReceiptStatus};
use crate::config::ChainConfig;

/// Bounded retries for view calls before the adapter reports failure
const MAX_READ_RETRIES: u32 = 2;

/// Adapter state
#[derive(Debug, Clone, PartialEq)]
enum AdapterState {
    /// Not yet initialized
    Uninitialized,
    /// Initialized but the RPC endpoint was unreachable
    Disconnected,
    /// Connected
    Connected,
}

/// Adapter for EVM chains
pub struct EvmAdapter {
    /// Chain ID
    chain_id: u32,
    /// Chain configuration
    config: ChainConfig,
    /// HTTP JSON-RPC provider
    provider: Provider<Http>,
    /// Optional local signer for claim transactions
    signer: Option<LocalWallet>,
    /// Reward vault contract interface
    abi: Abi,
    /// Receipt poll interval in milliseconds
    receipt_poll_interval_ms: u64,
    /// Adapter state
    state: RwLock<AdapterState>,
}

/// The reward vault functions this service touches
fn reward_vault_abi() -> Result<Abi> {
    parse_abi(&[
        "function pendingRewards(address owner) view returns (uint256)",
        "function claimedRewards(address owner) view returns (uint256)",
        "function rewardTokens() view returns (address[])",
        "function pendingByToken(address owner, address token) view returns (uint256)",
        "function claimedByToken(address owner, address token) view returns (uint256)",
        "function referralLevel(address owner) view returns (uint8)",
        "function claimRewards()",
        "function claimRewardsFor(address owner)",
    ])
    .context("Failed to parse reward vault ABI")
}

impl EvmAdapter {
    /// Create a new EVM adapter for a chain
    ///
    /// Uses the first configured RPC endpoint. Call [`EvmAdapter::init`]
    /// before issuing requests.
    pub fn new(chain_id: u32, config: ChainConfig) -> Result<Self> {
        let rpc_url = config
            .rpc_urls
            .first()
            .with_context(|| format!("No RPC URL configured for chain {}", chain_id))?;

        let provider = Provider::<Http>::try_from(rpc_url.as_str())
            .with_context(|| format!("Invalid RPC URL for chain {}: {}", chain_id, rpc_url))?;

        Ok(Self {
            chain_id,
            config,
            provider,
            signer: None,
            abi: reward_vault_abi()?,
            receipt_poll_interval_ms: 2000,
            state: RwLock::new(AdapterState::Uninitialized),
        })
    }

    /// Attach a local signer so the adapter can submit claim transactions
    pub fn with_signer(mut self, private_key: &str) -> Result<Self> {
        let wallet: LocalWallet = private_key
            .parse()
            .context("Invalid signer private key")?;
        self.signer = Some(wallet);
        Ok(self)
    }

    /// Override the receipt poll interval
    pub fn with_receipt_poll_interval(mut self, interval_ms: u64) -> Self {
        self.receipt_poll_interval_ms = interval_ms;
        self
    }

    /// Initialize the adapter and probe the RPC endpoint
    ///
    /// An unreachable endpoint leaves the adapter in a degraded state but
    /// is not fatal; the source adapter chain treats it as "no data from
    /// this source".
    pub async fn init(&self) -> Result<()> {
        let mut state = self.state.write().await;

        match self.provider.get_block_number().await {
            Ok(block) => {
                info!(
                    "EVM adapter connected to chain {} ({}) at block {}",
                    self.chain_id, self.config.name, block
                );
                *state = AdapterState::Connected;
            }
            Err(e) => {
                warn!(
                    "EVM adapter for chain {} could not reach RPC endpoint: {}",
                    self.chain_id, e
                );
                *state = AdapterState::Disconnected;
            }
        }

        Ok(())
    }

    /// Check that the adapter has been initialized
    async fn ensure_initialized(&self) -> Result<()> {
        let state = self.state.read().await;

        match *state {
            AdapterState::Uninitialized => {
                bail!("EVM adapter for chain {} has not been initialized", self.chain_id)
            }
            AdapterState::Disconnected => {
                warn!("EVM adapter for chain {} is disconnected", self.chain_id);
                Ok(())
            }
            AdapterState::Connected => Ok(()),
        }
    }

    /// Gas price to attach to a write, capped by the chain's configured max
    async fn capped_gas_price(&self) -> Result<U256> {
        let current = self.provider.get_gas_price().await?;
        let max_wei = U256::from((self.config.gas.max_gas_gwei * 1e9) as u64);
        Ok(std::cmp::min(current, max_wei))
    }
}

#[async_trait]
impl ChainClient for EvmAdapter {
    fn chain_id(&self) -> u32 {
        self.chain_id
    }

    async fn read_contract(
        &self,
        contract: Address,
        function: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Token>> {
        self.ensure_initialized().await?;

        let func = self
            .abi
            .function(function)
            .with_context(|| format!("Unknown reward vault function: {}", function))?;
        let data = func
            .encode_input(&args)
            .with_context(|| format!("Failed to encode arguments for {}", function))?;

        let tx = TransactionRequest::new().to(contract).data(Bytes::from(data));
        let typed: TypedTransaction = tx.into();

        let mut last_error = None;
        for attempt in 0..=MAX_READ_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                debug!(
                    "Retrying {} on chain {} (attempt {}/{})",
                    function, self.chain_id, attempt, MAX_READ_RETRIES
                );
            }

            match self.provider.call(&typed, None).await {
                Ok(raw) => {
                    return func
                        .decode_output(raw.as_ref())
                        .with_context(|| format!("Failed to decode output of {}", function));
                }
                Err(e) => {
                    warn!(
                        "eth_call {} failed on chain {} (attempt {}/{}): {}",
                        function,
                        self.chain_id,
                        attempt + 1,
                        MAX_READ_RETRIES + 1,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        bail!(
            "eth_call {} failed on chain {} after {} attempts: {}",
            function,
            self.chain_id,
            MAX_READ_RETRIES + 1,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string())
        )
    }

    async fn write_contract(
        &self,
        contract: Address,
        function: &str,
        args: Vec<Token>,
    ) -> Result<String> {
        self.ensure_initialized().await?;

        let wallet = self
            .signer
            .clone()
            .with_context(|| format!("No signer configured for chain {}", self.chain_id))?
            .with_chain_id(self.chain_id as u64);

        let func = self
            .abi
            .function(function)
            .with_context(|| format!("Unknown reward vault function: {}", function))?;
        let data = func
            .encode_input(&args)
            .with_context(|| format!("Failed to encode arguments for {}", function))?;

        let gas_price = self.capped_gas_price().await?;
        let tx = TransactionRequest::new()
            .to(contract)
            .data(Bytes::from(data))
            .gas_price(gas_price);

        let client = SignerMiddleware::new(self.provider.clone(), wallet);
        let pending = client
            .send_transaction(tx, None)
            .await
            .with_context(|| format!("Failed to submit {} on chain {}", function, self.chain_id))?;

        let tx_hash: H256 = *pending;
        info!(
            "Submitted {} on chain {}: {:?}",
            function, self.chain_id, tx_hash
        );

        Ok(format!("{:?}", tx_hash))
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<ReceiptStatus> {
        let hash: H256 = tx_hash
            .parse()
            .with_context(|| format!("Invalid transaction hash: {}", tx_hash))?;
        let poll = Duration::from_millis(self.receipt_poll_interval_ms);

        loop {
            match self.provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    let success = receipt.status == Some(U64::from(1));
                    debug!(
                        "Receipt for {:?} on chain {}: success={}",
                        hash, self.chain_id, success
                    );
                    return Ok(if success {
                        ReceiptStatus::Success
                    } else {
                        ReceiptStatus::Reverted
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "Receipt lookup for {:?} on chain {} failed: {}",
                        hash, self.chain_id, e
                    );
                }
            }

            tokio::time::sleep(poll).await;
        }
    }

    async fn get_latest_block(&self) -> Result<u64> {
        let block = self
            .provider
            .get_block_number()
            .await
            .with_context(|| format!("Failed to get latest block on chain {}", self.chain_id))?;
        Ok(block.as_u64())
    }

    async fn get_gas_price(&self) -> Result<U256> {
        self.provider
            .get_gas_price()
            .await
            .with_context(|| format!("Failed to get gas price on chain {}", self.chain_id))
    }
}
