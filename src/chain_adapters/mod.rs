//! Chain adapters
//!
//! The [`ChainClient`] trait is the service's boundary to on-chain state:
//! contract reads, claim transaction writes and receipt watching. The
//! default implementation is [`EvmAdapter`] over an ethers HTTP provider;
//! tests substitute their own implementations.

pub mod evm_adapter;

use anyhow::Result;
use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, U256};

pub use evm_adapter::EvmAdapter;

/// Outcome reported by the transaction-receipt watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    /// Transaction was mined and succeeded
    Success,

    /// Transaction was mined but reverted
    Reverted,
}

/// On-chain read/write client consumed by the reward service
///
/// Failures surface as errors; callers decide whether they are fatal.
/// `wait_for_receipt` blocks until the chain answers - bounding that wait
/// is the caller's responsibility.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Chain this client talks to
    fn chain_id(&self) -> u32;

    /// Call a view function and return its decoded output tokens
    async fn read_contract(
        &self,
        contract: Address,
        function: &str,
        args: Vec<Token>,
    ) -> Result<Vec<Token>>;

    /// Sign and submit a state-changing call, returning the tx hash
    async fn write_contract(
        &self,
        contract: Address,
        function: &str,
        args: Vec<Token>,
    ) -> Result<String>;

    /// Wait until the transaction is mined and report its status
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<ReceiptStatus>;

    /// Latest block number, used for health checks
    async fn get_latest_block(&self) -> Result<u64>;

    /// Current gas price in wei, used for health checks
    async fn get_gas_price(&self) -> Result<U256>;
}
