//! On-chain contract source
//!
//! Highest-priority reward source: reads the reward vault contract through
//! the chain client. A missing chain configuration, missing vault address
//! or unreachable RPC endpoint is "no data from this source", not a fatal
//! error. A single token whose read reverts is skipped and logged; the
//! rest of the batch proceeds.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::chain_adapters::ChainClient;
use crate::config::{ConfigManager, ContractRole};
use crate::error::RewardError;
use crate::sources::RewardSource;
use crate::types::{RewardRecord, RewardStatus};

/// Reward source backed by the on-chain reward vault
pub struct ContractSource {
    /// Chain clients by chain ID
    clients: HashMap<u32, Arc<dyn ChainClient>>,

    /// Chain configuration provider
    config: Arc<ConfigManager>,
}

/// Convert an on-chain base-unit amount into a display-unit decimal
pub fn decimal_from_base_units(value: U256, decimals: u8) -> Result<Decimal, RewardError> {
    if value.bits() > 127 {
        return Err(RewardError::CalculationError);
    }
    Decimal::try_from_i128_with_scale(value.as_u128() as i128, decimals as u32)
        .map_err(|_| RewardError::CalculationError)
}

/// First output token as a uint, if the shape matches
fn expect_uint(tokens: &[Token]) -> Option<U256> {
    match tokens.first() {
        Some(Token::Uint(value)) => Some(*value),
        _ => None,
    }
}

/// First output token as an address array, if the shape matches
fn expect_addresses(tokens: &[Token]) -> Option<Vec<Address>> {
    match tokens.first() {
        Some(Token::Array(items)) => items
            .iter()
            .map(|t| match t {
                Token::Address(a) => Some(*a),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

impl ContractSource {
    /// Create a contract source over the given chain clients
    pub fn new(clients: HashMap<u32, Arc<dyn ChainClient>>, config: Arc<ConfigManager>) -> Self {
        Self { clients, config }
    }

    /// Read a single uint view function, mapping failures to `None`
    async fn read_uint(
        &self,
        client: &Arc<dyn ChainClient>,
        vault: Address,
        function: &str,
        args: Vec<Token>,
    ) -> Option<U256> {
        match client.read_contract(vault, function, args).await {
            Ok(tokens) => expect_uint(&tokens),
            Err(e) => {
                warn!("Reward vault read {} failed: {}", function, e);
                None
            }
        }
    }
}

#[async_trait]
impl RewardSource for ContractSource {
    fn name(&self) -> &'static str {
        "contract"
    }

    async fn fetch_rewards(
        &self,
        owner: Address,
        chain_id: u32,
    ) -> Result<Vec<RewardRecord>, RewardError> {
        let config = self.config.get_config().await;

        // An unconfigured chain or missing vault address is not an error;
        // the adapter chain moves on to the API source.
        let chain = match config.chain(chain_id) {
            Some(chain) => chain,
            None => {
                debug!("Chain {} not configured, contract source has no data", chain_id);
                return Ok(Vec::new());
            }
        };
        let vault = match config.contract_address(chain_id, ContractRole::RewardVault) {
            Some(vault) => vault,
            None => {
                debug!(
                    "No reward vault configured on chain {}, contract source has no data",
                    chain_id
                );
                return Ok(Vec::new());
            }
        };
        let client = self
            .clients
            .get(&chain_id)
            .ok_or_else(|| RewardError::SourceUnavailable {
                source: "contract",
                reason: format!("no chain client for chain {}", chain_id),
            })?;

        let tokens = client
            .read_contract(vault, "rewardTokens", vec![])
            .await
            .map_err(|e| RewardError::SourceUnavailable {
                source: "contract",
                reason: e.to_string(),
            })?;
        let reward_tokens = expect_addresses(&tokens).ok_or_else(|| {
            RewardError::MalformedResponse {
                source: "contract",
                reason: "rewardTokens did not return an address array".to_string(),
            }
        })?;

        // The owner's referral tier; a failed read defaults to a direct
        // referral rather than aborting the batch.
        let level = self
            .read_uint(client, vault, "referralLevel", vec![Token::Address(owner)])
            .await
            .map(|v| v.low_u32() as u8)
            .filter(|v| (1..=5).contains(v))
            .unwrap_or(1);

        let decimals = chain.reward_token_decimals;
        let mut records = Vec::new();

        for token in reward_tokens {
            let args = vec![Token::Address(owner), Token::Address(token)];

            // Per-token failure skips the token, never the whole batch
            let pending = match self
                .read_uint(client, vault, "pendingByToken", args.clone())
                .await
            {
                Some(value) => value,
                None => {
                    warn!(
                        "Skipping reward token {:?} on chain {}: pending read failed",
                        token, chain_id
                    );
                    continue;
                }
            };
            let claimed = self
                .read_uint(client, vault, "claimedByToken", args)
                .await
                .unwrap_or_else(U256::zero);

            if !pending.is_zero() {
                let amount = decimal_from_base_units(pending, decimals)?;
                records.push(RewardRecord::new(
                    owner,
                    chain_id,
                    token,
                    level,
                    amount,
                    RewardStatus::Claimable,
                ));
            }
            if !claimed.is_zero() {
                let amount = decimal_from_base_units(claimed, decimals)?;
                let mut record =
                    RewardRecord::new(owner, chain_id, token, level, amount, RewardStatus::Claimed);
                record.distributed_at = None;
                records.push(record);
            }
        }

        debug!(
            "Contract source resolved {} records for {:?} on chain {}",
            records.len(),
            owner,
            chain_id
        );
        Ok(records)
    }
}
