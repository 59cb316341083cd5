//! Reward API source
//!
//! Second-priority reward source: the off-chain reward/referral history
//! API. Every payload shape is declared as an explicit struct and
//! validated; a malformed response is rejected rather than masked. A
//! non-2xx response or network failure is "no data from this source".
//!
//! This module also hosts the claim endpoint client: the backend either
//! answers with a transaction hash (a gasless claim it already executed)
//! or with a contract address for the caller to execute against.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::Address;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::config::RewardApiConfig;
use crate::error::RewardError;
use crate::sources::RewardSource;
use crate::types::{RewardRecord, RewardStatus};

/// Reward history payload: `GET /referral/rewards`
#[derive(Debug, Deserialize)]
struct RewardHistoryResponse {
    rewards: Vec<ApiRewardEntry>,
}

/// One reward row as the API reports it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiRewardEntry {
    referrer_address: String,
    chain_id: u32,
    #[serde(default)]
    token_address: Option<String>,
    level: u8,
    amount: String,
    status: String,
    #[serde(default)]
    distributed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    tx_hash: Option<String>,
}

/// Claim endpoint payload: `POST /referral/claim`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClaimEndpointPayload {
    /// The backend already executed a gasless claim
    Executed {
        #[serde(rename = "txHash")]
        tx_hash: String,
    },
    /// The caller must execute the claim against this contract
    Delegated {
        #[serde(rename = "contractAddress")]
        contract_address: String,
        amount: String,
    },
}

/// Validated claim endpoint answer
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimEndpointResponse {
    /// Gasless claim already executed; watch this transaction
    Executed {
        /// Hash of the backend-submitted transaction
        tx_hash: String,
    },
    /// Claim must be executed locally against this contract
    Delegated {
        /// Contract to call `claimRewards` on
        contract_address: Address,
        /// Amount the backend expects to be claimed
        amount: Decimal,
    },
}

/// Claim endpoint client consumed by the claim orchestrator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClaimApi: Send + Sync + 'static {
    /// Ask the backend to claim all claimable rewards for an owner/chain
    async fn request_claim(
        &self,
        owner: Address,
        chain_id: u32,
    ) -> Result<ClaimEndpointResponse, RewardError>;
}

/// Build the shared HTTP client, falling back to defaults when the
/// customized builder fails
fn build_http_client(timeout_secs: u64) -> Client {
    match Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client for reward API: {}", e);
            Client::new()
        }
    }
}

/// Reward source backed by the off-chain reward history API
pub struct ApiSource {
    /// HTTP client
    http: Client,
    /// API base URL
    base_url: String,
    /// Optional bearer token
    api_key: Option<String>,
}

impl ApiSource {
    /// Create an API source from the reward API configuration
    pub fn new(config: &RewardApiConfig) -> Self {
        Self {
            http: build_http_client(config.request_timeout_secs),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    /// Map one API row to a reward record, skipping rows that fail
    /// validation
    fn map_entry(&self, entry: ApiRewardEntry, chain_id: u32) -> Option<RewardRecord> {
        if entry.chain_id != chain_id {
            warn!(
                "Reward API returned a row for chain {} in a chain {} query, skipping",
                entry.chain_id, chain_id
            );
            return None;
        }

        let owner: Address = match entry.referrer_address.parse() {
            Ok(address) => address,
            Err(_) => {
                warn!(
                    "Reward API row has an invalid referrer address '{}', skipping",
                    entry.referrer_address
                );
                return None;
            }
        };

        let token = match entry.token_address.as_deref() {
            None | Some("") => Address::zero(),
            Some(raw) => match raw.parse() {
                Ok(address) => address,
                Err(_) => {
                    warn!("Reward API row has an invalid token address '{}', skipping", raw);
                    return None;
                }
            },
        };

        let amount: Decimal = match entry.amount.parse() {
            Ok(amount) if amount >= Decimal::ZERO => amount,
            _ => {
                warn!("Reward API row has an invalid amount '{}', skipping", entry.amount);
                return None;
            }
        };

        let status = match entry.status.as_str() {
            "pending" => RewardStatus::Pending,
            "claimable" => RewardStatus::Claimable,
            "processing" => RewardStatus::Processing,
            "claimed" => RewardStatus::Claimed,
            "failed" => RewardStatus::Failed,
            other => {
                warn!("Reward API row has an unknown status '{}', skipping", other);
                return None;
            }
        };

        if !(1..=5).contains(&entry.level) {
            warn!("Reward API row has an out-of-range level {}, skipping", entry.level);
            return None;
        }

        let mut record = RewardRecord::new(owner, chain_id, token, entry.level, amount, status);
        record.distributed_at = entry.distributed_at;
        record.tx_hash = entry.tx_hash;
        Some(record)
    }

    /// Attach the bearer token when one is configured
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl RewardSource for ApiSource {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn fetch_rewards(
        &self,
        owner: Address,
        chain_id: u32,
    ) -> Result<Vec<RewardRecord>, RewardError> {
        let url = format!("{}/referral/rewards", self.base_url);
        let request = self.authorize(self.http.get(&url).query(&[
            ("address", format!("{:?}", owner)),
            ("chainId", chain_id.to_string()),
        ]));

        let response = request.send().await.map_err(|e| RewardError::SourceUnavailable {
            source: "api",
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(RewardError::SourceUnavailable {
                source: "api",
                reason: format!("HTTP {}", response.status()),
            });
        }

        let payload: RewardHistoryResponse =
            response
                .json()
                .await
                .map_err(|e| RewardError::MalformedResponse {
                    source: "api",
                    reason: e.to_string(),
                })?;

        let total = payload.rewards.len();
        let records: Vec<RewardRecord> = payload
            .rewards
            .into_iter()
            .filter_map(|entry| self.map_entry(entry, chain_id))
            .collect();

        if records.len() < total {
            warn!(
                "Reward API: {} of {} rows failed validation for chain {}",
                total - records.len(),
                total,
                chain_id
            );
        }
        debug!(
            "API source resolved {} records for {:?} on chain {}",
            records.len(),
            owner,
            chain_id
        );

        Ok(records)
    }
}

/// Claim endpoint client over the reward API
pub struct HttpClaimApi {
    /// HTTP client
    http: Client,
    /// API base URL
    base_url: String,
    /// Optional bearer token
    api_key: Option<String>,
}

impl HttpClaimApi {
    /// Create a claim API client from the reward API configuration
    pub fn new(config: &RewardApiConfig) -> Self {
        Self {
            http: build_http_client(config.request_timeout_secs),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl ClaimApi for HttpClaimApi {
    async fn request_claim(
        &self,
        owner: Address,
        chain_id: u32,
    ) -> Result<ClaimEndpointResponse, RewardError> {
        let url = format!("{}/referral/claim", self.base_url);
        let body = serde_json::json!({
            "address": format!("{:?}", owner),
            "chainId": chain_id,
        });

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| RewardError::SourceUnavailable {
            source: "claim-api",
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(RewardError::SourceUnavailable {
                source: "claim-api",
                reason: format!("HTTP {}", response.status()),
            });
        }

        let payload: ClaimEndpointPayload =
            response
                .json()
                .await
                .map_err(|e| RewardError::MalformedResponse {
                    source: "claim-api",
                    reason: e.to_string(),
                })?;

        match payload {
            ClaimEndpointPayload::Executed { tx_hash } => {
                if tx_hash.is_empty() {
                    return Err(RewardError::MalformedResponse {
                        source: "claim-api",
                        reason: "empty txHash in executed claim".to_string(),
                    });
                }
                Ok(ClaimEndpointResponse::Executed { tx_hash })
            }
            ClaimEndpointPayload::Delegated {
                contract_address,
                amount,
            } => {
                let contract: Address =
                    contract_address
                        .parse()
                        .map_err(|_| RewardError::MalformedResponse {
                            source: "claim-api",
                            reason: format!("invalid contract address '{}'", contract_address),
                        })?;
                let amount: Decimal =
                    amount.parse().map_err(|_| RewardError::MalformedResponse {
                        source: "claim-api",
                        reason: format!("invalid amount '{}'", amount),
                    })?;
                Ok(ClaimEndpointResponse::Delegated {
                    contract_address: contract,
                    amount,
                })
            }
        }
    }
}
