//! Reward data sources
//!
//! A [`RewardSource`] answers "what rewards does this owner have on this
//! chain". The [`SourceAdapterChain`] tries its sources in fixed priority
//! order - on-chain contract, then the reward API, then the fallback - and
//! short-circuits on the first non-empty, non-error result. Source-level
//! failures are absorbed here and never reach the caller as errors; only
//! argument validation failures propagate.

pub mod api_source;
pub mod contract_source;
pub mod fallback;

use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::Address;
use tracing::{debug, warn};

use crate::error::RewardError;
use crate::metric;
use crate::types::RewardRecord;

pub use api_source::{ApiSource, ClaimApi, ClaimEndpointResponse, HttpClaimApi};
#[cfg(test)]
pub use api_source::MockClaimApi;
pub use contract_source::ContractSource;
pub use fallback::{pool_placeholders, FallbackSource, PoolPlaceholder};

/// One prioritized reward data source
#[async_trait]
pub trait RewardSource: Send + Sync + 'static {
    /// Source name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Fetch all reward records for an owner on a chain
    ///
    /// `Ok(vec![])` means "this source has no data"; an error means the
    /// source could not answer at all. Both advance the adapter chain.
    async fn fetch_rewards(
        &self,
        owner: Address,
        chain_id: u32,
    ) -> Result<Vec<RewardRecord>, RewardError>;
}

/// Parse and validate an owner address supplied as a string
pub fn parse_owner_address(raw: &str) -> Result<Address, RewardError> {
    if !raw.starts_with("0x") || raw.len() != 42 {
        return Err(RewardError::InvalidAddress(raw.to_string()));
    }
    let address: Address = raw
        .parse()
        .map_err(|_| RewardError::InvalidAddress(raw.to_string()))?;
    if address.is_zero() {
        return Err(RewardError::InvalidAddress(raw.to_string()));
    }
    Ok(address)
}

/// Prioritized chain of reward sources with short-circuit fallthrough
pub struct SourceAdapterChain {
    /// Sources in strict priority order
    sources: Vec<Arc<dyn RewardSource>>,
}

impl SourceAdapterChain {
    /// Build a chain from sources in priority order
    pub fn new(sources: Vec<Arc<dyn RewardSource>>) -> Self {
        Self { sources }
    }

    /// Resolve the reward records for an owner on a chain
    ///
    /// Sources are tried strictly in priority order; a later source is
    /// never attempted before an earlier one's outcome is known. A source
    /// that errors or answers empty advances the chain; when every source
    /// is exhausted the result is an empty list, never an error - except
    /// for argument validation, which fails fast.
    pub async fn fetch_rewards(
        &self,
        owner: Address,
        chain_id: u32,
    ) -> Result<Vec<RewardRecord>, RewardError> {
        if owner.is_zero() {
            return Err(RewardError::InvalidAddress(format!("{:?}", owner)));
        }

        for source in &self.sources {
            match source.fetch_rewards(owner, chain_id).await {
                Ok(records) if !records.is_empty() => {
                    debug!(
                        "Source '{}' resolved {} reward records for chain {}",
                        source.name(),
                        records.len(),
                        chain_id
                    );
                    metric::record_fetch(chain_id, source.name(), "hit");
                    return Ok(records);
                }
                Ok(_) => {
                    debug!(
                        "Source '{}' has no reward data for chain {}, trying next source",
                        source.name(),
                        chain_id
                    );
                    metric::record_fetch(chain_id, source.name(), "empty");
                }
                Err(RewardError::SourceUnavailable { source: name, reason }) => {
                    warn!(
                        "Source '{}' unavailable for chain {}: {}, trying next source",
                        name, chain_id, reason
                    );
                    metric::record_fetch(chain_id, source.name(), "unavailable");
                }
                Err(RewardError::MalformedResponse { source: name, reason }) => {
                    warn!(
                        "Source '{}' returned a malformed response for chain {}: {}, trying next source",
                        name, chain_id, reason
                    );
                    metric::record_fetch(chain_id, source.name(), "malformed");
                }
                // Anything else is a programming error and must propagate
                Err(e) => return Err(e),
            }
        }

        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RewardStatus, RewardRecord};
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn owner() -> Address {
        "0x1111111111111111111111111111111111111111"
            .parse()
            .expect("static address")
    }

    struct StaticSource {
        name: &'static str,
        outcome: Result<Vec<RewardRecord>, RewardError>,
        calls: AtomicUsize,
    }

    impl StaticSource {
        fn records(name: &'static str, count: usize) -> Self {
            let records = (0..count)
                .map(|_| {
                    RewardRecord::new(
                        owner(),
                        8453,
                        Address::zero(),
                        1,
                        Decimal::ONE,
                        RewardStatus::Claimable,
                    )
                })
                .collect();
            Self {
                name,
                outcome: Ok(records),
                calls: AtomicUsize::new(0),
            }
        }

        fn unavailable(name: &'static str) -> Self {
            Self {
                name,
                outcome: Err(RewardError::SourceUnavailable {
                    source: name,
                    reason: "rpc unreachable".to_string(),
                }),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RewardSource for StaticSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch_rewards(
            &self,
            _owner: Address,
            _chain_id: u32,
        ) -> Result<Vec<RewardRecord>, RewardError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Ok(records) => Ok(records.clone()),
                Err(RewardError::SourceUnavailable { source, reason }) => {
                    Err(RewardError::SourceUnavailable {
                        source: *source,
                        reason: reason.clone(),
                    })
                }
                Err(_) => unreachable!("static sources only model these outcomes"),
            }
        }
    }

    #[tokio::test]
    async fn test_contract_failure_falls_through_to_api() {
        let contract = Arc::new(StaticSource::unavailable("contract"));
        let api = Arc::new(StaticSource::records("api", 2));
        let fallback = Arc::new(StaticSource::records("fallback", 0));

        let chain = SourceAdapterChain::new(vec![
            contract.clone() as Arc<dyn RewardSource>,
            api.clone(),
            fallback.clone(),
        ]);

        let records = chain.fetch_rewards(owner(), 8453).await.expect("resolves");
        assert_eq!(records.len(), 2);
        assert_eq!(contract.calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        // Short-circuit: the fallback was never consulted
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_non_empty_source_wins() {
        let contract = Arc::new(StaticSource::records("contract", 1));
        let api = Arc::new(StaticSource::records("api", 5));

        let chain = SourceAdapterChain::new(vec![
            contract as Arc<dyn RewardSource>,
            api.clone(),
        ]);

        let records = chain.fetch_rewards(owner(), 56).await.expect("resolves");
        assert_eq!(records.len(), 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_sources_empty_yields_empty_list() {
        let chain = SourceAdapterChain::new(vec![
            Arc::new(StaticSource::unavailable("contract")) as Arc<dyn RewardSource>,
            Arc::new(StaticSource::records("api", 0)),
            Arc::new(StaticSource::records("fallback", 0)),
        ]);

        let records = chain.fetch_rewards(owner(), 8453).await.expect("resolves");
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_zero_owner_address_is_rejected() {
        let chain = SourceAdapterChain::new(vec![
            Arc::new(StaticSource::records("contract", 1)) as Arc<dyn RewardSource>,
        ]);

        let err = chain
            .fetch_rewards(Address::zero(), 8453)
            .await
            .expect_err("zero address must fail validation");
        assert!(matches!(err, RewardError::InvalidAddress(_)));
    }

    #[test]
    fn test_parse_owner_address() {
        assert!(parse_owner_address("0x1111111111111111111111111111111111111111").is_ok());
        assert!(matches!(
            parse_owner_address("1111111111111111111111111111111111111111"),
            Err(RewardError::InvalidAddress(_))
        ));
        assert!(matches!(
            parse_owner_address("0x1111"),
            Err(RewardError::InvalidAddress(_))
        ));
        assert!(matches!(
            parse_owner_address("0x0000000000000000000000000000000000000000"),
            Err(RewardError::InvalidAddress(_))
        ));
    }
}
