//! Fallback source
//!
//! Last entry in the source adapter chain. For user-owned reward data the
//! fallback is always an empty list - the service never synthesizes money
//! amounts for a real account. Presentational defaults (pool listings shown
//! before any backend answers) are a separate, deterministic call.

use async_trait::async_trait;
use ethers::types::Address;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::RewardError;
use crate::sources::RewardSource;
use crate::types::RewardRecord;

/// Terminal source yielding no user-owned data
pub struct FallbackSource;

#[async_trait]
impl RewardSource for FallbackSource {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn fetch_rewards(
        &self,
        _owner: Address,
        _chain_id: u32,
    ) -> Result<Vec<RewardRecord>, RewardError> {
        Ok(Vec::new())
    }
}

/// Placeholder pool listing for presentational defaults
#[derive(Debug, Clone, Serialize)]
pub struct PoolPlaceholder {
    /// Chain the pool lives on
    pub chain_id: u32,

    /// Display name
    pub pool_name: String,

    /// Placeholder APY, percent
    pub apy: Decimal,

    /// Placeholder total staked, display units
    pub total_staked: Decimal,
}

/// Deterministic placeholder pool listings for one chain
///
/// Values are derived arithmetically from the chain ID so repeated renders
/// are stable; they are presentational and never represent user balances.
pub fn pool_placeholders(chain_id: u32) -> Vec<PoolPlaceholder> {
    let seed = (chain_id % 7) as i64;

    (0..3i64)
        .map(|slot| PoolPlaceholder {
            chain_id,
            pool_name: format!("Pool #{}", slot + 1),
            // 5.00% .. 12.75% depending on chain and slot
            apy: Decimal::new(500 + seed * 25 + slot * 100, 2),
            // 10_000, 25_000, 40_000 ... display units
            total_staked: Decimal::new(10_000 + slot * 15_000, 0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fallback_never_synthesizes_user_rewards() {
        let source = FallbackSource;
        let owner: Address = "0x5555555555555555555555555555555555555555"
            .parse()
            .expect("static address");

        let records = source.fetch_rewards(owner, 8453).await.expect("resolves");
        assert!(records.is_empty());
    }

    #[test]
    fn test_pool_placeholders_are_deterministic() {
        let first = pool_placeholders(8453);
        let second = pool_placeholders(8453);

        assert_eq!(first.len(), 3);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.apy, b.apy);
            assert_eq!(a.total_staked, b.total_staked);
        }

        // Different chains get different placeholder APYs
        let other = pool_placeholders(56);
        assert_ne!(first[0].apy, other[0].apy);
    }
}
