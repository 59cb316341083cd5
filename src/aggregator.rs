/// Reward aggregation module
///
/// Pure computation turning a flat list of reward records into totals and
/// by-dimension breakdowns. Aggregation is filter-agnostic: callers may
/// filter by chain, level or status first and aggregate whatever remains.
/// All sums use `Decimal` arithmetic; fixed 4-decimal-place formatting
/// happens only at presentation time, never before summation.

use std::collections::HashMap;

use ethers::types::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::RewardError;
use crate::types::{ClaimableBundle, RewardRecord, RewardStatus};

/// Aggregated view over a set of reward records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardSummary {
    /// Sum of amounts in pending-equivalent statuses
    pub total_pending: Decimal,

    /// Sum of claimed amounts
    pub total_claimed: Decimal,

    /// Amount sums grouped by chain
    pub by_chain: HashMap<u32, Decimal>,

    /// Amount sums grouped by referral level
    pub by_level: HashMap<u8, Decimal>,

    /// Amount sums grouped by token
    pub by_token: HashMap<Address, Decimal>,

    /// One bundle per chain with claimable records, ascending by chain
    pub claimable_bundles: Vec<ClaimableBundle>,
}

impl RewardSummary {
    /// Summary of the empty record set
    pub fn empty() -> Self {
        Self {
            total_pending: Decimal::ZERO,
            total_claimed: Decimal::ZERO,
            by_chain: HashMap::new(),
            by_level: HashMap::new(),
            by_token: HashMap::new(),
            claimable_bundles: Vec::new(),
        }
    }

    /// The bundle for one chain, if any records there are claimable
    pub fn bundle_for_chain(&self, chain_id: u32) -> Option<&ClaimableBundle> {
        self.claimable_bundles.iter().find(|b| b.chain_id == chain_id)
    }
}

/// Checked sum helper; overflow is a calculation error, never silent wrap
fn add(total: Decimal, amount: Decimal) -> Result<Decimal, RewardError> {
    total.checked_add(amount).ok_or(RewardError::CalculationError)
}

/// Aggregate a record set into totals and breakdowns
///
/// No side effects; pure function of its input.
pub fn aggregate(records: &[RewardRecord]) -> Result<RewardSummary, RewardError> {
    let mut summary = RewardSummary::empty();
    let mut bundles: HashMap<u32, ClaimableBundle> = HashMap::new();

    for record in records {
        if record.status.is_pending_equivalent() {
            summary.total_pending = add(summary.total_pending, record.amount)?;
        } else if record.status == RewardStatus::Claimed {
            summary.total_claimed = add(summary.total_claimed, record.amount)?;
        }

        let chain_total = summary
            .by_chain
            .entry(record.chain_id)
            .or_insert(Decimal::ZERO);
        *chain_total = add(*chain_total, record.amount)?;

        let level_total = summary.by_level.entry(record.level).or_insert(Decimal::ZERO);
        *level_total = add(*level_total, record.amount)?;

        let token_total = summary
            .by_token
            .entry(record.token_address)
            .or_insert(Decimal::ZERO);
        *token_total = add(*token_total, record.amount)?;

        if record.status == RewardStatus::Claimable {
            let bundle = bundles.entry(record.chain_id).or_insert_with(|| ClaimableBundle {
                chain_id: record.chain_id,
                total_amount: Decimal::ZERO,
                record_ids: Vec::new(),
            });
            bundle.total_amount = add(bundle.total_amount, record.amount)?;
            bundle.record_ids.push(record.id);
        }
    }

    let mut claimable_bundles: Vec<ClaimableBundle> = bundles.into_values().collect();
    claimable_bundles.sort_by_key(|b| b.chain_id);
    summary.claimable_bundles = claimable_bundles;

    Ok(summary)
}

/// Keep only records accruing on one chain
pub fn filter_by_chain(records: &[RewardRecord], chain_id: u32) -> Vec<RewardRecord> {
    records
        .iter()
        .filter(|r| r.chain_id == chain_id)
        .cloned()
        .collect()
}

/// Keep only records at one referral level
pub fn filter_by_level(records: &[RewardRecord], level: u8) -> Vec<RewardRecord> {
    records.iter().filter(|r| r.level == level).cloned().collect()
}

/// Keep only records in one status
pub fn filter_by_status(records: &[RewardRecord], status: RewardStatus) -> Vec<RewardRecord> {
    records
        .iter()
        .filter(|r| r.status == status)
        .cloned()
        .collect()
}

/// Format an amount for display with fixed 4 decimal places
pub fn format_amount(amount: &Decimal) -> String {
    format!("{:.4}", amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn record(chain_id: u32, level: u8, amount: &str, status: RewardStatus) -> RewardRecord {
        RewardRecord::new(
            Address::zero(),
            chain_id,
            Address::zero(),
            level,
            Decimal::from_str(amount).expect("valid decimal literal"),
            status,
        )
    }

    #[test]
    fn test_empty_aggregation() {
        let summary = aggregate(&[]).expect("empty set aggregates");
        assert_eq!(summary.total_pending, Decimal::ZERO);
        assert_eq!(summary.total_claimed, Decimal::ZERO);
        assert!(summary.by_chain.is_empty());
        assert!(summary.by_level.is_empty());
        assert!(summary.by_token.is_empty());
        assert!(summary.claimable_bundles.is_empty());
    }

    #[test]
    fn test_totals_split_by_status() {
        let records = vec![
            record(56, 1, "10", RewardStatus::Pending),
            record(56, 1, "5", RewardStatus::Claimable),
            record(56, 1, "2.5", RewardStatus::Processing),
            record(56, 1, "7", RewardStatus::Claimed),
            record(56, 1, "100", RewardStatus::Failed),
        ];

        let summary = aggregate(&records).expect("aggregates");
        assert_eq!(summary.total_pending, Decimal::from_str("17.5").unwrap());
        assert_eq!(summary.total_claimed, Decimal::from_str("7").unwrap());
    }

    #[test]
    fn test_grouped_totals_by_level() {
        let records = vec![
            record(56, 1, "10", RewardStatus::Claimable),
            record(56, 1, "5", RewardStatus::Claimable),
            record(56, 2, "3", RewardStatus::Claimable),
        ];

        let summary = aggregate(&records).expect("aggregates");
        assert_eq!(summary.by_level[&1], Decimal::from_str("15").unwrap());
        assert_eq!(summary.by_level[&2], Decimal::from_str("3").unwrap());
    }

    #[test]
    fn test_sum_consistency_across_chains() {
        // Filtered to pending-equivalent statuses, the by_chain sums must
        // add up to total_pending.
        let records = vec![
            record(1, 1, "1.1", RewardStatus::Pending),
            record(56, 2, "2.2", RewardStatus::Claimable),
            record(8453, 3, "3.3", RewardStatus::Processing),
        ];

        let pending: Vec<RewardRecord> = records
            .iter()
            .filter(|r| r.status.is_pending_equivalent())
            .cloned()
            .collect();
        let summary = aggregate(&pending).expect("aggregates");

        let chain_sum = summary
            .by_chain
            .values()
            .fold(Decimal::ZERO, |acc, v| acc + v);
        assert_eq!(chain_sum, summary.total_pending);
        assert_eq!(summary.total_pending, Decimal::from_str("6.6").unwrap());
    }

    #[test]
    fn test_claimable_bundles_per_chain() {
        let a = record(56, 1, "4", RewardStatus::Claimable);
        let b = record(56, 2, "6", RewardStatus::Claimable);
        let c = record(8453, 1, "9", RewardStatus::Claimable);
        let d = record(8453, 1, "9", RewardStatus::Pending); // not bundled
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);

        let summary = aggregate(&[a, b, c, d]).expect("aggregates");
        assert_eq!(summary.claimable_bundles.len(), 2);

        let bsc = summary.bundle_for_chain(56).expect("BSC bundle");
        assert_eq!(bsc.total_amount, Decimal::from_str("10").unwrap());
        assert!(bsc.record_ids.contains(&a_id));
        assert!(bsc.record_ids.contains(&b_id));

        let base = summary.bundle_for_chain(8453).expect("Base bundle");
        assert_eq!(base.total_amount, Decimal::from_str("9").unwrap());
        assert_eq!(base.record_ids, vec![c_id]);

        // Deterministic ordering, ascending by chain
        assert_eq!(summary.claimable_bundles[0].chain_id, 56);
        assert_eq!(summary.claimable_bundles[1].chain_id, 8453);
    }

    #[test]
    fn test_filters_compose_with_aggregate() {
        let records = vec![
            record(56, 1, "4", RewardStatus::Claimable),
            record(8453, 1, "6", RewardStatus::Claimable),
            record(8453, 2, "1", RewardStatus::Claimed),
        ];

        let base_only = filter_by_chain(&records, 8453);
        assert_eq!(base_only.len(), 2);

        let summary = aggregate(&base_only).expect("aggregates");
        assert_eq!(summary.total_pending, Decimal::from_str("6").unwrap());
        assert_eq!(summary.total_claimed, Decimal::from_str("1").unwrap());

        assert_eq!(filter_by_level(&records, 2).len(), 1);
        assert_eq!(filter_by_status(&records, RewardStatus::Claimed).len(), 1);
    }

    #[test]
    fn test_many_small_amounts_do_not_drift() {
        // 0.0001 summed 10_000 times is exactly 1, not 0.9999...
        let records: Vec<RewardRecord> = (0..10_000)
            .map(|_| record(56, 1, "0.0001", RewardStatus::Claimable))
            .collect();

        let summary = aggregate(&records).expect("aggregates");
        assert_eq!(summary.total_pending, Decimal::from_str("1").unwrap());
    }

    #[test]
    fn test_format_amount_fixed_places() {
        assert_eq!(format_amount(&Decimal::from_str("12.5").unwrap()), "12.5000");
        assert_eq!(format_amount(&Decimal::from_str("0").unwrap()), "0.0000");
        assert_eq!(
            format_amount(&Decimal::from_str("1.23456").unwrap()),
            "1.2346"
        );
    }
}
