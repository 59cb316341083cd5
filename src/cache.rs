/// Reward cache module
///
/// In-memory store for fetched reward records, keyed by
/// `(owner_address, chain_id)`. Entries are replaced wholesale on each
/// successful fetch rather than patched field-by-field; a monotonically
/// increasing fetch generation guards commits so a stale in-flight fetch
/// cannot overwrite a newer result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::RewardError;
use crate::types::{RewardRecord, RewardStatus};

/// Cache key: one slice per owner per chain
pub type StoreKey = (Address, u32);

/// One cached slice of reward records
#[derive(Debug, Clone)]
struct CacheEntry {
    /// Records fetched for this slice
    records: Vec<RewardRecord>,

    /// Generation of the fetch that produced this slice
    generation: u64,

    /// When the slice was committed
    fetched_at: DateTime<Utc>,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheStats {
    /// Number of cached slices
    pub entry_count: usize,

    /// Total number of cache hits
    pub hits: usize,

    /// Total number of cache misses
    pub misses: usize,

    /// Cache hit ratio (hits / (hits + misses))
    pub hit_ratio: f64,

    /// Commits discarded because a newer fetch already landed
    pub stale_discards: usize,
}

/// In-memory reward record store
pub struct RewardStore {
    /// Cached slices
    entries: RwLock<HashMap<StoreKey, CacheEntry>>,

    /// Fetch generation counter
    generation: AtomicU64,

    /// Statistics
    stats: RwLock<CacheStats>,
}

impl Default for RewardStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RewardStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Obtain a generation token for a fetch that is about to start
    ///
    /// The token must be passed back to [`RewardStore::commit`]; commits
    /// carrying a generation older than the slice's current one are
    /// discarded, implementing the "still relevant" check for results that
    /// arrive after a newer fetch already landed.
    pub fn begin_fetch(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace a slice wholesale with freshly fetched records
    ///
    /// Returns `false` when the commit was discarded as stale.
    pub async fn commit(
        &self,
        owner: Address,
        chain_id: u32,
        generation: u64,
        records: Vec<RewardRecord>,
    ) -> bool {
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.get(&(owner, chain_id)) {
            if existing.generation > generation {
                warn!(
                    "Discarding stale fetch result for {:?} on chain {} (generation {} < {})",
                    owner, chain_id, generation, existing.generation
                );
                let mut stats = self.stats.write().await;
                stats.stale_discards += 1;
                return false;
            }
        }

        debug!(
            "Committing {} reward records for {:?} on chain {} (generation {})",
            records.len(),
            owner,
            chain_id,
            generation
        );

        entries.insert(
            (owner, chain_id),
            CacheEntry {
                records,
                generation,
                fetched_at: Utc::now(),
            },
        );

        let mut stats = self.stats.write().await;
        stats.entry_count = entries.len();

        true
    }

    /// Get the cached records for a slice, if present
    pub async fn records(&self, owner: Address, chain_id: u32) -> Option<Vec<RewardRecord>> {
        let entries = self.entries.read().await;
        let result = entries.get(&(owner, chain_id)).map(|e| e.records.clone());

        let mut stats = self.stats.write().await;
        if result.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        let total = stats.hits + stats.misses;
        if total > 0 {
            stats.hit_ratio = stats.hits as f64 / total as f64;
        }

        result
    }

    /// Get one cached record by id
    pub async fn record(&self, owner: Address, chain_id: u32, id: Uuid) -> Option<RewardRecord> {
        let entries = self.entries.read().await;
        entries
            .get(&(owner, chain_id))
            .and_then(|e| e.records.iter().find(|r| r.id == id).cloned())
    }

    /// When the slice was last committed
    pub async fn fetched_at(&self, owner: Address, chain_id: u32) -> Option<DateTime<Utc>> {
        let entries = self.entries.read().await;
        entries.get(&(owner, chain_id)).map(|e| e.fetched_at)
    }

    /// Drop a slice so the next read refetches it
    pub async fn invalidate(&self, owner: Address, chain_id: u32) {
        let mut entries = self.entries.write().await;
        if entries.remove(&(owner, chain_id)).is_some() {
            debug!("Invalidated reward cache for {:?} on chain {}", owner, chain_id);
        }

        let mut stats = self.stats.write().await;
        stats.entry_count = entries.len();
    }

    /// Transition the given records from `Claimable` to `Processing`
    ///
    /// Fails without mutating anything when any record is missing or not
    /// claimable, so a claim precondition violation never half-applies.
    pub async fn mark_processing(
        &self,
        owner: Address,
        chain_id: u32,
        record_ids: &[Uuid],
    ) -> Result<(), RewardError> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&(owner, chain_id)).ok_or_else(|| {
            RewardError::InvalidClaimRequest(format!(
                "no cached rewards for owner on chain {}",
                chain_id
            ))
        })?;

        for id in record_ids {
            let record = entry.records.iter().find(|r| r.id == *id).ok_or_else(|| {
                RewardError::InvalidClaimRequest(format!("unknown reward record {}", id))
            })?;
            if record.status != RewardStatus::Claimable {
                return Err(RewardError::InvalidClaimRequest(format!(
                    "record {} is {:?}, not claimable",
                    id, record.status
                )));
            }
            if record.chain_id != chain_id {
                return Err(RewardError::InvalidClaimRequest(format!(
                    "record {} belongs to chain {}, not {}",
                    id, record.chain_id, chain_id
                )));
            }
        }

        for record in entry.records.iter_mut() {
            if record_ids.contains(&record.id) {
                record.status = RewardStatus::Processing;
            }
        }

        Ok(())
    }

    /// Transition the given records to `Claimed`, stamping the tx hash
    pub async fn mark_claimed(
        &self,
        owner: Address,
        chain_id: u32,
        record_ids: &[Uuid],
        tx_hash: &str,
    ) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&(owner, chain_id)) {
            for record in entry.records.iter_mut() {
                if record_ids.contains(&record.id)
                    && record.status.can_transition_to(RewardStatus::Claimed)
                {
                    record.status = RewardStatus::Claimed;
                    record.tx_hash = Some(tx_hash.to_string());
                }
            }
        }
    }

    /// Revert the given records from `Processing` back to `Claimable`
    ///
    /// Used when a claim fails so the records can be retried; the stale tx
    /// hash is cleared.
    pub async fn revert_claimable(&self, owner: Address, chain_id: u32, record_ids: &[Uuid]) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&(owner, chain_id)) {
            for record in entry.records.iter_mut() {
                if record_ids.contains(&record.id) && record.status == RewardStatus::Processing {
                    record.status = RewardStatus::Claimable;
                    record.tx_hash = None;
                }
            }
        }
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }
}
