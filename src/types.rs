//! Types module
//!
//! Core types shared across the reward reconciliation service: reward
//! records, claim attempts, realtime events and their lifecycle enums.

use chrono::{DateTime, Utc};
use ethers::types::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported blockchain types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainType {
    /// Ethereum Virtual Machine based chains
    EVM(u32), // Parameter is chain_id

    /// Other blockchains reached through the external bridge provider
    Bridged(u32),
}

impl ChainType {
    /// Get the chain ID for this chain type
    pub fn chain_id(&self) -> u32 {
        match self {
            ChainType::EVM(id) => *id,
            ChainType::Bridged(id) => *id,
        }
    }

    /// Check if this chain is an EVM-compatible chain
    pub fn is_evm(&self) -> bool {
        matches!(self, ChainType::EVM(_))
    }

    /// Get blockchain name based on chain ID
    pub fn get_name(&self) -> String {
        match self {
            ChainType::EVM(1) => "Ethereum".to_string(),
            ChainType::EVM(56) => "BSC".to_string(),
            ChainType::EVM(137) => "Polygon".to_string(),
            ChainType::EVM(8453) => "Base".to_string(),
            ChainType::EVM(42161) => "Arbitrum".to_string(),
            ChainType::EVM(id) => format!("EVM Chain ({})", id),
            ChainType::Bridged(id) => format!("Bridged Chain ({})", id),
        }
    }
}

/// Lifecycle status of a reward record
///
/// Status only ever moves forward; the single legal reversal is
/// `Processing -> Claimable` when a claim transaction fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardStatus {
    /// Credited but not yet withdrawable
    Pending,

    /// Available to be claimed by the owner
    Claimable,

    /// Referenced by an in-flight claim transaction
    Processing,

    /// Successfully claimed on-chain
    Claimed,

    /// Distribution failed upstream
    Failed,
}

impl RewardStatus {
    /// Statuses that count toward the pending total
    pub fn is_pending_equivalent(&self) -> bool {
        matches!(
            self,
            RewardStatus::Pending | RewardStatus::Claimable | RewardStatus::Processing
        )
    }

    /// Check whether a transition to `next` is legal
    pub fn can_transition_to(&self, next: RewardStatus) -> bool {
        match (self, next) {
            (RewardStatus::Pending, RewardStatus::Claimable) => true,
            (RewardStatus::Claimable, RewardStatus::Processing) => true,
            (RewardStatus::Claimable, RewardStatus::Claimed) => true,
            (RewardStatus::Processing, RewardStatus::Claimed) => true,
            // Claim failure reverts the record so it can be retried
            (RewardStatus::Processing, RewardStatus::Claimable) => true,
            (RewardStatus::Pending, RewardStatus::Failed) => true,
            _ => false,
        }
    }
}

/// One accounted reward unit
///
/// `amount` never changes after creation; only `status` and `tx_hash`
/// mutate, through the cache store's transition methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardRecord {
    /// Unique record identifier
    pub id: Uuid,

    /// The earning account
    pub owner_address: Address,

    /// Chain the reward accrues on
    pub chain_id: u32,

    /// Token contract address; `Address::zero()` denotes the native asset
    pub token_address: Address,

    /// Referral-tier depth (1 = direct referral)
    pub level: u8,

    /// Reward amount in display units, always >= 0
    pub amount: Decimal,

    /// Lifecycle status
    pub status: RewardStatus,

    /// When the reward was credited, if already distributed
    pub distributed_at: Option<DateTime<Utc>>,

    /// Claim transaction hash once one has been submitted
    pub tx_hash: Option<String>,
}

impl RewardRecord {
    /// Create a new claimable record
    pub fn new(
        owner_address: Address,
        chain_id: u32,
        token_address: Address,
        level: u8,
        amount: Decimal,
        status: RewardStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_address,
            chain_id,
            token_address,
            level,
            amount,
            status,
            distributed_at: None,
            tx_hash: None,
        }
    }

    /// Builder-style helper setting the distribution timestamp
    pub fn with_distributed_at(mut self, at: DateTime<Utc>) -> Self {
        self.distributed_at = Some(at);
        self
    }
}

/// Per-chain grouping of currently claimable records for one owner
///
/// Derived on every aggregation pass, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimableBundle {
    /// Chain the bundle belongs to
    pub chain_id: u32,

    /// Sum of constituent record amounts
    pub total_amount: Decimal,

    /// Records making up the bundle
    pub record_ids: Vec<Uuid>,
}

/// State of an in-flight claim operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimState {
    /// Claim transaction handed to the signer or gasless backend
    Submitted,

    /// Awaiting the transaction receipt
    Confirming,

    /// Receipt reported success; records reconciled
    Confirmed,

    /// Transaction reverted, was rejected, or timed out
    Failed,
}

/// Tracks one in-flight claim operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimAttempt {
    /// Attempt identifier
    pub attempt_id: Uuid,

    /// Claiming account
    pub owner_address: Address,

    /// Chain the claim executes on
    pub chain_id: u32,

    /// Records referenced by this claim
    pub record_ids: Vec<Uuid>,

    /// Transaction hash, set once submitted
    pub tx_hash: Option<String>,

    /// Lifecycle state
    pub state: ClaimState,

    /// When the attempt was created
    pub created_at: DateTime<Utc>,

    /// When the attempt reached a terminal state
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ClaimAttempt {
    /// Create a freshly submitted attempt
    pub fn submitted(
        owner_address: Address,
        chain_id: u32,
        record_ids: Vec<Uuid>,
        tx_hash: String,
    ) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            owner_address,
            chain_id,
            record_ids,
            tx_hash: Some(tx_hash),
            state: ClaimState::Submitted,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Move the attempt into the confirming state
    pub fn begin_confirming(&mut self) {
        self.state = ClaimState::Confirming;
    }

    /// Resolve the attempt
    pub fn resolve(&mut self, state: ClaimState) {
        self.state = state;
        self.resolved_at = Some(Utc::now());
    }
}

/// Kinds of events delivered by the push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealtimeEventKind {
    /// A new account joined the caller's referral tree
    NewReferral,

    /// A reward was credited
    RewardEarned,

    /// Referral metadata changed
    ReferralUpdate,
}

/// One event received over the push channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// Event kind
    #[serde(rename = "event")]
    pub kind: RealtimeEventKind,

    /// Affected owner address, when the backend scopes the event
    #[serde(default)]
    pub address: Option<Address>,

    /// Affected chain, when the backend scopes the event
    #[serde(rename = "chainId", default)]
    pub chain_id: Option<u32>,

    /// Opaque event payload
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Request to refetch and re-aggregate one `(owner, chain)` slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshRequest {
    /// Owner whose cache slice should be rebuilt
    pub owner_address: Address,

    /// Chain to refetch
    pub chain_id: u32,
}
