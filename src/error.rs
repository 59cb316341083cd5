//! Error types for the reward reconciliation service
//!
//! Source-level failures (`SourceUnavailable`) are absorbed inside the
//! source adapter chain and never reach callers; claim-lifecycle errors are
//! surfaced because they require a user decision (retry or abandon).

use ethers::types::Address;
use std::fmt;

/// Errors surfaced by the reward reconciliation service
#[derive(Debug)]
pub enum RewardError {
    /// A single data source could not answer; triggers fallthrough
    SourceUnavailable {
        /// Which source degraded
        source: &'static str,
        /// Underlying failure description
        reason: String,
    },

    /// Owner address failed validation before any source was tried
    InvalidAddress(String),

    /// No configuration for the requested chain and operation
    ChainNotSupported(u32),

    /// Claim precondition violated; nothing was submitted
    InvalidClaimRequest(String),

    /// Idempotence guard: a claim for this owner and chain is in flight
    ClaimAlreadyInFlight {
        /// Claiming account
        owner: Address,
        /// Chain with the in-flight claim
        chain_id: u32,
    },

    /// Submitted claim reverted, was rejected, or timed out; retryable
    ClaimFailed {
        /// Chain the claim failed on
        chain_id: u32,
        /// Failure description for the caller
        reason: String,
    },

    /// Push channel exhausted its reconnect attempts; poll instead
    ChannelDegraded {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Decimal arithmetic overflowed while summing amounts
    CalculationError,

    /// Upstream payload did not match its declared schema
    MalformedResponse {
        /// Which boundary produced the payload
        source: &'static str,
        /// What failed to validate
        reason: String,
    },
}

impl fmt::Display for RewardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewardError::SourceUnavailable { source, reason } => {
                write!(f, "reward source '{source}' unavailable: {reason}")
            }
            RewardError::InvalidAddress(addr) => write!(f, "invalid owner address: {addr}"),
            RewardError::ChainNotSupported(chain) => {
                write!(f, "chain {chain} is not supported for this operation")
            }
            RewardError::InvalidClaimRequest(msg) => write!(f, "invalid claim request: {msg}"),
            RewardError::ClaimAlreadyInFlight { owner, chain_id } => {
                write!(f, "claim already in flight for {owner:?} on chain {chain_id}")
            }
            RewardError::ClaimFailed { chain_id, reason } => {
                write!(f, "claim on chain {chain_id} failed: {reason}")
            }
            RewardError::ChannelDegraded { attempts } => {
                write!(f, "realtime channel degraded after {attempts} reconnect attempts")
            }
            RewardError::CalculationError => write!(f, "reward amount calculation overflowed"),
            RewardError::MalformedResponse { source, reason } => {
                write!(f, "malformed response from '{source}': {reason}")
            }
        }
    }
}

impl std::error::Error for RewardError {}

impl RewardError {
    /// Whether the caller may retry the failed operation as-is
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RewardError::ClaimFailed { .. } | RewardError::SourceUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let failed = RewardError::ClaimFailed {
            chain_id: 56,
            reason: "reverted".to_string(),
        };
        assert!(failed.is_retryable());

        let invalid = RewardError::InvalidClaimRequest("mismatched chain".to_string());
        assert!(!invalid.is_retryable());

        let in_flight = RewardError::ClaimAlreadyInFlight {
            owner: Address::zero(),
            chain_id: 56,
        };
        assert!(!in_flight.is_retryable());
    }

    #[test]
    fn test_error_display_names_chain() {
        let err = RewardError::ClaimFailed {
            chain_id: 8453,
            reason: "out of gas".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("8453"));
        assert!(message.contains("out of gas"));
    }
}
