//! Claim lifecycle
//!
//! The orchestrator drives a claim transaction through
//! `submitted -> confirming -> confirmed | failed` and reconciles the
//! reward cache with the outcome.

pub mod orchestrator;

pub use orchestrator::{BatchClaimReport, ClaimOrchestrator, FailedChainClaim};
