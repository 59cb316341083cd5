//! Claim Orchestrator
//!
//! Drives the claim lifecycle for one chain at a time: validate the
//! request, move records to processing, submit (gasless through the claim
//! API when the backend offers it, locally signed otherwise), await the
//! receipt within the configured bound, then reconcile the cache and
//! trigger re-aggregation. An in-flight guard rejects a second claim for
//! the same `(owner, chain)` before the first resolves.
//!
//! Batch claims run chain-by-chain and are not atomic across chains; the
//! caller receives a per-chain report and a failure on one chain never
//! rolls back a confirmed claim on another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ethers::abi::Token;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::RewardStore;
use crate::chain_adapters::{ChainClient, ReceiptStatus};
use crate::config::{ConfigManager, ContractRole};
use crate::error::RewardError;
use crate::metric;
use crate::sources::{ClaimApi, ClaimEndpointResponse};
use crate::types::{ClaimAttempt, ClaimState, RefreshRequest, RewardStatus};

/// One chain's failure inside a batch claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedChainClaim {
    /// Chain the claim failed on
    pub chain_id: u32,

    /// Failure description
    pub reason: String,

    /// Whether retrying the chain as-is can succeed
    pub retryable: bool,
}

/// Per-chain outcome of a batch claim
///
/// Never reports full success when any constituent chain failed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BatchClaimReport {
    /// Chains whose claims confirmed
    pub succeeded: Vec<ClaimAttempt>,

    /// Chains whose claims failed, with reasons
    pub failed: Vec<FailedChainClaim>,
}

impl BatchClaimReport {
    /// True when every attempted chain confirmed
    pub fn is_full_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Orchestrates claim transactions and reconciles their outcomes
pub struct ClaimOrchestrator {
    /// Chain clients by chain ID
    clients: HashMap<u32, Arc<dyn ChainClient>>,

    /// Claim endpoint client
    claim_api: Arc<dyn ClaimApi>,

    /// Reward cache
    store: Arc<RewardStore>,

    /// Configuration provider
    config: Arc<ConfigManager>,

    /// In-flight claims by `(owner, chain)`
    in_flight: RwLock<HashMap<(Address, u32), Uuid>>,

    /// Channel used to trigger refetch and re-aggregation
    refresh_tx: mpsc::Sender<RefreshRequest>,
}

impl ClaimOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        clients: HashMap<u32, Arc<dyn ChainClient>>,
        claim_api: Arc<dyn ClaimApi>,
        store: Arc<RewardStore>,
        config: Arc<ConfigManager>,
        refresh_tx: mpsc::Sender<RefreshRequest>,
    ) -> Self {
        Self {
            clients,
            claim_api,
            store,
            config,
            in_flight: RwLock::new(HashMap::new()),
            refresh_tx,
        }
    }

    /// Claim the given reward records on one chain
    ///
    /// Blocks until the claim confirms or fails. Preconditions: every id
    /// must reference a cached record with `status = claimable` on the
    /// given chain, and no other claim for this `(owner, chain)` may be in
    /// flight.
    pub async fn claim(
        &self,
        owner: Address,
        chain_id: u32,
        record_ids: &[Uuid],
    ) -> Result<ClaimAttempt, RewardError> {
        if record_ids.is_empty() {
            return Err(RewardError::InvalidClaimRequest(
                "no reward records requested".to_string(),
            ));
        }

        {
            let mut in_flight = self.in_flight.write().await;
            if in_flight.contains_key(&(owner, chain_id)) {
                metric::record_claim(chain_id, "rejected_in_flight");
                return Err(RewardError::ClaimAlreadyInFlight { owner, chain_id });
            }
            in_flight.insert((owner, chain_id), Uuid::new_v4());
        }

        let result = self.execute_claim(owner, chain_id, record_ids).await;
        self.in_flight.write().await.remove(&(owner, chain_id));
        result
    }

    /// Claim every claimable record across the given chains, one chain at
    /// a time
    ///
    /// Not atomic across chains: a failure on a later chain leaves earlier
    /// chains claimed and the failed chain retryable. Chains with nothing
    /// claimable are skipped silently.
    pub async fn claim_all(&self, owner: Address, chain_ids: &[u32]) -> BatchClaimReport {
        let mut report = BatchClaimReport::default();

        for &chain_id in chain_ids {
            let record_ids: Vec<Uuid> = match self.store.records(owner, chain_id).await {
                Some(records) => records
                    .iter()
                    .filter(|r| r.status == RewardStatus::Claimable)
                    .map(|r| r.id)
                    .collect(),
                None => Vec::new(),
            };

            if record_ids.is_empty() {
                debug!("Nothing claimable on chain {}, skipping", chain_id);
                continue;
            }

            match self.claim(owner, chain_id, &record_ids).await {
                Ok(attempt) => report.succeeded.push(attempt),
                Err(e) => {
                    warn!("Batch claim failed on chain {}: {}", chain_id, e);
                    report.failed.push(FailedChainClaim {
                        chain_id,
                        reason: e.to_string(),
                        retryable: e.is_retryable(),
                    });
                }
            }
        }

        report
    }

    /// Whether a claim for this `(owner, chain)` is currently in flight
    pub async fn is_in_flight(&self, owner: Address, chain_id: u32) -> bool {
        self.in_flight.read().await.contains_key(&(owner, chain_id))
    }

    async fn execute_claim(
        &self,
        owner: Address,
        chain_id: u32,
        record_ids: &[Uuid],
    ) -> Result<ClaimAttempt, RewardError> {
        // Validates every record and moves them to processing atomically;
        // nothing has been submitted yet if this fails.
        self.store.mark_processing(owner, chain_id, record_ids).await?;

        let tx_hash = match self.submit(owner, chain_id).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                self.store.revert_claimable(owner, chain_id, record_ids).await;
                metric::record_claim(chain_id, "submit_failed");
                return Err(match e {
                    RewardError::ChainNotSupported(_) | RewardError::ClaimFailed { .. } => e,
                    other => RewardError::ClaimFailed {
                        chain_id,
                        reason: other.to_string(),
                    },
                });
            }
        };

        let mut attempt = ClaimAttempt::submitted(owner, chain_id, record_ids.to_vec(), tx_hash.clone());
        info!(
            "Claim submitted for {:?} on chain {}: tx {}",
            owner, chain_id, tx_hash
        );
        metric::record_claim(chain_id, "submitted");

        attempt.begin_confirming();
        match self.await_confirmation(chain_id, &tx_hash).await {
            Ok(()) => {
                self.store
                    .mark_claimed(owner, chain_id, record_ids, &tx_hash)
                    .await;
                attempt.resolve(ClaimState::Confirmed);
                metric::record_claim(chain_id, "confirmed");
                info!(
                    "Claim confirmed for {:?} on chain {}: tx {}",
                    owner, chain_id, tx_hash
                );

                // The cache slice is stale now; drop it and trigger a
                // refetch so aggregation reflects on-chain truth.
                self.store.invalidate(owner, chain_id).await;
                if let Err(e) = self.refresh_tx.try_send(RefreshRequest {
                    owner_address: owner,
                    chain_id,
                }) {
                    debug!("Refresh trigger not delivered: {}", e);
                }

                Ok(attempt)
            }
            Err(e) => {
                self.store.revert_claimable(owner, chain_id, record_ids).await;
                attempt.resolve(ClaimState::Failed);
                metric::record_claim(chain_id, "failed");
                warn!(
                    "Claim failed for {:?} on chain {}, records reverted to claimable: {}",
                    owner, chain_id, e
                );
                Err(e)
            }
        }
    }

    /// Submit the claim, preferring the backend's gasless path
    async fn submit(&self, owner: Address, chain_id: u32) -> Result<String, RewardError> {
        match self.claim_api.request_claim(owner, chain_id).await {
            Ok(ClaimEndpointResponse::Executed { tx_hash }) => {
                info!(
                    "Backend executed gasless claim for {:?} on chain {}: tx {}",
                    owner, chain_id, tx_hash
                );
                Ok(tx_hash)
            }
            Ok(ClaimEndpointResponse::Delegated {
                contract_address,
                amount,
            }) => {
                debug!(
                    "Backend delegated claim of {} on chain {} to contract {:?}",
                    amount, chain_id, contract_address
                );
                self.submit_onchain(owner, chain_id, contract_address).await
            }
            Err(e) => {
                warn!(
                    "Claim API unavailable on chain {}, falling back to direct on-chain claim: {}",
                    chain_id, e
                );
                let vault = self
                    .config
                    .contract_address(chain_id, ContractRole::RewardVault)
                    .await
                    .ok_or(RewardError::ChainNotSupported(chain_id))?;
                self.submit_onchain(owner, chain_id, vault).await
            }
        }
    }

    /// Sign and submit the claim transaction through the chain client
    async fn submit_onchain(
        &self,
        owner: Address,
        chain_id: u32,
        contract: Address,
    ) -> Result<String, RewardError> {
        let client = self
            .clients
            .get(&chain_id)
            .ok_or(RewardError::ChainNotSupported(chain_id))?;

        client
            .write_contract(contract, "claimRewardsFor", vec![Token::Address(owner)])
            .await
            .map_err(|e| RewardError::ClaimFailed {
                chain_id,
                reason: e.to_string(),
            })
    }

    /// Await the receipt within the configured bound
    ///
    /// `confirm_timeout_secs = None` reproduces an unbounded wait; a
    /// timeout counts as a claim failure so records revert and the caller
    /// may retry.
    async fn await_confirmation(&self, chain_id: u32, tx_hash: &str) -> Result<(), RewardError> {
        let client = self
            .clients
            .get(&chain_id)
            .ok_or(RewardError::ChainNotSupported(chain_id))?;
        let claim_config = self.config.get_config().await.claim;

        let wait = client.wait_for_receipt(tx_hash);
        let status = match claim_config.confirm_timeout_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), wait).await {
                Ok(status) => status,
                Err(_) => {
                    return Err(RewardError::ClaimFailed {
                        chain_id,
                        reason: format!("confirmation timed out after {}s", secs),
                    })
                }
            },
            None => wait.await,
        };

        match status {
            Ok(ReceiptStatus::Success) => Ok(()),
            Ok(ReceiptStatus::Reverted) => Err(RewardError::ClaimFailed {
                chain_id,
                reason: "claim transaction reverted".to_string(),
            }),
            Err(e) => Err(RewardError::ClaimFailed {
                chain_id,
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use ethers::types::U256;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    use crate::config::initialize_default_config;
    use crate::sources::MockClaimApi;
    use crate::types::RewardRecord;

    fn owner() -> Address {
        "0x6666666666666666666666666666666666666666"
            .parse()
            .expect("static address")
    }

    /// Chain client fake with a scriptable receipt outcome
    struct FakeChainClient {
        chain_id: u32,
        receipt: Option<ReceiptStatus>,
        gate: Option<Arc<Notify>>,
        writes: AtomicUsize,
    }

    impl FakeChainClient {
        fn confirming(chain_id: u32) -> Self {
            Self {
                chain_id,
                receipt: Some(ReceiptStatus::Success),
                gate: None,
                writes: AtomicUsize::new(0),
            }
        }

        fn reverting(chain_id: u32) -> Self {
            Self {
                chain_id,
                receipt: Some(ReceiptStatus::Reverted),
                gate: None,
                writes: AtomicUsize::new(0),
            }
        }

        fn gated(chain_id: u32, gate: Arc<Notify>) -> Self {
            Self {
                chain_id,
                receipt: Some(ReceiptStatus::Success),
                gate: Some(gate),
                writes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChainClient for FakeChainClient {
        fn chain_id(&self) -> u32 {
            self.chain_id
        }

        async fn read_contract(
            &self,
            _contract: Address,
            _function: &str,
            _args: Vec<Token>,
        ) -> Result<Vec<Token>> {
            Ok(vec![])
        }

        async fn write_contract(
            &self,
            _contract: Address,
            _function: &str,
            _args: Vec<Token>,
        ) -> Result<String> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok("0x00000000000000000000000000000000000000000000000000000000000000aa".to_string())
        }

        async fn wait_for_receipt(&self, _tx_hash: &str) -> Result<ReceiptStatus> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.receipt.ok_or_else(|| anyhow!("no receipt scripted"))
        }

        async fn get_latest_block(&self) -> Result<u64> {
            Ok(1)
        }

        async fn get_gas_price(&self) -> Result<U256> {
            Ok(U256::one())
        }
    }

    struct Harness {
        orchestrator: Arc<ClaimOrchestrator>,
        store: Arc<RewardStore>,
        refresh_rx: mpsc::Receiver<RefreshRequest>,
    }

    async fn harness(client: FakeChainClient, claim_api: MockClaimApi) -> Harness {
        let chain_id = client.chain_id();
        let config = Arc::new(ConfigManager::new("config/test.yaml"));
        config
            .update_config_in_memory(initialize_default_config())
            .await;

        let store = Arc::new(RewardStore::new());
        let (refresh_tx, refresh_rx) = mpsc::channel(16);

        let mut clients: HashMap<u32, Arc<dyn ChainClient>> = HashMap::new();
        clients.insert(chain_id, Arc::new(client));

        let orchestrator = Arc::new(ClaimOrchestrator::new(
            clients,
            Arc::new(claim_api),
            store.clone(),
            config,
            refresh_tx,
        ));

        Harness {
            orchestrator,
            store,
            refresh_rx,
        }
    }

    async fn seed_claimable(store: &RewardStore, chain_id: u32, amount: &str) -> Uuid {
        let record = RewardRecord::new(
            owner(),
            chain_id,
            Address::zero(),
            1,
            amount.parse::<Decimal>().expect("valid decimal literal"),
            RewardStatus::Claimable,
        );
        let id = record.id;
        let generation = store.begin_fetch();
        store.commit(owner(), chain_id, generation, vec![record]).await;
        id
    }

    fn gasless_api(times: usize) -> MockClaimApi {
        let mut api = MockClaimApi::new();
        api.expect_request_claim().times(times).returning(|_, _| {
            Ok(ClaimEndpointResponse::Executed {
                tx_hash: "0x00000000000000000000000000000000000000000000000000000000000000bb"
                    .to_string(),
            })
        });
        api
    }

    #[tokio::test]
    async fn test_single_chain_claim_confirms() {
        let mut h = harness(FakeChainClient::confirming(8453), gasless_api(1)).await;
        let id = seed_claimable(&h.store, 8453, "12.5").await;

        let attempt = h
            .orchestrator
            .claim(owner(), 8453, &[id])
            .await
            .expect("claim confirms");

        assert_eq!(attempt.state, ClaimState::Confirmed);
        assert!(attempt.tx_hash.is_some());
        assert!(attempt.resolved_at.is_some());

        // Cache invalidated and a refresh triggered for re-aggregation
        assert!(h.store.records(owner(), 8453).await.is_none());
        let refresh = h.refresh_rx.try_recv().expect("refresh requested");
        assert_eq!(refresh.chain_id, 8453);
        assert_eq!(refresh.owner_address, owner());

        // Guard released after resolution
        assert!(!h.orchestrator.is_in_flight(owner(), 8453).await);
    }

    #[tokio::test]
    async fn test_delegated_claim_signs_locally() {
        let mut api = MockClaimApi::new();
        api.expect_request_claim().times(1).returning(|_, _| {
            Ok(ClaimEndpointResponse::Delegated {
                contract_address: "0x7777777777777777777777777777777777777777"
                    .parse()
                    .expect("static address"),
                amount: Decimal::new(125, 1),
            })
        });

        let h = harness(FakeChainClient::confirming(8453), api).await;
        let id = seed_claimable(&h.store, 8453, "12.5").await;

        let attempt = h
            .orchestrator
            .claim(owner(), 8453, &[id])
            .await
            .expect("claim confirms through local signing");
        assert_eq!(attempt.state, ClaimState::Confirmed);
    }

    #[tokio::test]
    async fn test_invalid_claim_request_submits_nothing() {
        let mut api = MockClaimApi::new();
        api.expect_request_claim().times(0);
        let h = harness(FakeChainClient::confirming(8453), api).await;

        // Unknown record id on a chain with no cached slice
        let err = h
            .orchestrator
            .claim(owner(), 8453, &[Uuid::new_v4()])
            .await
            .expect_err("precondition violation");
        assert!(matches!(err, RewardError::InvalidClaimRequest(_)));
    }

    #[tokio::test]
    async fn test_failed_receipt_reverts_records() {
        let h = harness(FakeChainClient::reverting(8453), gasless_api(1)).await;
        let id = seed_claimable(&h.store, 8453, "3").await;

        let err = h
            .orchestrator
            .claim(owner(), 8453, &[id])
            .await
            .expect_err("reverted claim fails");
        assert!(matches!(err, RewardError::ClaimFailed { chain_id: 8453, .. }));
        assert!(err.is_retryable());

        // A record referenced by a failed attempt always reverts to
        // claimable, never stays processing.
        let records = h.store.records(owner(), 8453).await.expect("slice kept");
        assert_eq!(records[0].status, RewardStatus::Claimable);
        assert!(records[0].tx_hash.is_none());
    }

    #[tokio::test]
    async fn test_second_claim_rejected_while_first_in_flight() {
        let gate = Arc::new(Notify::new());
        let h = harness(FakeChainClient::gated(8453, gate.clone()), gasless_api(1)).await;
        let id = seed_claimable(&h.store, 8453, "1").await;

        let orchestrator = h.orchestrator.clone();
        let first = tokio::spawn(async move { orchestrator.claim(owner(), 8453, &[id]).await });

        // Let the first claim reach the receipt wait
        while !h.orchestrator.is_in_flight(owner(), 8453).await {
            tokio::task::yield_now().await;
        }

        let err = h
            .orchestrator
            .claim(owner(), 8453, &[id])
            .await
            .expect_err("idempotence guard trips");
        assert!(matches!(err, RewardError::ClaimAlreadyInFlight { chain_id: 8453, .. }));

        // Release the receipt watcher; exactly one transaction was tracked
        gate.notify_one();
        let attempt = first.await.expect("task joins").expect("first claim confirms");
        assert_eq!(attempt.state, ClaimState::Confirmed);
    }

    #[tokio::test]
    async fn test_confirmation_timeout_is_failure() {
        // Zero-second bound: the gated watcher never answers in time
        let config = Arc::new(ConfigManager::new("config/test.yaml"));
        let mut cfg = initialize_default_config();
        cfg.claim.confirm_timeout_secs = Some(0);
        config.update_config_in_memory(cfg).await;

        let store = Arc::new(RewardStore::new());
        let id = seed_claimable(&store, 56, "2").await;
        let (refresh_tx, _refresh_rx) = mpsc::channel(4);
        let mut clients: HashMap<u32, Arc<dyn ChainClient>> = HashMap::new();
        clients.insert(
            56,
            Arc::new(FakeChainClient::gated(56, Arc::new(Notify::new()))),
        );
        let orchestrator = ClaimOrchestrator::new(
            clients,
            Arc::new(gasless_api(1)),
            store.clone(),
            config,
            refresh_tx,
        );

        let err = orchestrator
            .claim(owner(), 56, &[id])
            .await
            .expect_err("timeout fails the claim");
        match err {
            RewardError::ClaimFailed { chain_id, reason } => {
                assert_eq!(chain_id, 56);
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let records = store.records(owner(), 56).await.expect("slice kept");
        assert_eq!(records[0].status, RewardStatus::Claimable);
    }

    #[tokio::test]
    async fn test_batch_partial_failure_reports_per_chain() {
        let config = Arc::new(ConfigManager::new("config/test.yaml"));
        config
            .update_config_in_memory(initialize_default_config())
            .await;
        let store = Arc::new(RewardStore::new());
        let (refresh_tx, _refresh_rx) = mpsc::channel(16);

        let mut clients: HashMap<u32, Arc<dyn ChainClient>> = HashMap::new();
        clients.insert(8453, Arc::new(FakeChainClient::confirming(8453)));
        clients.insert(56, Arc::new(FakeChainClient::reverting(56)));

        let orchestrator = ClaimOrchestrator::new(
            clients,
            Arc::new(gasless_api(2)),
            store.clone(),
            config,
            refresh_tx,
        );

        let base_id = seed_claimable(&store, 8453, "10").await;
        let bsc_id = seed_claimable(&store, 56, "5").await;

        let report = orchestrator.claim_all(owner(), &[8453, 56]).await;

        assert!(!report.is_full_success());
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].chain_id, 8453);
        assert_eq!(report.succeeded[0].record_ids, vec![base_id]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].chain_id, 56);
        assert!(report.failed[0].retryable);

        // Chain 8453 stayed claimed (its slice was invalidated for
        // refetch); chain 56 reverted to claimable for retry.
        assert!(store.records(owner(), 8453).await.is_none());
        let bsc_records = store.records(owner(), 56).await.expect("slice kept");
        let reverted = bsc_records.iter().find(|r| r.id == bsc_id).expect("present");
        assert_eq!(reverted.status, RewardStatus::Claimable);
    }
}
