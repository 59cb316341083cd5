//! Reward Service
//!
//! Central wiring of the reward reconciliation components: the source
//! adapter chain, the reward cache, the claim orchestrator and the
//! realtime notifier, plus the background tasks that keep the cache fresh
//! (a refresh queue consumer and an interval poller). The polling timer
//! and push events may both trigger a refresh for the same slice; the
//! cache's generation check makes that redundancy harmless.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{bail, Result};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregator::{self, RewardSummary};
use crate::cache::{CacheStats, RewardStore};
use crate::chain_adapters::{ChainClient, EvmAdapter};
use crate::claim::{BatchClaimReport, ClaimOrchestrator};
use crate::config::ConfigManager;
use crate::error::RewardError;
use crate::metric;
use crate::realtime::{ChannelStatus, PushTransport, RealtimeNotifier, WsPushTransport};
use crate::sources::{
    ApiSource, ClaimApi, ContractSource, FallbackSource, HttpClaimApi, RewardSource,
    SourceAdapterChain,
};
use crate::types::{ClaimAttempt, RealtimeEventKind, RefreshRequest, RewardRecord};

/// Environment variable holding the claim signer key
const SIGNER_KEY_ENV: &str = "REWARDBOT_SIGNER_KEY";

/// Health of one chain client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainHealth {
    /// Chain ID
    pub chain_id: u32,

    /// Whether the RPC endpoint answered
    pub healthy: bool,

    /// Latest block, when the endpoint answered
    pub latest_block: Option<u64>,
}

/// Service health snapshot served by the status API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Service name
    pub service: String,

    /// Crate version
    pub version: String,

    /// Per-chain RPC health
    pub chains: Vec<ChainHealth>,

    /// Reward cache statistics
    pub cache: CacheStats,

    /// Realtime channel state: connected, disconnected or degraded
    pub realtime: String,
}

/// The reward reconciliation service
pub struct RewardService {
    /// Configuration provider
    config: Arc<ConfigManager>,

    /// Chain clients by chain ID
    chain_clients: HashMap<u32, Arc<dyn ChainClient>>,

    /// Reward cache
    store: Arc<RewardStore>,

    /// Prioritized reward sources
    sources: Arc<SourceAdapterChain>,

    /// Claim orchestrator
    orchestrator: Arc<ClaimOrchestrator>,

    /// Realtime notifier, when the push channel is enabled
    notifier: Option<Arc<RealtimeNotifier>>,

    /// Producer side of the refresh queue
    refresh_tx: mpsc::Sender<RefreshRequest>,

    /// Consumer side, taken by `start`
    refresh_rx: Mutex<Option<mpsc::Receiver<RefreshRequest>>>,

    /// Owners the poller keeps fresh
    watched_owners: Arc<RwLock<HashSet<Address>>>,

    /// Shutdown signal for background tasks
    shutdown_tx: watch::Sender<bool>,

    /// Handles to background tasks spawned by `start`
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RewardService {
    /// Build the production wiring from configuration
    ///
    /// Creates an EVM adapter per active chain, the HTTP claim client and
    /// the standard source chain (contract, API, fallback). A chain whose
    /// RPC endpoint is unreachable still gets an adapter; its fetches
    /// degrade to the API source.
    pub async fn from_config(config: Arc<ConfigManager>) -> Result<Self> {
        let cfg = config.get_config().await;

        let mut clients: HashMap<u32, Arc<dyn ChainClient>> = HashMap::new();
        for (chain_id, chain_cfg) in &cfg.chains {
            if !chain_cfg.active {
                continue;
            }
            if !chain_cfg.chain_type.is_evm() {
                warn!(
                    "Chain {} is not EVM-compatible; rewards there are served by the API source only",
                    chain_id
                );
                continue;
            }

            let mut adapter = EvmAdapter::new(*chain_id, chain_cfg.clone())?
                .with_receipt_poll_interval(cfg.claim.receipt_poll_interval_ms);
            if let Ok(key) = std::env::var(SIGNER_KEY_ENV) {
                adapter = adapter.with_signer(&key)?;
            }
            adapter.init().await?;

            clients.insert(*chain_id, Arc::new(adapter));
        }

        let claim_api: Arc<dyn ClaimApi> = Arc::new(HttpClaimApi::new(&cfg.reward_api));

        let sources = Arc::new(SourceAdapterChain::new(vec![
            Arc::new(ContractSource::new(clients.clone(), config.clone())) as Arc<dyn RewardSource>,
            Arc::new(ApiSource::new(&cfg.reward_api)),
            Arc::new(FallbackSource),
        ]));

        let transport: Option<Arc<dyn PushTransport>> = if cfg.realtime.enabled {
            match &cfg.realtime.ws_url {
                Some(url) => Some(Arc::new(WsPushTransport::new(url))),
                None => {
                    warn!("Realtime channel enabled but no ws_url configured; polling only");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self::with_collaborators(config, clients, claim_api, sources, transport).await)
    }

    /// Assemble the service from explicit collaborators
    ///
    /// This is the injection seam: tests substitute fake chain clients,
    /// claim APIs, sources and transports here.
    pub async fn with_collaborators(
        config: Arc<ConfigManager>,
        chain_clients: HashMap<u32, Arc<dyn ChainClient>>,
        claim_api: Arc<dyn ClaimApi>,
        sources: Arc<SourceAdapterChain>,
        transport: Option<Arc<dyn PushTransport>>,
    ) -> Self {
        let cfg = config.get_config().await;
        let store = Arc::new(RewardStore::new());
        let (refresh_tx, refresh_rx) = mpsc::channel(64);
        let (shutdown_tx, _) = watch::channel(false);

        let orchestrator = Arc::new(ClaimOrchestrator::new(
            chain_clients.clone(),
            claim_api,
            store.clone(),
            config.clone(),
            refresh_tx.clone(),
        ));

        let notifier = transport
            .map(|transport| Arc::new(RealtimeNotifier::new(transport, cfg.realtime.clone())));

        Self {
            config,
            chain_clients,
            store,
            sources,
            orchestrator,
            notifier,
            refresh_tx,
            refresh_rx: Mutex::new(Some(refresh_rx)),
            watched_owners: Arc::new(RwLock::new(HashSet::new())),
            shutdown_tx,
            background_tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the background refresh consumer and the interval poller
    pub async fn start(&self) -> Result<()> {
        let refresh_rx = match self.refresh_rx.lock().await.take() {
            Some(rx) => rx,
            None => bail!("Reward service already started"),
        };

        info!("Starting reward service background tasks");
        let mut tasks = self.background_tasks.lock().await;

        // Refresh queue consumer: executes refetches triggered by claims,
        // push events and the poller.
        let sources = self.sources.clone();
        let store = self.store.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            Self::run_refresh_loop(refresh_rx, sources, store, shutdown_rx).await;
        }));

        // Interval poller: enqueues a refresh for every watched owner on
        // every active chain. This is also the fallback path when the
        // realtime channel degrades.
        let cfg = self.config.get_config().await;
        let poll_secs = cfg.general.poll_interval_secs.max(1);
        let chain_ids = cfg.active_chain_ids();
        let watched = self.watched_owners.clone();
        let refresh_tx = self.refresh_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(poll_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let owners = watched.read().await.clone();
                        for owner in owners {
                            for &chain_id in &chain_ids {
                                metric::record_refresh("poll");
                                let _ = refresh_tx.try_send(RefreshRequest {
                                    owner_address: owner,
                                    chain_id,
                                });
                            }
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Poller stopping on shutdown signal");
                            break;
                        }
                    }
                }
            }
        }));

        // Relay push events into the refresh queue.
        if let Some(notifier) = &self.notifier {
            let chain_ids = cfg.active_chain_ids();
            for kind in [
                RealtimeEventKind::NewReferral,
                RealtimeEventKind::RewardEarned,
                RealtimeEventKind::ReferralUpdate,
            ] {
                let refresh_tx = self.refresh_tx.clone();
                let chain_ids = chain_ids.clone();
                notifier
                    .subscribe(
                        kind,
                        Arc::new(move |event| {
                            let owner = match event.address {
                                Some(owner) => owner,
                                None => {
                                    debug!("Push event without an address, nothing to refresh");
                                    return;
                                }
                            };
                            let targets: Vec<u32> = match event.chain_id {
                                Some(chain_id) => vec![chain_id],
                                None => chain_ids.clone(),
                            };
                            for chain_id in targets {
                                metric::record_refresh("push");
                                let _ = refresh_tx.try_send(RefreshRequest {
                                    owner_address: owner,
                                    chain_id,
                                });
                            }
                        }),
                    )
                    .await;
            }
        }

        info!("Reward service started");
        Ok(())
    }

    /// Stop background tasks and close the realtime channel
    pub async fn stop(&self) {
        info!("Stopping reward service");
        let _ = self.shutdown_tx.send(true);

        if let Some(notifier) = &self.notifier {
            notifier.disconnect().await;
        }

        for task in self.background_tasks.lock().await.drain(..) {
            task.abort();
        }

        info!("Reward service stopped");
    }

    /// Track an owner: poll them on the refresh interval and scope the
    /// push channel to their address
    pub async fn watch_owner(&self, owner: Address) -> Result<()> {
        self.watched_owners.write().await.insert(owner);

        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.connect(owner).await {
                // Push is an enhancement; polling still covers this owner
                warn!("Realtime channel connect failed, continuing with polling: {}", e);
            }
        }

        Ok(())
    }

    /// Aggregated reward view for an owner on one chain
    ///
    /// Serves the cache when it is warm and runs the source adapter chain
    /// otherwise.
    pub async fn get_reward_summary(
        &self,
        owner: Address,
        chain_id: u32,
    ) -> Result<RewardSummary, RewardError> {
        let records = self.get_reward_records(owner, chain_id).await?;
        aggregator::aggregate(&records)
    }

    /// Raw reward records for an owner on one chain
    pub async fn get_reward_records(
        &self,
        owner: Address,
        chain_id: u32,
    ) -> Result<Vec<RewardRecord>, RewardError> {
        if let Some(records) = self.store.records(owner, chain_id).await {
            return Ok(records);
        }

        self.refresh(owner, chain_id).await?;
        Ok(self
            .store
            .records(owner, chain_id)
            .await
            .unwrap_or_default())
    }

    /// Refetch one slice through the source adapter chain and commit it
    pub async fn refresh(&self, owner: Address, chain_id: u32) -> Result<(), RewardError> {
        let generation = self.store.begin_fetch();
        let records = self.sources.fetch_rewards(owner, chain_id).await?;
        self.store.commit(owner, chain_id, generation, records).await;
        Ok(())
    }

    /// Claim specific records on one chain
    pub async fn claim(
        &self,
        owner: Address,
        chain_id: u32,
        record_ids: &[Uuid],
    ) -> Result<ClaimAttempt, RewardError> {
        self.orchestrator.claim(owner, chain_id, record_ids).await
    }

    /// Claim everything claimable across the given chains, chain by chain
    pub async fn claim_all(&self, owner: Address, chain_ids: &[u32]) -> BatchClaimReport {
        self.orchestrator.claim_all(owner, chain_ids).await
    }

    /// Whether the realtime channel has degraded to polling only
    pub fn is_degraded(&self) -> bool {
        match &self.notifier {
            Some(notifier) => *notifier.status().borrow() == ChannelStatus::Degraded,
            None => false,
        }
    }

    /// Reward cache statistics
    pub async fn cache_stats(&self) -> CacheStats {
        self.store.stats().await
    }

    /// Health snapshot served by the status API
    pub async fn health_snapshot(&self) -> HealthReport {
        let cfg = self.config.get_config().await;

        let mut chains = Vec::new();
        for (chain_id, client) in &self.chain_clients {
            match client.get_latest_block().await {
                Ok(block) => chains.push(ChainHealth {
                    chain_id: *chain_id,
                    healthy: true,
                    latest_block: Some(block),
                }),
                Err(e) => {
                    warn!("Health check failed for chain {}: {}", chain_id, e);
                    chains.push(ChainHealth {
                        chain_id: *chain_id,
                        healthy: false,
                        latest_block: None,
                    });
                }
            }
        }
        chains.sort_by_key(|c| c.chain_id);

        let realtime = match &self.notifier {
            Some(notifier) => match *notifier.status().borrow() {
                ChannelStatus::Connected => "connected",
                ChannelStatus::Disconnected => "disconnected",
                ChannelStatus::Degraded => "degraded",
            },
            None => "disabled",
        };

        HealthReport {
            service: cfg.general.service_name,
            version: env!("CARGO_PKG_VERSION").to_string(),
            chains,
            cache: self.store.stats().await,
            realtime: realtime.to_string(),
        }
    }

    /// The refresh queue consumer
    async fn run_refresh_loop(
        mut refresh_rx: mpsc::Receiver<RefreshRequest>,
        sources: Arc<SourceAdapterChain>,
        store: Arc<RewardStore>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                request = refresh_rx.recv() => {
                    match request {
                        Some(request) => {
                            let generation = store.begin_fetch();
                            match sources
                                .fetch_rewards(request.owner_address, request.chain_id)
                                .await
                            {
                                Ok(records) => {
                                    store
                                        .commit(
                                            request.owner_address,
                                            request.chain_id,
                                            generation,
                                            records,
                                        )
                                        .await;
                                }
                                Err(e) => {
                                    error!(
                                        "Refresh failed for {:?} on chain {}: {}",
                                        request.owner_address, request.chain_id, e
                                    );
                                }
                            }
                        }
                        None => {
                            debug!("Refresh queue closed, consumer stopping");
                            break;
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Refresh consumer stopping on shutdown signal");
                        break;
                    }
                }
            }
        }
    }
}
