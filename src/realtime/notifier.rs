//! Realtime Notifier
//!
//! Explicitly constructed and injected wherever it is needed; owns a
//! background task that reads events from the transport and dispatches
//! them to subscribers. On an unexpected close it reconnects with a fixed
//! delay up to a bounded attempt count - no backoff, no jitter - and after
//! exhausting its attempts it stops and latches `Degraded` so the host
//! can fall back to polling.

use std::collections::HashMap;
use std::sync::Arc;

use ethers::types::Address;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RealtimeConfig;
use crate::metric;
use crate::realtime::PushTransport;
use crate::types::{RealtimeEvent, RealtimeEventKind};

/// Handle returned by `subscribe`, used to unsubscribe
pub type SubscriptionId = Uuid;

/// Callback invoked for each delivered event
pub type EventCallback = Arc<dyn Fn(RealtimeEvent) + Send + Sync>;

/// Observable state of the push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// Not connected (initial state, or between reconnect attempts)
    Disconnected,

    /// Connected and delivering events
    Connected,

    /// Reconnect attempts exhausted; only polling remains
    Degraded,
}

/// Subscriber registry shared with the dispatch task
type Subscribers = Arc<RwLock<HashMap<RealtimeEventKind, HashMap<SubscriptionId, EventCallback>>>>;

/// Reconnecting push-event relay
pub struct RealtimeNotifier {
    /// Underlying transport
    transport: Arc<dyn PushTransport>,

    /// Registered callbacks by event kind
    subscribers: Subscribers,

    /// Channel status, observable by the host
    status_tx: watch::Sender<ChannelStatus>,

    /// Reconnect policy
    config: RealtimeConfig,

    /// Stop signal for the dispatch task
    running_tx: watch::Sender<bool>,

    /// Dispatch task handle
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeNotifier {
    /// Create a notifier over a transport; call `connect` to start it
    pub fn new(transport: Arc<dyn PushTransport>, config: RealtimeConfig) -> Self {
        let (status_tx, _) = watch::channel(ChannelStatus::Disconnected);
        let (running_tx, _) = watch::channel(false);

        Self {
            transport,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            status_tx,
            config,
            running_tx,
            task: Mutex::new(None),
        }
    }

    /// Open the channel for an address and start dispatching events
    pub async fn connect(&self, address: Address) -> anyhow::Result<()> {
        self.transport.connect(address).await?;
        let _ = self.status_tx.send(ChannelStatus::Connected);
        let _ = self.running_tx.send(true);
        info!("Realtime channel connected for {:?}", address);

        let transport = self.transport.clone();
        let subscribers = self.subscribers.clone();
        let status_tx = self.status_tx.clone();
        let running_rx = self.running_tx.subscribe();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            Self::run_dispatch_task(address, transport, subscribers, status_tx, running_rx, config)
                .await;
        });

        let mut task = self.task.lock().await;
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }

        Ok(())
    }

    /// Register a callback for one event kind
    pub async fn subscribe(
        &self,
        kind: RealtimeEventKind,
        callback: EventCallback,
    ) -> SubscriptionId {
        let id = Uuid::new_v4();
        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(kind).or_default().insert(id, callback);
        debug!("Subscribed {} to {:?} events", id, kind);
        id
    }

    /// Remove a subscription; returns whether it existed
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        for callbacks in subscribers.values_mut() {
            if callbacks.remove(&id).is_some() {
                debug!("Unsubscribed {}", id);
                return true;
            }
        }
        false
    }

    /// Whether the channel is currently delivering events
    pub fn is_connected(&self) -> bool {
        *self.status_tx.borrow() == ChannelStatus::Connected
    }

    /// Watch the channel status; the host uses this to detect degradation
    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_tx.subscribe()
    }

    /// Stop dispatching and close the channel
    pub async fn disconnect(&self) {
        let _ = self.running_tx.send(false);

        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!("Error closing realtime transport: {}", e);
        }

        let _ = self.status_tx.send(ChannelStatus::Disconnected);
        info!("Realtime channel disconnected");
    }

    /// Event read/dispatch loop with fixed-delay bounded reconnects
    async fn run_dispatch_task(
        address: Address,
        transport: Arc<dyn PushTransport>,
        subscribers: Subscribers,
        status_tx: watch::Sender<ChannelStatus>,
        mut running_rx: watch::Receiver<bool>,
        config: RealtimeConfig,
    ) {
        loop {
            if !*running_rx.borrow_and_update() {
                debug!("Realtime dispatch task stopping on request");
                break;
            }

            match transport.next_event().await {
                Ok(event) => {
                    Self::dispatch(&subscribers, event).await;
                }
                Err(e) => {
                    warn!("Realtime channel lost: {}", e);
                    let _ = status_tx.send(ChannelStatus::Disconnected);

                    if !Self::reconnect(address, &transport, &status_tx, &running_rx, &config).await
                    {
                        break;
                    }
                }
            }
        }
    }

    /// Invoke every callback registered for the event's kind
    async fn dispatch(subscribers: &Subscribers, event: RealtimeEvent) {
        let subscribers = subscribers.read().await;
        if let Some(callbacks) = subscribers.get(&event.kind) {
            debug!(
                "Dispatching {:?} event to {} subscribers",
                event.kind,
                callbacks.len()
            );
            for callback in callbacks.values() {
                callback(event.clone());
            }
        }
    }

    /// Fixed-delay reconnect loop
    ///
    /// Returns `false` when the attempts are exhausted (channel degraded)
    /// or the notifier was stopped.
    async fn reconnect(
        address: Address,
        transport: &Arc<dyn PushTransport>,
        status_tx: &watch::Sender<ChannelStatus>,
        running_rx: &watch::Receiver<bool>,
        config: &RealtimeConfig,
    ) -> bool {
        let delay = Duration::from_secs(config.reconnect_delay_secs);

        for attempt in 1..=config.max_reconnect_attempts {
            if !*running_rx.borrow() {
                return false;
            }

            sleep(delay).await;
            metric::record_reconnect(attempt);

            match transport.connect(address).await {
                Ok(()) => {
                    info!(
                        "Realtime channel reconnected on attempt {}/{}",
                        attempt, config.max_reconnect_attempts
                    );
                    let _ = status_tx.send(ChannelStatus::Connected);
                    return true;
                }
                Err(e) => {
                    warn!(
                        "Reconnect attempt {}/{} failed: {}",
                        attempt, config.max_reconnect_attempts, e
                    );
                }
            }
        }

        error!(
            "Realtime channel degraded after {} reconnect attempts, falling back to polling",
            config.max_reconnect_attempts
        );
        let _ = status_tx.send(ChannelStatus::Degraded);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn owner() -> Address {
        "0x8888888888888888888888888888888888888888"
            .parse()
            .expect("static address")
    }

    fn reward_event() -> RealtimeEvent {
        RealtimeEvent {
            kind: RealtimeEventKind::RewardEarned,
            address: Some(owner()),
            chain_id: Some(8453),
            data: serde_json::Value::Null,
        }
    }

    /// Transport fake fed from an mpsc queue; `None` in the queue models a
    /// dropped connection
    struct ScriptedTransport {
        events: Mutex<mpsc::Receiver<Option<RealtimeEvent>>>,
        reconnect_succeeds: AtomicBool,
        connects: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(reconnect_succeeds: bool) -> (Arc<Self>, mpsc::Sender<Option<RealtimeEvent>>) {
            let (tx, rx) = mpsc::channel(32);
            let transport = Arc::new(Self {
                events: Mutex::new(rx),
                reconnect_succeeds: AtomicBool::new(reconnect_succeeds),
                connects: AtomicUsize::new(0),
            });
            (transport, tx)
        }
    }

    #[async_trait]
    impl PushTransport for ScriptedTransport {
        async fn connect(&self, _address: Address) -> Result<()> {
            let attempt = self.connects.fetch_add(1, Ordering::SeqCst);
            // First connect always succeeds; reconnects are scripted
            if attempt == 0 || self.reconnect_succeeds.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(anyhow!("backend still unreachable"))
            }
        }

        async fn next_event(&self) -> Result<RealtimeEvent> {
            let mut events = self.events.lock().await;
            match events.recv().await {
                Some(Some(event)) => Ok(event),
                Some(None) => Err(anyhow!("connection closed")),
                None => {
                    // Script exhausted: behave like a silent connection
                    futures::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
    }

    fn fast_config(max_attempts: u32) -> RealtimeConfig {
        RealtimeConfig {
            enabled: true,
            ws_url: None,
            reconnect_delay_secs: 0,
            max_reconnect_attempts: max_attempts,
        }
    }

    async fn wait_for<F: Fn() -> bool>(predicate: F) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[test_log::test(tokio::test)]
    async fn test_events_reach_subscribers() {
        let (transport, tx) = ScriptedTransport::new(true);
        let notifier = RealtimeNotifier::new(transport, fast_config(3));

        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        notifier
            .subscribe(
                RealtimeEventKind::RewardEarned,
                Arc::new(move |_event| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;

        notifier.connect(owner()).await.expect("connects");
        assert!(notifier.is_connected());

        tx.send(Some(reward_event())).await.expect("queued");
        tx.send(Some(reward_event())).await.expect("queued");

        wait_for(|| received.load(Ordering::SeqCst) == 2).await;
        notifier.disconnect().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_unsubscribed_callback_stops_firing() {
        let (transport, tx) = ScriptedTransport::new(true);
        let notifier = RealtimeNotifier::new(transport, fast_config(3));

        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        let id = notifier
            .subscribe(
                RealtimeEventKind::NewReferral,
                Arc::new(move |_event| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;

        assert!(notifier.unsubscribe(id).await);
        assert!(!notifier.unsubscribe(id).await);

        notifier.connect(owner()).await.expect("connects");
        let mut event = reward_event();
        event.kind = RealtimeEventKind::NewReferral;
        tx.send(Some(event)).await.expect("queued");

        sleep(Duration::from_millis(50)).await;
        assert_eq!(received.load(Ordering::SeqCst), 0);
        notifier.disconnect().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_reconnect_after_drop_keeps_delivering() {
        let (transport, tx) = ScriptedTransport::new(true);
        let notifier = RealtimeNotifier::new(transport.clone(), fast_config(3));

        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        notifier
            .subscribe(
                RealtimeEventKind::RewardEarned,
                Arc::new(move |_event| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;

        notifier.connect(owner()).await.expect("connects");

        // Drop the connection, then deliver another event post-reconnect
        tx.send(None).await.expect("queued drop");
        tx.send(Some(reward_event())).await.expect("queued");

        wait_for(|| received.load(Ordering::SeqCst) == 1).await;
        assert!(notifier.is_connected());
        // Initial connect plus one successful reconnect
        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
        notifier.disconnect().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_exhausted_reconnects_latch_degraded() {
        let (transport, tx) = ScriptedTransport::new(false);
        let notifier = RealtimeNotifier::new(transport.clone(), fast_config(3));
        let mut status = notifier.status();

        notifier.connect(owner()).await.expect("connects");
        tx.send(None).await.expect("queued drop");

        // Wait until the status watch reports degradation
        loop {
            status.changed().await.expect("status channel alive");
            if *status.borrow() == ChannelStatus::Degraded {
                break;
            }
        }

        assert!(!notifier.is_connected());
        // Initial connect plus the three failed reconnect attempts
        assert_eq!(transport.connects.load(Ordering::SeqCst), 4);
    }
}
