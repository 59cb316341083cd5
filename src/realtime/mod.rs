//! Realtime notification channel
//!
//! A reconnecting subscription over a [`PushTransport`] that relays
//! referral/reward events to registered callbacks. The notifier owns no
//! reward data; it is a relay with a reconnection policy. When reconnect
//! attempts are exhausted it latches a degraded state so the host falls
//! back to interval polling.

pub mod notifier;
pub mod ws_transport;

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::Address;

use crate::types::RealtimeEvent;

pub use notifier::{ChannelStatus, RealtimeNotifier, SubscriptionId};
pub use ws_transport::WsPushTransport;

/// Transport the notifier subscribes through
///
/// Implementations connect to a backend scoped to one address and yield
/// events until the connection drops; `next_event` returning an error
/// means the connection is gone and the notifier should reconnect.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    /// Open the channel for an address, replacing any previous connection
    async fn connect(&self, address: Address) -> Result<()>;

    /// Receive the next event; errors signal a lost connection
    async fn next_event(&self) -> Result<RealtimeEvent>;

    /// Close the channel
    async fn disconnect(&self) -> Result<()>;
}
