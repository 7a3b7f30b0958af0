//! BLE transaction: subscribe, write, await one notification (with timeout), always tear down.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;
use walkbridge_core::{Channels, Packet, Target};

use crate::discovery;

/// A device seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: String,
    pub name: Option<String>,
}

/// Transport failures. All of them degrade to an empty reply in the bridge.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no BLE device found")]
    DeviceNotFound,
    #[error("BLE transaction timed out after {0:?}")]
    TransactionTimeout(Duration),
    #[error("BLE unavailable: {0}")]
    TransportUnavailable(String),
    #[error("characteristic {0} not found on device")]
    CharacteristicMissing(Uuid),
    #[error("radio error: {0}")]
    Radio(String),
}

/// Radio capability: scan and open links. Implemented over btleplug and by test stubs.
#[async_trait]
pub trait Radio: Send + Sync {
    async fn scan(&self, window: Duration) -> Result<Vec<DiscoveredDevice>, TransportError>;
    async fn connect(&self, address: &str) -> Result<Box<dyn Link>, TransportError>;
}

/// One connected peripheral. Dropped after `disconnect`.
#[async_trait]
pub trait Link: Send {
    async fn subscribe(&mut self, channel: Uuid) -> Result<(), TransportError>;
    async fn write(&mut self, channel: Uuid, payload: &[u8]) -> Result<(), TransportError>;
    /// Next notification on `channel`; pending until one arrives.
    async fn next_notification(&mut self, channel: Uuid) -> Result<Vec<u8>, TransportError>;
    async fn unsubscribe(&mut self, channel: Uuid) -> Result<(), TransportError>;
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Per-transaction timing.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Bound on connect, on subscribe + write + reply, and on each teardown step.
    pub timeout: Duration,
    /// Scan length when the device must be discovered.
    pub scan_window: Duration,
}

/// Run one request/reply transaction against the target device.
/// The link is disconnected on every path; the first notification is the whole reply.
/// Connect, the exchange and each teardown step are each bounded by `timing.timeout`.
pub async fn transact(
    radio: &dyn Radio,
    target: &Target,
    channels: &Channels,
    payload: &[u8],
    timing: Timing,
) -> Result<Packet, TransportError> {
    let address = discovery::resolve_address(radio, target, timing.scan_window).await?;
    debug!(%address, "connecting");
    let mut link = bounded(timing.timeout, radio.connect(&address)).await?;
    debug!(%address, "connected");
    let result = exchange(link.as_mut(), channels, payload, timing.timeout).await;
    if let Err(e) = bounded(timing.timeout, link.disconnect()).await {
        warn!(%address, error = %e, "disconnect failed");
    }
    result
}

async fn exchange(
    link: &mut dyn Link,
    channels: &Channels,
    payload: &[u8],
    timeout: Duration,
) -> Result<Packet, TransportError> {
    let result = bounded(timeout, async {
        // Subscribe first so a fast reply is not missed.
        link.subscribe(channels.notify).await?;
        link.write(channels.write, payload).await?;
        link.next_notification(channels.notify).await.map(Packet::from)
    })
    .await;
    if let Err(e) = bounded(timeout, link.unsubscribe(channels.notify)).await {
        warn!(error = %e, "unsubscribe failed");
    }
    result
}

/// `TransactionTimeout` when `fut` does not finish within `limit`; the pending future is dropped.
async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(TransportError::TransactionTimeout(limit)))
}
