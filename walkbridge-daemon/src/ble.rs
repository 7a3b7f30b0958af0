//! btleplug implementation of the radio capability.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{Stream, StreamExt};
use tracing::debug;
use uuid::Uuid;

use crate::transport::{DiscoveredDevice, Link, Radio, TransportError};

type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

fn radio_err(e: btleplug::Error) -> TransportError {
    TransportError::Radio(e.to_string())
}

/// First Bluetooth adapter of the host.
pub struct BleRadio {
    adapter: Adapter,
    /// Used when `connect` is asked for an address the adapter has not seen yet.
    scan_window: Duration,
}

impl BleRadio {
    pub async fn new(scan_window: Duration) -> Result<Self, TransportError> {
        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::TransportUnavailable(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| TransportError::TransportUnavailable(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::TransportUnavailable("no Bluetooth adapter".into()))?;
        Ok(Self {
            adapter,
            scan_window,
        })
    }

    async fn scan_peripherals(&self, window: Duration) -> Result<Vec<Peripheral>, TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(radio_err)?;
        tokio::time::sleep(window).await;
        let found = self.adapter.peripherals().await.map_err(radio_err);
        if let Err(e) = self.adapter.stop_scan().await {
            debug!(error = %e, "stop_scan failed");
        }
        found
    }

    async fn find(&self, address: &str) -> Result<Option<Peripheral>, TransportError> {
        let known = self.adapter.peripherals().await.map_err(radio_err)?;
        Ok(known
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address)))
    }
}

#[async_trait]
impl Radio for BleRadio {
    async fn scan(&self, window: Duration) -> Result<Vec<DiscoveredDevice>, TransportError> {
        let peripherals = self.scan_peripherals(window).await?;
        let mut out = Vec::with_capacity(peripherals.len());
        for p in peripherals {
            let name = match p.properties().await {
                Ok(Some(props)) => props.local_name,
                _ => None,
            };
            out.push(DiscoveredDevice {
                address: p.address().to_string(),
                name,
            });
        }
        Ok(out)
    }

    async fn connect(&self, address: &str) -> Result<Box<dyn Link>, TransportError> {
        let peripheral = match self.find(address).await? {
            Some(p) => p,
            None => {
                self.scan_peripherals(self.scan_window).await?;
                self.find(address)
                    .await?
                    .ok_or(TransportError::DeviceNotFound)?
            }
        };
        peripheral.connect().await.map_err(radio_err)?;
        let link = BleLink {
            peripheral,
            notifications: None,
        };
        if let Err(e) = link.peripheral.discover_services().await {
            if let Err(d) = link.peripheral.disconnect().await {
                debug!(error = %d, "disconnect after failed service discovery");
            }
            return Err(radio_err(e));
        }
        Ok(Box::new(link))
    }
}

/// Connected peripheral with its notification stream (opened on subscribe).
struct BleLink {
    peripheral: Peripheral,
    notifications: Option<Notifications>,
}

impl BleLink {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicMissing(uuid))
    }
}

#[async_trait]
impl Link for BleLink {
    async fn subscribe(&mut self, channel: Uuid) -> Result<(), TransportError> {
        let c = self.characteristic(channel)?;
        // Stream first: replies can arrive as soon as the CCCD is written.
        self.notifications = Some(self.peripheral.notifications().await.map_err(radio_err)?);
        self.peripheral.subscribe(&c).await.map_err(radio_err)
    }

    async fn write(&mut self, channel: Uuid, payload: &[u8]) -> Result<(), TransportError> {
        let c = self.characteristic(channel)?;
        let kind = if c.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.peripheral
            .write(&c, payload, kind)
            .await
            .map_err(radio_err)
    }

    async fn next_notification(&mut self, channel: Uuid) -> Result<Vec<u8>, TransportError> {
        let stream = self
            .notifications
            .as_mut()
            .ok_or_else(|| TransportError::Radio("not subscribed".into()))?;
        while let Some(n) = stream.next().await {
            if n.uuid == channel {
                return Ok(n.value);
            }
            debug!(uuid = %n.uuid, "ignoring notification on other characteristic");
        }
        Err(TransportError::Radio("notification stream closed".into()))
    }

    async fn unsubscribe(&mut self, channel: Uuid) -> Result<(), TransportError> {
        self.notifications = None;
        let c = self.characteristic(channel)?;
        self.peripheral.unsubscribe(&c).await.map_err(radio_err)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.notifications = None;
        self.peripheral.disconnect().await.map_err(radio_err)
    }
}
