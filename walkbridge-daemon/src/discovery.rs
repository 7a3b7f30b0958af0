//! Device discovery: pick the peripheral to connect to from a scan.

use std::time::Duration;

use tracing::{debug, info};
use walkbridge_core::Target;

use crate::transport::{DiscoveredDevice, Radio, TransportError};

/// Address to connect to. A configured address is used as is; otherwise scan and select.
pub async fn resolve_address(
    radio: &dyn Radio,
    target: &Target,
    scan_window: Duration,
) -> Result<String, TransportError> {
    if let Some(address) = &target.address {
        return Ok(address.clone());
    }
    info!(name = ?target.name, window = ?scan_window, "scanning for device");
    let devices = radio.scan(scan_window).await?;
    for d in &devices {
        debug!(address = %d.address, name = ?d.name, "found BLE device");
    }
    let chosen = select_device(&devices, target).ok_or(TransportError::DeviceNotFound)?;
    info!(address = %chosen.address, name = ?chosen.name, "selected device");
    Ok(chosen.address.clone())
}

/// Scan result to connect to: the device with the configured name, else the first device
/// with a non-empty name. Only consulted when no address is configured.
pub fn select_device<'a>(
    devices: &'a [DiscoveredDevice],
    target: &Target,
) -> Option<&'a DiscoveredDevice> {
    if let Some(name) = &target.name {
        if let Some(d) = devices.iter().find(|d| d.name.as_deref() == Some(name.as_str())) {
            return Some(d);
        }
    }
    devices
        .iter()
        .find(|d| d.name.as_deref().is_some_and(|n| !n.trim().is_empty()))
}
