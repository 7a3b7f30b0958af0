//! Walker link identifiers: the GATT characteristics and the device to reach.

use uuid::Uuid;

/// Write and notify characteristics of the peripheral's service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channels {
    /// Requests are written here.
    pub write: Uuid,
    /// Replies arrive as notifications here.
    pub notify: Uuid,
}

impl Channels {
    pub fn new(write: Uuid, notify: Uuid) -> Self {
        Self { write, notify }
    }

    /// Build from optional configured values; both are required together.
    pub fn from_parts(write: Option<&str>, notify: Option<&str>) -> Result<Self, ChannelError> {
        let write = write.ok_or(ChannelError::Missing("write"))?;
        let notify = notify.ok_or(ChannelError::Missing("notify"))?;
        Ok(Self {
            write: parse_uuid("write", write)?,
            notify: parse_uuid("notify", notify)?,
        })
    }
}

fn parse_uuid(which: &'static str, s: &str) -> Result<Uuid, ChannelError> {
    Uuid::parse_str(s.trim()).map_err(|e| ChannelError::Invalid {
        which,
        value: s.to_string(),
        source: e,
    })
}

/// Bad or incomplete characteristic configuration.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("{0} characteristic UUID is required when a BLE device is configured")]
    Missing(&'static str),
    #[error("invalid {which} characteristic UUID {value:?}: {source}")]
    Invalid {
        which: &'static str,
        value: String,
        #[source]
        source: uuid::Error,
    },
}

/// Which peripheral to talk to. Address wins over name when both are set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    pub address: Option<String>,
    pub name: Option<String>,
}

impl Target {
    pub fn new(address: Option<String>, name: Option<String>) -> Self {
        let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            address: clean(address),
            name: clean(name),
        }
    }

    /// True when a radio transaction should be attempted (otherwise the relay echoes).
    pub fn is_configured(&self) -> bool {
        self.address.is_some() || self.name.is_some()
    }
}
