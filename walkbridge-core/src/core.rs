//! Host-driven API: RelayCore receives slot observations from the host, returns actions.

use std::time::SystemTime;

use crate::codec::{self, Packet};
use crate::poller::ChangeDetector;

/// Whitening applied at the two ends of the relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOptions {
    /// Unwhiten request bytes read from the request slot.
    pub unwhiten_inbound: bool,
    /// Whiten reply bytes before writing the response slot.
    pub whiten_outbound: bool,
}

/// What the host should do with a freshly read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Request decoded to nothing: write an empty response, skip the transport.
    RespondEmpty,
    /// Send this packet to the peripheral (or echo it when no radio is configured).
    Forward(Packet),
}

/// Relay coordinator. One instance per bridge; holds only the change detector.
#[derive(Debug, Default)]
pub struct RelayCore {
    options: RelayOptions,
    detector: ChangeDetector,
}

impl RelayCore {
    pub fn new(options: RelayOptions) -> Self {
        Self {
            options,
            detector: ChangeDetector::new(),
        }
    }

    pub fn options(&self) -> RelayOptions {
        self.options
    }

    /// On each poll: pass the request slot's modification time (`None` if absent).
    /// True means a new request is waiting.
    pub fn on_poll(&mut self, modified: Option<SystemTime>) -> bool {
        self.detector.observe(modified)
    }

    /// On request content read from the slot.
    pub fn on_request_text(&self, text: &str) -> Action {
        let packet = codec::decode_text(text);
        if packet.is_empty() {
            return Action::RespondEmpty;
        }
        if self.options.unwhiten_inbound {
            return Action::Forward(codec::unwhiten(packet.as_bytes()));
        }
        Action::Forward(packet)
    }

    /// On a reply (from the peripheral, echo, or empty after a failure). Returns the bytes to persist.
    pub fn on_reply(&self, reply: Packet) -> Packet {
        if self.options.whiten_outbound {
            return codec::whiten(reply.as_bytes());
        }
        reply
    }
}
