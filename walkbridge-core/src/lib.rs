//! Walker bridge relay logic.
//! Host-driven: no I/O; host passes slot observations and performs the returned actions.

pub mod codec;
pub mod core;
pub mod poller;
pub mod protocol;

pub use codec::{decode_text, encode_hex, unwhiten, whiten, Packet, WHITEN_XOR};
pub use crate::core::{Action, RelayCore, RelayOptions};
pub use poller::ChangeDetector;
pub use protocol::{ChannelError, Channels, Target};
