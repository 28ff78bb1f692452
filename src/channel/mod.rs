//! Secure-channel configuration indices and the transport-facing seam
//!
//! The transport owns channel lifecycles; the core consumes a small
//! surface: handle validity, role, connectivity, configuration lookup and
//! a non-blocking send. Configuration indices for client and server
//! connections live in disjoint ranges so a bare integer always reveals
//! the role.

pub mod loopback;

pub use loopback::LoopbackChannels;

use crate::error::StatusCode;
use crate::message::Message;
use crate::types::ChannelHandle;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest client-side configuration index; server-side indices start
/// right above
pub const MAX_CLIENT_CONFIG_INDEXES: u32 = 0x0000_FFFF;

/// Non-zero secure-channel configuration index encoding the role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelConfigIdx(u32);

impl ChannelConfigIdx {
    /// Client-side index, `1..=MAX_CLIENT_CONFIG_INDEXES`
    pub fn client(n: u32) -> Option<Self> {
        if n >= 1 && n <= MAX_CLIENT_CONFIG_INDEXES {
            Some(Self(n))
        } else {
            None
        }
    }

    /// Server-side index, offset into the upper range
    pub fn server(n: u32) -> Option<Self> {
        if n >= 1 && n <= u32::MAX - MAX_CLIENT_CONFIG_INDEXES {
            Some(Self(MAX_CLIENT_CONFIG_INDEXES + n))
        } else {
            None
        }
    }

    /// Reconstruct from a raw non-zero integer
    pub fn from_raw(raw: u32) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// The raw integer
    pub fn raw(self) -> u32 {
        self.0
    }

    /// True when the index lies in the client range
    pub fn is_client_role(self) -> bool {
        self.0 <= MAX_CLIENT_CONFIG_INDEXES
    }
}

impl fmt::Display for ChannelConfigIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_client_role() {
            write!(f, "cfg/cli#{}", self.0)
        } else {
            write!(f, "cfg/srv#{}", self.0 - MAX_CLIENT_CONFIG_INDEXES)
        }
    }
}

/// The channel operations the core consumes
///
/// `send_on_channel` is fire-and-forget from the dispatcher's viewpoint,
/// but the surface may reject synchronously; the returned status is the
/// only feedback. Buffers are transferred on enqueue — the dispatcher
/// never touches a message again after handing it over.
pub trait ChannelSurface {
    /// Does the handle resolve to a live channel
    fn is_valid_channel(&self, channel: ChannelHandle) -> bool;

    /// Is the channel client-initiated
    fn is_client_channel(&self, channel: ChannelHandle) -> bool;

    /// Is the channel currently connected
    fn is_connected(&self, channel: ChannelHandle) -> bool;

    /// Configuration index of the channel
    fn config_index(&self, channel: ChannelHandle) -> Option<ChannelConfigIdx>;

    /// Enqueue a message; non-blocking
    fn send_on_channel(&mut self, channel: ChannelHandle, message: Message) -> StatusCode;

    /// A connected channel for the configuration, when one exists
    fn lookup_by_config(&self, config: ChannelConfigIdx) -> Option<ChannelHandle>;

    /// Ask the transport to open a channel for the configuration
    fn open_channel(&mut self, config: ChannelConfigIdx) -> Option<ChannelHandle>;

    /// Channel-level traffic (HELLO/ACK, open/close secure channel)
    fn receive_channel_message(&mut self, channel: ChannelHandle, message: Message);

    /// Notification that the core finished cleaning up after a loss
    fn channel_lost(&mut self, channel: ChannelHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ranges_are_disjoint() {
        let cli = ChannelConfigIdx::client(1).unwrap();
        let srv = ChannelConfigIdx::server(1).unwrap();
        assert!(cli.is_client_role());
        assert!(!srv.is_client_role());
        assert_ne!(cli.raw(), srv.raw());
    }

    #[test]
    fn test_zero_and_overflow_rejected() {
        assert!(ChannelConfigIdx::client(0).is_none());
        assert!(ChannelConfigIdx::server(0).is_none());
        assert!(ChannelConfigIdx::client(MAX_CLIENT_CONFIG_INDEXES + 1).is_none());
        assert!(ChannelConfigIdx::from_raw(0).is_none());
    }

    #[test]
    fn test_raw_roundtrip_preserves_role() {
        let srv = ChannelConfigIdx::server(9).unwrap();
        let back = ChannelConfigIdx::from_raw(srv.raw()).unwrap();
        assert!(!back.is_client_role());
        assert_eq!(back, srv);
    }
}
