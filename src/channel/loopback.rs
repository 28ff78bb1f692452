//! In-memory channel surface
//!
//! Implements [`ChannelSurface`] over a table of synthetic channels.
//! Sent messages are captured instead of serialised, and sends can be
//! forced to fail, which is what the dispatcher tests need to exercise
//! the rollback paths.

use super::{ChannelConfigIdx, ChannelSurface};
use crate::error::StatusCode;
use crate::message::Message;
use crate::types::ChannelHandle;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct ChannelRecord {
    config: ChannelConfigIdx,
    connected: bool,
}

/// A synthetic channel table capturing outgoing traffic
#[derive(Debug, Default)]
pub struct LoopbackChannels {
    channels: HashMap<ChannelHandle, ChannelRecord>,
    next_handle: u32,
    /// Everything sent through [`ChannelSurface::send_on_channel`]
    pub sent: Vec<(ChannelHandle, Message)>,
    /// Channel-level messages routed back to the transport
    pub channel_traffic: Vec<(ChannelHandle, Message)>,
    /// When set, every send is rejected with this status
    pub reject_sends: Option<StatusCode>,
    /// When false, `open_channel` refuses to produce new channels
    pub allow_open: bool,
}

impl LoopbackChannels {
    /// Empty surface
    pub fn new() -> Self {
        Self {
            allow_open: true,
            ..Default::default()
        }
    }

    /// Register a connected channel for `config`
    pub fn add_channel(&mut self, config: ChannelConfigIdx) -> ChannelHandle {
        self.next_handle += 1;
        let handle = ChannelHandle(self.next_handle);
        self.channels.insert(
            handle,
            ChannelRecord {
                config,
                connected: true,
            },
        );
        handle
    }

    /// Drop a channel from the table
    pub fn drop_channel(&mut self, channel: ChannelHandle) {
        self.channels.remove(&channel);
    }

    /// Mark a channel disconnected without removing it
    pub fn disconnect(&mut self, channel: ChannelHandle) {
        if let Some(rec) = self.channels.get_mut(&channel) {
            rec.connected = false;
        }
    }

    /// Messages sent on `channel`, in order
    pub fn sent_on(&self, channel: ChannelHandle) -> Vec<&Message> {
        self.sent
            .iter()
            .filter(|(ch, _)| *ch == channel)
            .map(|(_, m)| m)
            .collect()
    }
}

impl ChannelSurface for LoopbackChannels {
    fn is_valid_channel(&self, channel: ChannelHandle) -> bool {
        self.channels.contains_key(&channel)
    }

    fn is_client_channel(&self, channel: ChannelHandle) -> bool {
        self.channels
            .get(&channel)
            .map(|rec| rec.config.is_client_role())
            .unwrap_or(false)
    }

    fn is_connected(&self, channel: ChannelHandle) -> bool {
        self.channels
            .get(&channel)
            .map(|rec| rec.connected)
            .unwrap_or(false)
    }

    fn config_index(&self, channel: ChannelHandle) -> Option<ChannelConfigIdx> {
        self.channels.get(&channel).map(|rec| rec.config)
    }

    fn send_on_channel(&mut self, channel: ChannelHandle, message: Message) -> StatusCode {
        if let Some(status) = self.reject_sends {
            return status;
        }
        if !self.is_connected(channel) {
            return StatusCode::BadSecureChannelClosed;
        }
        self.sent.push((channel, message));
        StatusCode::Good
    }

    fn lookup_by_config(&self, config: ChannelConfigIdx) -> Option<ChannelHandle> {
        self.channels
            .iter()
            .find(|(_, rec)| rec.config == config && rec.connected)
            .map(|(handle, _)| *handle)
    }

    fn open_channel(&mut self, config: ChannelConfigIdx) -> Option<ChannelHandle> {
        if self.allow_open {
            Some(self.add_channel(config))
        } else {
            None
        }
    }

    fn receive_channel_message(&mut self, channel: ChannelHandle, message: Message) {
        self.channel_traffic.push((channel, message));
    }

    fn channel_lost(&mut self, channel: ChannelHandle) {
        self.drop_channel(channel);
    }
}
