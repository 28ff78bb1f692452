//! Request-handle allocation and correlation
//!
//! Handles are minted per outbound request and carry the expected
//! response type. A response is only delivered when the handle exists
//! and the types match. The client side additionally maps each handle
//! back to the session that issued it.

use crate::message::MessageType;
use crate::types::{RequestHandle, SessionId};
use std::collections::HashMap;

/// Dense table mapping handle → expected response type (+ issuing
/// session, client side)
#[derive(Debug, Default)]
pub struct RequestHandleTable {
    next: u32,
    expected: HashMap<RequestHandle, MessageType>,
    session_of: HashMap<RequestHandle, SessionId>,
}

impl RequestHandleTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh handle expecting `resp_type`
    ///
    /// Handles are non-zero and never collide with an outstanding entry;
    /// the counter wraps, so values recycle only long after removal.
    pub fn fresh(&mut self, resp_type: MessageType) -> RequestHandle {
        loop {
            self.next = self.next.wrapping_add(1);
            if self.next == 0 {
                continue;
            }
            let handle = RequestHandle(self.next);
            if !self.expected.contains_key(&handle) {
                self.expected.insert(handle, resp_type);
                return handle;
            }
        }
    }

    /// True when the handle exists and `actual` matches its expectation
    pub fn validate(&self, handle: RequestHandle, actual: MessageType) -> bool {
        self.expected.get(&handle) == Some(&actual)
    }

    /// Does the handle exist at all
    pub fn is_outstanding(&self, handle: RequestHandle) -> bool {
        self.expected.contains_key(&handle)
    }

    /// Remove the handle; always succeeds
    pub fn remove(&mut self, handle: RequestHandle) {
        self.expected.remove(&handle);
        self.session_of.remove(&handle);
    }

    /// Number of outstanding handles
    pub fn outstanding(&self) -> usize {
        self.expected.len()
    }

    /// Client side: remember which session issued the handle
    pub fn bind_session(&mut self, handle: RequestHandle, session: SessionId) {
        self.session_of.insert(handle, session);
    }

    /// Client side: the issuing session, with the binding removed
    pub fn take_session(&mut self, handle: RequestHandle) -> Option<SessionId> {
        self.session_of.remove(&handle)
    }

    /// Client side: the issuing session, binding kept
    pub fn session_of(&self, handle: RequestHandle) -> Option<SessionId> {
        self.session_of.get(&handle).copied()
    }

    /// Drop every handle bound to `session`, returning them
    pub fn remove_all_for_session(&mut self, session: SessionId) -> Vec<RequestHandle> {
        let handles: Vec<RequestHandle> = self
            .session_of
            .iter()
            .filter(|(_, s)| **s == session)
            .map(|(h, _)| *h)
            .collect();
        for handle in &handles {
            self.remove(*handle);
        }
        handles
    }
}
