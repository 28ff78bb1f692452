//! Common identifier types used throughout the stack core

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a session record inside the registry
///
/// Purely local; never leaves the process. The wire-visible identifier is
/// the [`SessionToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s#{}", self.0)
    }
}

/// Opaque server-minted session token
///
/// Attached by the client to every session-scoped request. Non-zero;
/// unique across live sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(pub u32);

impl SessionToken {
    /// A zero token never identifies a session
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tok#{:08x}", self.0)
    }
}

/// Correlation identifier minted per outbound request
///
/// Echoed by the peer in the matching response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestHandle(pub u32);

impl RequestHandle {
    /// Zero is the indeterminate handle
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Opaque secure-channel handle owned by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelHandle(pub u32);

impl ChannelHandle {
    /// Zero is the indeterminate channel
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

/// Opaque user identity carried between layers
///
/// The core never interprets the token bytes; authentication policy lives
/// outside. Equality is byte equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity(pub Vec<u8>);

impl UserIdentity {
    /// The anonymous identity
    pub fn anonymous() -> Self {
        Self(Vec::new())
    }

    /// Identity from an opaque token
    pub fn from_token(token: impl Into<Vec<u8>>) -> Self {
        Self(token.into())
    }
}

/// Nonce exchanged during session creation to bind signatures
pub type Nonce = Vec<u8>;
