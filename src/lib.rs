//! # OPC UA session/secure-channel core with PKI and key management
//!
//! This crate implements the coordination core of an industrial OPC UA
//! communications stack: the per-session state machine and its binding
//! to secure channels, the I/O dispatcher that routes decoded messages
//! and fabricates responses, a PKI provider validating certificate
//! chains against a trust profile with an on-disk trust store, and the
//! key manager (RSA keys, legacy encrypted PEM files, SHA-1
//! thumbprints, SAN extraction, CSR construction).
//!
//! The wire codec, the TCP transport, the address space and user
//! authentication policy are external collaborators; the core consumes
//! them through small trait seams and opaque handles.
//!
//! ## Architecture
//!
//! - `keys`: asymmetric keys, fingerprints, PEM files, SAN, CSRs
//! - `cert`: certificate and CRL records with owned collections
//! - `pki`: trust provider, validation profiles, chain walk, disk store
//! - `channel`: configuration indices and the transport-facing seam
//! - `message`: the opaque envelope the dispatcher routes
//! - `session`: session registry, lifecycle state machine, request
//!   handles
//! - `dispatch`: the event queue and I/O dispatcher
//!
//! ## Concurrency model
//!
//! Single-threaded cooperative: all state transitions run on one event
//! loop and handlers never yield mid-transition. The one exception is
//! the PKI provider, whose interior mutex permits hot TrustList reloads
//! from another thread.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cert;
pub mod channel;
pub mod dispatch;
pub mod error;
pub mod keys;
pub mod message;
pub mod pki;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use error::{CertificateError, Result, StackError, StatusCode};
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cert::{Certificate, CertificateList, Crl, CrlList};
    pub use crate::channel::{ChannelConfigIdx, ChannelSurface};
    pub use crate::dispatch::{AppRequest, ClientResponseSink, Dispatcher, Event, ServiceHandler};
    pub use crate::error::{CertificateError, Result, StackError, StatusCode};
    pub use crate::keys::AsymmetricKey;
    pub use crate::message::{Message, MessageType};
    pub use crate::pki::{PkiConfig, PkiProvider, Profile, SecurityPolicy};
    pub use crate::session::{SessionRegistry, SessionState};
    pub use crate::types::*;
}
