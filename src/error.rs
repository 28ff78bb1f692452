//! Error types and status taxonomy for the stack core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for stack operations
pub type Result<T> = std::result::Result<T, StackError>;

/// Main error type for the session/PKI core
#[derive(Error, Debug)]
pub enum StackError {
    /// NULL-ish inputs, impossible sizes, malformed headers
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation requested against a state machine that forbids it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Platform does not provide the required primitive
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Caller-provided buffer cannot hold the serialised output
    #[error("Buffer too small: {needed} bytes needed, {available} available")]
    BufferTooSmall {
        /// Bytes the serialisation requires
        needed: usize,
        /// Bytes the caller provided
        available: usize,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// RSA errors
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    /// PKCS#1 encoding errors
    #[error("PKCS#1 error: {0}")]
    Pkcs1(#[from] rsa::pkcs1::Error),

    /// PKCS#8 encoding errors
    #[error("PKCS#8 error: {0}")]
    Pkcs8(#[from] rsa::pkcs8::Error),

    /// SPKI encoding errors
    #[error("SPKI error: {0}")]
    Spki(#[from] rsa::pkcs8::spki::Error),

    /// X.509 certificate or CRL parse errors
    #[error("X.509 error: {0}")]
    X509(String),

    /// CSR generation errors
    #[error("CSR generation error: {0}")]
    CsrGen(#[from] rcgen::Error),

    /// PEM parsing errors
    #[error("PEM error: {0}")]
    Pem(#[from] pem::PemError),

    /// Base64 decoding errors
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unsupported algorithm name or identifier
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Key generation failed
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Certificate validation verdict
    #[error("Certificate validation failed: {0}")]
    Validation(CertificateError),

    /// Service-level status carried back to the caller
    #[error("Service failure: {0}")]
    Service(StatusCode),

    /// Trust store errors
    #[error("Trust store error: {0}")]
    Store(String),
}

/// Certificate validation verdicts
///
/// One verdict per failed validation, chosen by the priority order of the
/// verification flag bitmap (see `pki::verify`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertificateError {
    /// Certificate structure, key usage or signature algorithm is unacceptable
    Invalid,
    /// Certificate is outside its validity window
    TimeInvalid,
    /// No dNSName SAN entry matches the expected host
    HostNameInvalid,
    /// Certificate exists but may not be used in this role
    UseNotAllowed,
    /// Chain is well-formed but contains no trusted certificate
    Untrusted,
    /// No verifiable CRL covers an authority in the chain
    RevocationUnknown,
    /// Certificate serial appears in a CRL
    Revoked,
    /// Leaf does not satisfy the security-policy profile
    PolicyCheckFailed,
    /// ApplicationUri SAN entry does not match
    UriInvalid,
    /// Unclassified failure
    Unknown,
}

impl std::fmt::Display for CertificateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CertificateError::Invalid => "certificate invalid",
            CertificateError::TimeInvalid => "certificate time invalid",
            CertificateError::HostNameInvalid => "certificate host name invalid",
            CertificateError::UseNotAllowed => "certificate use not allowed",
            CertificateError::Untrusted => "certificate untrusted",
            CertificateError::RevocationUnknown => "certificate revocation unknown",
            CertificateError::Revoked => "certificate revoked",
            CertificateError::PolicyCheckFailed => "certificate policy check failed",
            CertificateError::UriInvalid => "certificate URI invalid",
            CertificateError::Unknown => "certificate validation error unknown",
        };
        write!(f, "{s}")
    }
}

/// Service status codes exchanged in message headers
///
/// Subset of the OPC UA status space the core produces or inspects. `Good`
/// is the only non-bad member; everything else rejects or closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// Operation succeeded
    Good,
    /// Malformed or inconsistent request arguments
    BadInvalidArgument,
    /// State machine forbids the operation
    BadInvalidState,
    /// Allocation failure, fully rolled back
    BadOutOfMemory,
    /// Internal inconsistency
    BadUnexpectedError,
    /// Session was closed before the request completed
    BadSessionClosed,
    /// Session token does not resolve to a live session
    BadSessionIdInvalid,
    /// Presented user identity rejected
    BadIdentityTokenInvalid,
    /// Secure channel closed underneath the session
    BadSecureChannelClosed,
    /// Channel handle does not resolve to a live channel
    BadSecureChannelIdInvalid,
    /// Transport connection dropped
    BadConnectionClosed,
    /// Response never arrived
    BadTimeout,
}

impl StatusCode {
    /// True only for `Good`
    pub fn is_good(self) -> bool {
        matches!(self, StatusCode::Good)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
