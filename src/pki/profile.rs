//! Validation profiles: chain-wide and leaf-specific policy bundles
//!
//! A profile is two halves. The chain profile governs signature digests,
//! public-key algorithms and key sizes across the whole chain; the leaf
//! profile governs the end-entity certificate alone (key size window,
//! usages, SAN entries, common name). Named bundles correspond to the
//! OPC UA security policies.

use crate::cert::{Certificate, SignatureHash};
use crate::error::{CertificateError, StackError};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Digest families a profile can require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashFamily {
    /// Exactly SHA-1
    Sha1,
    /// Exactly SHA-256
    Sha256,
    /// SHA-1 or any stronger SHA-2 member
    Sha1OrAbove,
    /// SHA-256 or stronger
    Sha256OrAbove,
    /// SHA-1 or SHA-256 only
    Sha1AndSha256,
}

impl HashFamily {
    /// Membership test for a concrete signature digest
    pub fn allows(self, hash: SignatureHash) -> bool {
        use SignatureHash::*;
        match self {
            HashFamily::Sha1 => hash == Sha1,
            HashFamily::Sha256 => hash == Sha256,
            HashFamily::Sha1OrAbove => {
                matches!(hash, Sha1 | Sha224 | Sha256 | Sha384 | Sha512)
            }
            HashFamily::Sha256OrAbove => matches!(hash, Sha256 | Sha384 | Sha512),
            HashFamily::Sha1AndSha256 => matches!(hash, Sha1 | Sha256),
        }
    }
}

/// Public-key algorithms a profile accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublicKeyAlgorithm {
    /// Any algorithm
    Any,
    /// RSA only
    Rsa,
}

/// Key usage requirement mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUsageMask(pub u16);

impl KeyUsageMask {
    /// digitalSignature
    pub const DIGITAL_SIGNATURE: u16 = 1 << 0;
    /// nonRepudiation / contentCommitment
    pub const NON_REPUDIATION: u16 = 1 << 1;
    /// keyEncipherment
    pub const KEY_ENCIPHERMENT: u16 = 1 << 2;
    /// dataEncipherment
    pub const DATA_ENCIPHERMENT: u16 = 1 << 3;
    /// keyCertSign
    pub const KEY_CERT_SIGN: u16 = 1 << 5;
    /// cRLSign
    pub const CRL_SIGN: u16 = 1 << 6;
    /// Wildcard short-circuit: skip the check entirely
    pub const DISABLE_CHECK: u16 = 1 << 15;

    /// Mask required of an application instance certificate
    pub fn application_instance() -> Self {
        Self(
            Self::DIGITAL_SIGNATURE
                | Self::NON_REPUDIATION
                | Self::KEY_ENCIPHERMENT
                | Self::DATA_ENCIPHERMENT,
        )
    }

    /// Mask required of a user-identity certificate
    pub fn user_identity() -> Self {
        Self(Self::DIGITAL_SIGNATURE)
    }

    /// Wildcard mask
    pub fn disabled() -> Self {
        Self(Self::DISABLE_CHECK)
    }

    /// True when the check is switched off
    pub fn is_disabled(self) -> bool {
        self.0 & Self::DISABLE_CHECK != 0
    }
}

/// Extended key usage requirement mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtKeyUsageMask(pub u8);

impl ExtKeyUsageMask {
    /// id-kp-serverAuth required
    pub const SERVER_AUTH: u8 = 1 << 0;
    /// id-kp-clientAuth required
    pub const CLIENT_AUTH: u8 = 1 << 1;
    /// Wildcard short-circuit
    pub const DISABLE_CHECK: u8 = 1 << 7;

    /// Require serverAuth
    pub fn server() -> Self {
        Self(Self::SERVER_AUTH)
    }

    /// Require clientAuth
    pub fn client() -> Self {
        Self(Self::CLIENT_AUTH)
    }

    /// Wildcard mask
    pub fn disabled() -> Self {
        Self(Self::DISABLE_CHECK)
    }

    /// True when the check is switched off
    pub fn is_disabled(self) -> bool {
        self.0 & Self::DISABLE_CHECK != 0
    }
}

/// Policy applied across the whole chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainProfile {
    /// Acceptable signature digests
    pub hash_family: HashFamily,
    /// Acceptable public-key algorithms
    pub pk_algo: PublicKeyAlgorithm,
    /// Minimum RSA modulus length in bits
    pub rsa_min_key_bits: usize,
    /// Skip CRL presence and revocation checks in the walk
    pub disable_revocation_check: bool,
}

impl ChainProfile {
    /// The always-safe minimum: SHA-256 and above, RSA ≥ 2048
    pub fn minimal() -> Self {
        Self {
            hash_family: HashFamily::Sha256OrAbove,
            pk_algo: PublicKeyAlgorithm::Any,
            rsa_min_key_bits: 2048,
            disable_revocation_check: false,
        }
    }
}

/// Policy applied to the end-entity certificate alone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafProfile {
    /// Acceptable signature digests for the leaf
    pub hash_family: HashFamily,
    /// Acceptable public-key algorithms for the leaf
    pub pk_algo: PublicKeyAlgorithm,
    /// Minimum RSA modulus length in bits
    pub rsa_min_key_bits: usize,
    /// Maximum RSA modulus length in bits
    pub rsa_max_key_bits: usize,
    /// Gate for the key-type/size/digest checks
    pub apply_security_policy: bool,
    /// Required key usages
    pub key_usage: KeyUsageMask,
    /// Required extended key usages
    pub extended_key_usage: ExtKeyUsageMask,
    /// Expected ApplicationUri SAN entry, byte-exact
    pub san_application_uri: Option<String>,
    /// Expected endpoint URL whose host must appear among dNSName entries
    pub san_url: Option<String>,
}

impl LeafProfile {
    /// Run every gated leaf check, returning the first failure verdict
    pub fn check(&self, cert: &Certificate) -> Result<(), CertificateError> {
        if self.apply_security_policy {
            self.check_security_policy(cert)
                .map_err(|_| CertificateError::PolicyCheckFailed)?;
        }
        if let Some(url) = &self.san_url {
            self.check_host_name(cert, url)
                .map_err(|_| CertificateError::HostNameInvalid)?;
        }
        if let Some(uri) = &self.san_application_uri {
            self.check_application_uri(cert, uri)
                .map_err(|_| CertificateError::UriInvalid)?;
        }
        self.check_usage(cert)
            .map_err(|_| CertificateError::UseNotAllowed)?;
        self.check_common_name(cert)
            .map_err(|_| CertificateError::Invalid)?;
        Ok(())
    }

    /// Key algorithm, key-size window and signature digest
    pub fn check_security_policy(&self, cert: &Certificate) -> Result<(), StackError> {
        let thumb = cert.thumbprint();
        if self.pk_algo == PublicKeyAlgorithm::Rsa && cert.public_key().is_err() {
            error!(thumbprint = %thumb, "PKI validation failed: unexpected key type");
            return Err(StackError::Validation(CertificateError::PolicyCheckFailed));
        }
        let bits = cert.key_size_bits();
        if bits < self.rsa_min_key_bits || bits > self.rsa_max_key_bits {
            error!(thumbprint = %thumb, bits, "PKI validation failed: unexpected key size");
            return Err(StackError::Validation(CertificateError::PolicyCheckFailed));
        }
        match cert.signature_hash() {
            Some(hash) if self.hash_family.allows(hash) => Ok(()),
            _ => {
                error!(thumbprint = %thumb, "PKI validation failed: unexpected signing algorithm");
                Err(StackError::Validation(CertificateError::PolicyCheckFailed))
            }
        }
    }

    /// Case-insensitive host match against the dNSName SAN entries
    pub fn check_host_name(&self, cert: &Certificate, url: &str) -> Result<(), StackError> {
        let thumb = cert.thumbprint();
        let (host, _port) = split_url(url).ok_or_else(|| {
            error!(url, "PKI validation failed: unable to split the url");
            StackError::InvalidArgument(format!("unparsable endpoint url: {url}"))
        })?;
        let found = cert
            .subject_alt_name()
            .map(|san| {
                san.dns_names
                    .iter()
                    .any(|dns| dns.eq_ignore_ascii_case(&host))
            })
            .unwrap_or(false);
        if found {
            Ok(())
        } else {
            error!(
                thumbprint = %thumb,
                host, "PKI validation failed: hostName not found in the dnsName SAN extension"
            );
            Err(StackError::Validation(CertificateError::HostNameInvalid))
        }
    }

    /// Byte-exact ApplicationUri match
    pub fn check_application_uri(&self, cert: &Certificate, uri: &str) -> Result<(), StackError> {
        let matches = cert
            .subject_alt_name()
            .and_then(|san| san.application_uri.as_deref())
            .map(|cert_uri| cert_uri == uri)
            .unwrap_or(false);
        if matches {
            Ok(())
        } else {
            error!(
                thumbprint = %cert.thumbprint(),
                uri, "PKI validation failed: the application URI is not stored in the URI SAN extension"
            );
            Err(StackError::Validation(CertificateError::UriInvalid))
        }
    }

    /// Key usage and extended key usage subset checks
    pub fn check_usage(&self, cert: &Certificate) -> Result<(), StackError> {
        let thumb = cert.thumbprint();
        if !self.key_usage.is_disabled() {
            let have = cert.key_usage_flags().unwrap_or(0);
            let need = self.key_usage.0 & !KeyUsageMask::DISABLE_CHECK;
            if have & need != need {
                error!(thumbprint = %thumb, "PKI validation failed: missing expected key usage");
                return Err(StackError::Validation(CertificateError::UseNotAllowed));
            }
        }
        if !self.extended_key_usage.is_disabled() {
            let eku = cert.extended_key_usage().unwrap_or_default();
            let mut missing = false;
            if self.extended_key_usage.0 & ExtKeyUsageMask::SERVER_AUTH != 0 {
                missing |= !(eku.server_auth || eku.any);
            }
            if self.extended_key_usage.0 & ExtKeyUsageMask::CLIENT_AUTH != 0 {
                missing |= !(eku.client_auth || eku.any);
            }
            if missing {
                error!(thumbprint = %thumb, "PKI validation: missing expected extended key usage");
                return Err(StackError::Validation(CertificateError::UseNotAllowed));
            }
        }
        Ok(())
    }

    /// CN presence: absent is an error, empty only a warning
    pub fn check_common_name(&self, cert: &Certificate) -> Result<(), StackError> {
        match cert.common_name() {
            Some(cn) => {
                if cn.is_empty() {
                    warn!(thumbprint = %cert.thumbprint(), "certificate subject CN is empty");
                }
                Ok(())
            }
            None => {
                error!(thumbprint = %cert.thumbprint(), "certificate subject has no CN attribute");
                Err(StackError::Validation(CertificateError::Invalid))
            }
        }
    }
}

/// Complete validation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Chain half
    pub chain: ChainProfile,
    /// Leaf half
    pub leaf: LeafProfile,
    /// Run the leaf checks in addition to the chain walk
    pub apply_leaf_profile: bool,
    /// Accept a self-signed end-entity certificate as the chain leaf
    pub backward_interoperability: bool,
}

/// Named security-policy bundles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityPolicy {
    /// SHA-256 signatures, RSA 2048–4096
    Basic256Sha256,
    /// SHA-256 signatures, RSA 2048–4096 (AES-128 on the wire)
    Aes128Sha256RsaOaep,
    /// SHA-256 signatures, RSA 2048–4096 (PSS on the wire)
    Aes256Sha256RsaPss,
    /// Legacy: SHA-1 or SHA-256, RSA 1024–2048
    Basic256,
}

impl SecurityPolicy {
    fn hash_family(self) -> HashFamily {
        match self {
            SecurityPolicy::Basic256 => HashFamily::Sha1AndSha256,
            _ => HashFamily::Sha256,
        }
    }

    fn key_bits(self) -> (usize, usize) {
        match self {
            SecurityPolicy::Basic256 => (1024, 2048),
            _ => (2048, 4096),
        }
    }

    /// Leaf profile for this policy, usages left disabled until a role
    /// is applied
    pub fn leaf_profile(self) -> LeafProfile {
        let (min, max) = self.key_bits();
        LeafProfile {
            hash_family: self.hash_family(),
            pk_algo: PublicKeyAlgorithm::Rsa,
            rsa_min_key_bits: min,
            rsa_max_key_bits: max,
            apply_security_policy: true,
            key_usage: KeyUsageMask::disabled(),
            extended_key_usage: ExtKeyUsageMask::disabled(),
            san_application_uri: None,
            san_url: None,
        }
    }

    /// Full profile for this policy
    pub fn profile(self) -> Profile {
        let (min, _) = self.key_bits();
        Profile {
            chain: ChainProfile {
                hash_family: self.hash_family(),
                pk_algo: PublicKeyAlgorithm::Rsa,
                rsa_min_key_bits: min,
                disable_revocation_check: false,
            },
            leaf: self.leaf_profile(),
            apply_leaf_profile: true,
            backward_interoperability: true,
        }
    }
}

impl Profile {
    /// Require the usages of a server or client application certificate
    pub fn with_peer_role(mut self, is_server_peer: bool) -> Self {
        self.leaf.key_usage = KeyUsageMask::application_instance();
        self.leaf.extended_key_usage = if is_server_peer {
            ExtKeyUsageMask::server()
        } else {
            ExtKeyUsageMask::client()
        };
        self
    }

    /// Expect a specific ApplicationUri SAN entry
    pub fn with_application_uri(mut self, uri: impl Into<String>) -> Self {
        self.leaf.san_application_uri = Some(uri.into());
        self
    }

    /// Expect the endpoint host among the dNSName SAN entries
    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.leaf.san_url = Some(url.into());
        self
    }
}

/// Split `scheme://host:port/...` into host and optional port
pub(crate) fn split_url(url: &str) -> Option<(String, Option<u16>)> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split(['/', '?']).next()?;
    if authority.is_empty() {
        return None;
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            Some((host.to_owned(), port.parse().ok()))
        }
        _ => Some((authority.to_owned(), None)),
    }
}
