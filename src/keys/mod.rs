//! Key manager: asymmetric keys, fingerprints, PEM files, SAN, CSRs
//!
//! Parses, serialises and generates keys independently of any particular
//! session or channel. RSA is the only algorithm the core supports; the
//! enum leaves room for extension.

pub mod csr;
pub mod pem;
pub mod san;

use crate::error::{Result, StackError};
use rand::rngs::OsRng;
use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey,
};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::path::Path;

pub use csr::{build_csr, CsrParams};
pub use pem::{decrypt_rsa_key_pem, encrypt_rsa_key_pem, write_key_pem_file};
pub use san::{extract_subject_alt_name, SubjectAltName};

/// An asymmetric key held by the core
///
/// Public keys obtained from a certificate are *not* represented here:
/// [`crate::cert::Certificate::public_key`] hands out a borrow whose
/// lifetime is tied to the certificate, so the key material can never
/// outlive (or be freed separately from) its parent record.
#[derive(Debug, Clone)]
pub enum AsymmetricKey {
    /// Owned RSA private key (always carries the public half)
    RsaPrivate(RsaPrivateKey),
    /// Owned RSA public key
    RsaPublic(RsaPublicKey),
}

impl AsymmetricKey {
    /// Parse a key from a DER or PEM buffer
    ///
    /// Tries DER first (PKCS#1 then PKCS#8), then PEM. Buffers carrying a
    /// trailing NUL are retried without it, so keys read from fixed-size
    /// C-style storage still parse. A failed parse leaves nothing behind.
    pub fn from_buffer(buffer: &[u8], is_public: bool) -> Result<Self> {
        if buffer.is_empty() {
            return Err(StackError::InvalidArgument("empty key buffer".into()));
        }
        let trimmed = match buffer.last() {
            Some(0) => &buffer[..buffer.len() - 1],
            _ => buffer,
        };
        if is_public {
            Self::parse_public(trimmed).map(AsymmetricKey::RsaPublic)
        } else {
            Self::parse_private(trimmed).map(AsymmetricKey::RsaPrivate)
        }
    }

    /// Parse a key from DER bytes
    pub fn from_der(der: &[u8], is_public: bool) -> Result<Self> {
        Self::from_buffer(der, is_public)
    }

    /// Parse a key from PEM text
    pub fn from_pem(pem_text: &str, is_public: bool) -> Result<Self> {
        Self::from_buffer(pem_text.as_bytes(), is_public)
    }

    fn parse_private(data: &[u8]) -> Result<RsaPrivateKey> {
        if let Ok(key) = RsaPrivateKey::from_pkcs1_der(data) {
            return Ok(key);
        }
        if let Ok(key) = RsaPrivateKey::from_pkcs8_der(data) {
            return Ok(key);
        }
        let text = std::str::from_utf8(data)
            .map_err(|_| StackError::InvalidArgument("key is neither DER nor PEM".into()))?;
        if let Ok(key) = RsaPrivateKey::from_pkcs1_pem(text) {
            return Ok(key);
        }
        RsaPrivateKey::from_pkcs8_pem(text).map_err(StackError::from)
    }

    fn parse_public(data: &[u8]) -> Result<RsaPublicKey> {
        if let Ok(key) = RsaPublicKey::from_pkcs1_der(data) {
            return Ok(key);
        }
        if let Ok(key) = RsaPublicKey::from_public_key_der(data) {
            return Ok(key);
        }
        let text = std::str::from_utf8(data)
            .map_err(|_| StackError::InvalidArgument("key is neither DER nor PEM".into()))?;
        if let Ok(key) = RsaPublicKey::from_pkcs1_pem(text) {
            return Ok(key);
        }
        RsaPublicKey::from_public_key_pem(text).map_err(StackError::from)
    }

    /// Parse a key from a file, decrypting it when a password is given
    ///
    /// The password, when present, must be non-empty. A password handed
    /// in for a file that turns out to be unencrypted is ignored; an
    /// encrypted file read without a password fails to parse.
    pub fn from_file(path: impl AsRef<Path>, password: Option<&str>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        if let Some(pwd) = password {
            if pwd.is_empty() {
                return Err(StackError::InvalidArgument(
                    "empty password for encrypted key file".into(),
                ));
            }
            if let Ok(text) = std::str::from_utf8(&data) {
                if text.contains("Proc-Type: 4,ENCRYPTED") {
                    return Ok(AsymmetricKey::RsaPrivate(pem::decrypt_rsa_key_pem(
                        text, pwd,
                    )?));
                }
            }
        }
        Self::from_buffer(&data, false)
    }

    /// Generate a fresh RSA key pair with public exponent 65537
    ///
    /// Entropy is drawn from the operating system once per call; no
    /// process-global DRBG state is kept.
    pub fn generate_rsa(bits: usize) -> Result<Self> {
        if bits == 0 {
            return Err(StackError::InvalidArgument("RSA key size is zero".into()));
        }
        let key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| StackError::KeyGenerationFailed(e.to_string()))?;
        Ok(AsymmetricKey::RsaPrivate(key))
    }

    /// Key length in bits
    pub fn size_bits(&self) -> usize {
        match self {
            AsymmetricKey::RsaPrivate(k) => k.size() * 8,
            AsymmetricKey::RsaPublic(k) => k.size() * 8,
        }
    }

    /// True for private keys
    pub fn is_private(&self) -> bool {
        matches!(self, AsymmetricKey::RsaPrivate(_))
    }

    /// Borrow the private half, if any
    pub fn private_key(&self) -> Option<&RsaPrivateKey> {
        match self {
            AsymmetricKey::RsaPrivate(k) => Some(k),
            AsymmetricKey::RsaPublic(_) => None,
        }
    }

    /// The public half of the key
    pub fn public_key(&self) -> RsaPublicKey {
        match self {
            AsymmetricKey::RsaPrivate(k) => k.to_public_key(),
            AsymmetricKey::RsaPublic(k) => k.clone(),
        }
    }

    /// Serialise to PKCS#1 DER
    pub fn to_der(&self) -> Result<Vec<u8>> {
        match self {
            AsymmetricKey::RsaPrivate(k) => Ok(k.to_pkcs1_der()?.as_bytes().to_vec()),
            AsymmetricKey::RsaPublic(k) => Ok(k.to_pkcs1_der()?.as_bytes().to_vec()),
        }
    }

    /// Serialise to PKCS#1 DER into a caller-sized buffer
    ///
    /// Fails with [`StackError::BufferTooSmall`] instead of truncating;
    /// see [`recommended_der_capacity`] for sizing.
    pub fn to_der_into(&self, dest: &mut [u8]) -> Result<usize> {
        let der = self.to_der()?;
        if der.len() > dest.len() {
            return Err(StackError::BufferTooSmall {
                needed: der.len(),
                available: dest.len(),
            });
        }
        dest[..der.len()].copy_from_slice(&der);
        Ok(der.len())
    }

    /// Serialise a private key to plaintext PKCS#1 PEM
    pub fn to_pem(&self) -> Result<String> {
        match self {
            AsymmetricKey::RsaPrivate(k) => {
                Ok(k.to_pkcs1_pem(LineEnding::LF)?.as_str().to_owned())
            }
            AsymmetricKey::RsaPublic(k) => Ok(k.to_pkcs1_pem(LineEnding::LF)?),
        }
    }
}

/// Recommended DER buffer capacity for a key of `bits` length
///
/// Eight times the key length in bytes accommodates an RSA private key
/// including its CRT parameters.
pub fn recommended_der_capacity(bits: usize) -> usize {
    (bits / 8) * 8
}

/// SHA-1 thumbprint of a raw DER blob
///
/// Forty uppercase hex characters, no separators. Used as the trust-store
/// filename and as the log identifier for certificates.
pub fn sha1_thumbprint(der: &[u8]) -> String {
    let digest = Sha1::digest(der);
    let mut out = String::with_capacity(40);
    for b in digest {
        out.push_str(&format!("{b:02X}"));
    }
    out
}
