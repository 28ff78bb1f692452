//! Certificate records and owned certificate collections
//!
//! A [`Certificate`] owns its raw DER plus an eagerly parsed view; parsing
//! happens once, at insertion, so hostile input is rejected before it can
//! reach the validation paths. A [`CertificateList`] is a growable owned
//! sequence — indices handed to callers stay valid across mutation, which
//! is the invariant the chain-building code relies on.

pub mod crl;

pub use crl::{Crl, CrlList};

use crate::error::{Result, StackError};
use crate::keys::san::{extract_subject_alt_name, SubjectAltName};
use crate::keys::sha1_thumbprint;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::io::Write;
use std::path::Path;
use x509_parser::prelude::*;

/// Digest algorithm carried by an RSA PKCS#1 v1.5 signature
///
/// Unrecognised signature algorithms (including MD5-family legacy ones)
/// map to `None` and fail verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureHash {
    /// SHA-1
    Sha1,
    /// SHA-224
    Sha224,
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl SignatureHash {
    pub(crate) fn from_sig_oid(oid: &oid_registry::Oid) -> Option<Self> {
        use oid_registry::*;
        if *oid == OID_PKCS1_SHA1WITHRSA {
            Some(SignatureHash::Sha1)
        } else if *oid == OID_PKCS1_SHA224WITHRSA {
            Some(SignatureHash::Sha224)
        } else if *oid == OID_PKCS1_SHA256WITHRSA {
            Some(SignatureHash::Sha256)
        } else if *oid == OID_PKCS1_SHA384WITHRSA {
            Some(SignatureHash::Sha384)
        } else if *oid == OID_PKCS1_SHA512WITHRSA {
            Some(SignatureHash::Sha512)
        } else {
            None
        }
    }
}

/// Extended key usage flags the core distinguishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtendedKeyUsageSet {
    /// anyExtendedKeyUsage present
    pub any: bool,
    /// id-kp-serverAuth present
    pub server_auth: bool,
    /// id-kp-clientAuth present
    pub client_auth: bool,
}

/// A parsed certificate record owning its raw DER
#[derive(Debug, Clone)]
pub struct Certificate {
    der: Vec<u8>,
    subject: String,
    issuer: String,
    serial: Vec<u8>,
    not_before: i64,
    not_after: i64,
    is_ca: bool,
    path_len: Option<u32>,
    key_usage: Option<u16>,
    extended_key_usage: Option<ExtendedKeyUsageSet>,
    common_name: Option<String>,
    san: Option<SubjectAltName>,
    public_key: Option<RsaPublicKey>,
    sig_hash: Option<SignatureHash>,
    tbs: Vec<u8>,
    signature: Vec<u8>,
    self_signed: bool,
}

impl Certificate {
    /// Parse a certificate from raw DER
    ///
    /// The DER must fit a 32-bit length. A parse failure leaves no
    /// partially populated record behind.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        if der.is_empty() || der.len() > u32::MAX as usize {
            return Err(StackError::InvalidArgument(
                "certificate DER length out of range".into(),
            ));
        }
        let (rem, cert) = X509Certificate::from_der(der)
            .map_err(|e| StackError::X509(format!("certificate parse failed: {e}")))?;
        if !rem.is_empty() {
            return Err(StackError::X509("trailing bytes after certificate".into()));
        }
        let tbs = &cert.tbs_certificate;

        let (is_ca, path_len) = match tbs.basic_constraints() {
            Ok(Some(bc)) => (bc.value.ca, bc.value.path_len_constraint),
            _ => (false, None),
        };
        let key_usage = match tbs.key_usage() {
            Ok(Some(ku)) => Some(ku.value.flags),
            _ => None,
        };
        let extended_key_usage = match tbs.extended_key_usage() {
            Ok(Some(eku)) => Some(ExtendedKeyUsageSet {
                any: eku.value.any,
                server_auth: eku.value.server_auth,
                client_auth: eku.value.client_auth,
            }),
            _ => None,
        };
        let public_key = RsaPublicKey::from_public_key_der(tbs.subject_pki.raw).ok();
        let sig_hash = SignatureHash::from_sig_oid(&cert.signature_algorithm.algorithm);
        let common_name = tbs
            .subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok().map(str::to_owned));

        let mut record = Self {
            der: der.to_vec(),
            subject: tbs.subject.to_string(),
            issuer: tbs.issuer.to_string(),
            serial: tbs.serial.to_bytes_be(),
            not_before: tbs.validity.not_before.timestamp(),
            not_after: tbs.validity.not_after.timestamp(),
            is_ca,
            path_len,
            key_usage,
            extended_key_usage,
            common_name,
            san: extract_subject_alt_name(der),
            public_key,
            sig_hash,
            tbs: tbs.as_ref().to_vec(),
            signature: cert.signature_value.as_ref().to_vec(),
            self_signed: false,
        };
        // Issuer == subject alone is not self-signature proof; the
        // signature must verify under the certificate's own key.
        record.self_signed = record.issuer == record.subject
            && record
                .public_key
                .as_ref()
                .map(|k| record.verify_signature_with(k))
                .unwrap_or(false);
        Ok(record)
    }

    /// Raw DER bytes
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// SHA-1 thumbprint of the raw DER, uppercase hex
    pub fn thumbprint(&self) -> String {
        sha1_thumbprint(&self.der)
    }

    /// Subject DN, display form
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer DN, display form
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Serial number, big-endian without leading zeros
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// CA flag from BasicConstraints
    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    /// Path length constraint, when the certificate is a CA carrying one
    pub fn path_len(&self) -> Option<u32> {
        self.path_len
    }

    /// True when issuer equals subject and the self-signature verifies
    pub fn is_self_signed(&self) -> bool {
        self.self_signed
    }

    /// KeyUsage bit flags as parsed, `None` when the extension is absent
    pub fn key_usage_flags(&self) -> Option<u16> {
        self.key_usage
    }

    /// Extended key usage set, `None` when the extension is absent
    pub fn extended_key_usage(&self) -> Option<ExtendedKeyUsageSet> {
        self.extended_key_usage
    }

    /// First CN attribute of the subject DN, `None` when absent
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// SAN entries, when present and well-formed
    pub fn subject_alt_name(&self) -> Option<&SubjectAltName> {
        self.san.as_ref()
    }

    /// Signature digest algorithm, when recognised
    pub fn signature_hash(&self) -> Option<SignatureHash> {
        self.sig_hash
    }

    /// Borrow the RSA public key
    ///
    /// The borrow ties the key's lifetime to this record: the key can
    /// never be freed independently of its parent certificate.
    pub fn public_key(&self) -> Result<&RsaPublicKey> {
        self.public_key
            .as_ref()
            .ok_or_else(|| StackError::UnsupportedAlgorithm("certificate key is not RSA".into()))
    }

    /// RSA modulus length in bits, zero for non-RSA keys
    pub fn key_size_bits(&self) -> usize {
        self.public_key.as_ref().map(|k| k.size() * 8).unwrap_or(0)
    }

    /// Validity window check at `now` (unix seconds)
    ///
    /// Returns `Some(true)` when expired, `Some(false)` when not yet
    /// valid, `None` when inside the window.
    pub fn time_violation_at(&self, now: i64) -> Option<bool> {
        if now > self.not_after {
            Some(true)
        } else if now < self.not_before {
            Some(false)
        } else {
            None
        }
    }

    /// Verify this certificate's signature under `key`
    pub fn verify_signature_with(&self, key: &RsaPublicKey) -> bool {
        let Some(hash) = self.sig_hash else {
            return false;
        };
        verify_rsa_pkcs1v15(key, hash, &self.tbs, &self.signature)
    }

    /// Verify this certificate was signed by `issuer`
    ///
    /// DN linkage plus cryptographic verification; either alone is not
    /// sufficient.
    pub fn verify_issued_by(&self, issuer: &Certificate) -> bool {
        if self.issuer != issuer.subject {
            return false;
        }
        match issuer.public_key.as_ref() {
            Some(key) => self.verify_signature_with(key),
            None => false,
        }
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.thumbprint())
    }
}

/// PKCS#1 v1.5 signature verification with the digest picked at run time
pub(crate) fn verify_rsa_pkcs1v15(
    key: &RsaPublicKey,
    hash: SignatureHash,
    message: &[u8],
    signature: &[u8],
) -> bool {
    match hash {
        SignatureHash::Sha1 => {
            let digest = Sha1::digest(message);
            key.verify(Pkcs1v15Sign::new::<Sha1>(), &digest, signature)
                .is_ok()
        }
        SignatureHash::Sha224 => {
            let digest = Sha224::digest(message);
            key.verify(Pkcs1v15Sign::new::<Sha224>(), &digest, signature)
                .is_ok()
        }
        SignatureHash::Sha256 => {
            let digest = Sha256::digest(message);
            key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
                .is_ok()
        }
        SignatureHash::Sha384 => {
            let digest = Sha384::digest(message);
            key.verify(Pkcs1v15Sign::new::<Sha384>(), &digest, signature)
                .is_ok()
        }
        SignatureHash::Sha512 => {
            let digest = Sha512::digest(message);
            key.verify(Pkcs1v15Sign::new::<Sha512>(), &digest, signature)
                .is_ok()
        }
    }
}

/// Growable owned certificate collection
#[derive(Debug, Clone, Default)]
pub struct CertificateList {
    certs: Vec<Certificate>,
}

impl CertificateList {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// True when no record is held
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Iterate over records
    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.certs.iter()
    }

    /// Record at `index`
    pub fn get(&self, index: usize) -> Option<&Certificate> {
        self.certs.get(index)
    }

    /// Byte-identical membership test
    pub fn contains_exact(&self, der: &[u8]) -> bool {
        self.certs.iter().any(|c| c.der() == der)
    }

    /// Parse and append a certificate; byte-identical duplicates are
    /// rejected
    pub fn push_der(&mut self, der: &[u8]) -> Result<()> {
        if self.contains_exact(der) {
            return Err(StackError::InvalidArgument(
                "duplicate certificate in list".into(),
            ));
        }
        self.certs.push(Certificate::from_der(der)?);
        Ok(())
    }

    /// Append an already parsed record; duplicates are rejected
    pub fn push(&mut self, cert: Certificate) -> Result<()> {
        if self.contains_exact(cert.der()) {
            return Err(StackError::InvalidArgument(
                "duplicate certificate in list".into(),
            ));
        }
        self.certs.push(cert);
        Ok(())
    }

    /// Union with `other`, skipping byte-identical entries
    pub fn merge_from(&mut self, other: &CertificateList) {
        for cert in other.iter() {
            if !self.contains_exact(cert.der()) {
                self.certs.push(cert.clone());
            }
        }
    }

    /// Remove the byte-identical entry, if present
    pub fn remove_exact(&mut self, der: &[u8]) -> bool {
        let before = self.certs.len();
        self.certs.retain(|c| c.der() != der);
        before != self.certs.len()
    }

    /// Load one or more certificates from a buffer
    ///
    /// PEM input may carry several CERTIFICATE blocks; anything else is
    /// treated as a single DER certificate.
    pub fn push_from_buffer(&mut self, data: &[u8]) -> Result<()> {
        if data.starts_with(b"-----BEGIN") {
            let blocks = ::pem::parse_many(data)?;
            for block in blocks {
                if block.tag() == "CERTIFICATE" {
                    self.push_der(block.contents())?;
                }
            }
            Ok(())
        } else {
            self.push_der(data)
        }
    }

    /// Load one or more certificates from a file
    pub fn push_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let data = std::fs::read(path.as_ref())?;
        self.push_from_buffer(&data)
    }

    /// Split out the self-signed CAs
    ///
    /// Removes every root (CA with a verified self-signature) from this
    /// list and returns them as a new list, preserving order — the
    /// partition the provider needs at construction.
    pub fn split_roots(&mut self) -> CertificateList {
        let (roots, rest): (Vec<_>, Vec<_>) = self
            .certs
            .drain(..)
            .partition(|c| c.is_ca() && c.is_self_signed());
        self.certs = rest;
        CertificateList { certs: roots }
    }

    /// Count (CAs, self-signed roots)
    pub fn stats(&self) -> (usize, usize) {
        let cas = self.certs.iter().filter(|c| c.is_ca()).count();
        let roots = self
            .certs
            .iter()
            .filter(|c| c.is_ca() && c.is_self_signed())
            .count();
        (cas, roots)
    }

    /// Write every record as `<THUMB>.der` under `dir`
    ///
    /// A partial write is detected and the partial file removed before
    /// the error is surfaced.
    pub fn write_der_files(&self, dir: &str) -> Result<()> {
        for cert in &self.certs {
            write_der_file(dir, &cert.thumbprint(), cert.der())?;
        }
        Ok(())
    }
}

/// Write `<dir>/<thumb>.der`, removing the file on a short write
///
/// Paths are joined with `/`, matching the store layout on every
/// supported platform.
pub(crate) fn write_der_file(dir: &str, thumbprint: &str, der: &[u8]) -> Result<()> {
    let path = format!("{dir}/{thumbprint}.der");
    let mut file = std::fs::File::create(&path)?;
    if let Err(e) = file.write_all(der).and_then(|_| file.flush()) {
        drop(file);
        if std::fs::remove_file(&path).is_err() {
            tracing::error!(path, "removing partially written DER file failed");
        }
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
    use rsa::pkcs8::EncodePrivateKey;

    fn rsa_keypair() -> KeyPair {
        let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let der = key.to_pkcs8_der().unwrap();
        KeyPair::from_pkcs8_der_and_sign_algo(&der.as_bytes().into(), &rcgen::PKCS_RSA_SHA256)
            .unwrap()
    }

    fn self_signed_der(cn: &str, ca: bool) -> Vec<u8> {
        let key = rsa_keypair();
        let mut params = CertificateParams::new(vec!["test.example".to_string()]).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, cn);
        if ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        }
        params.self_signed(&key).unwrap().der().as_ref().to_vec()
    }

    #[test]
    fn test_parse_and_thumbprint() {
        let der = self_signed_der("unit-test", false);
        let cert = Certificate::from_der(&der).unwrap();
        assert_eq!(cert.thumbprint().len(), 40);
        assert!(cert.subject().contains("unit-test"));
        assert_eq!(cert.der(), der.as_slice());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let der = self_signed_der("dup", false);
        let mut list = CertificateList::new();
        list.push_der(&der).unwrap();
        assert!(list.push_der(&der).is_err());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_split_roots_partitions_cas() {
        let mut list = CertificateList::new();
        list.push_der(&self_signed_der("root-ca", true)).unwrap();
        list.push_der(&self_signed_der("leaf", false)).unwrap();
        let roots = list.split_roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(list.len(), 1);
        assert!(roots.get(0).unwrap().is_ca());
        assert!(!list.get(0).unwrap().is_ca());
    }

    #[test]
    fn test_garbage_der_rejected() {
        assert!(Certificate::from_der(&[0u8; 64]).is_err());
        assert!(Certificate::from_der(&[]).is_err());
    }

    #[test]
    fn test_write_der_files_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let der = self_signed_der("disk", false);
        let mut list = CertificateList::new();
        list.push_der(&der).unwrap();
        list.write_der_files(dir.path().to_str().unwrap()).unwrap();

        let cert = list.get(0).unwrap();
        let expected = dir.path().join(format!("{}.der", cert.thumbprint()));
        assert_eq!(std::fs::read(expected).unwrap(), der);
    }
}
