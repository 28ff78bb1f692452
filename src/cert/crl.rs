//! Certificate revocation list records and collections
//!
//! A CRL binds to a CA when its issuer DN equals the CA's subject DN and
//! its signature verifies under the CA's public key. The chain walk
//! demands such a binding for every traversed authority unless revocation
//! checking is disabled by the profile.

use super::{verify_rsa_pkcs1v15, write_der_file, Certificate, SignatureHash};
use crate::error::{Result, StackError};
use crate::keys::sha1_thumbprint;
use std::path::Path;
use x509_parser::prelude::*;

/// A parsed CRL owning its raw DER
#[derive(Debug, Clone)]
pub struct Crl {
    der: Vec<u8>,
    issuer: String,
    this_update: i64,
    next_update: Option<i64>,
    revoked_serials: Vec<Vec<u8>>,
    sig_hash: Option<SignatureHash>,
    tbs: Vec<u8>,
    signature: Vec<u8>,
}

impl Crl {
    /// Parse a CRL from raw DER
    pub fn from_der(der: &[u8]) -> Result<Self> {
        if der.is_empty() || der.len() > u32::MAX as usize {
            return Err(StackError::InvalidArgument(
                "CRL DER length out of range".into(),
            ));
        }
        let (rem, crl) = CertificateRevocationList::from_der(der)
            .map_err(|e| StackError::X509(format!("CRL parse failed: {e}")))?;
        if !rem.is_empty() {
            return Err(StackError::X509("trailing bytes after CRL".into()));
        }
        let revoked_serials = crl
            .iter_revoked_certificates()
            .map(|rc| rc.user_certificate.to_bytes_be())
            .collect();
        Ok(Self {
            der: der.to_vec(),
            issuer: crl.tbs_cert_list.issuer.to_string(),
            this_update: crl.tbs_cert_list.this_update.timestamp(),
            next_update: crl.tbs_cert_list.next_update.map(|t| t.timestamp()),
            revoked_serials,
            sig_hash: super::SignatureHash::from_sig_oid(&crl.signature_algorithm.algorithm),
            tbs: crl.tbs_cert_list.as_ref().to_vec(),
            signature: crl.signature_value.as_ref().to_vec(),
        })
    }

    /// Raw DER bytes
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// SHA-1 thumbprint of the raw DER, uppercase hex
    pub fn thumbprint(&self) -> String {
        sha1_thumbprint(&self.der)
    }

    /// Issuer DN, display form
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// thisUpdate as unix seconds
    pub fn this_update(&self) -> i64 {
        self.this_update
    }

    /// nextUpdate as unix seconds, when present
    pub fn next_update(&self) -> Option<i64> {
        self.next_update
    }

    /// True when the issuer DN names `ca`'s subject
    pub fn names_issuer(&self, ca: &Certificate) -> bool {
        self.issuer == ca.subject()
    }

    /// Verify the CRL signature under `ca`'s public key
    pub fn verify_signature_with(&self, ca: &Certificate) -> bool {
        let Some(hash) = self.sig_hash else {
            return false;
        };
        match ca.public_key() {
            Ok(key) => verify_rsa_pkcs1v15(key, hash, &self.tbs, &self.signature),
            Err(_) => false,
        }
    }

    /// Full binding check: DN match plus signature verification
    pub fn binds_to(&self, ca: &Certificate) -> bool {
        self.names_issuer(ca) && self.verify_signature_with(ca)
    }

    /// True when `serial` (big-endian, no leading zeros) is revoked
    pub fn is_revoked(&self, serial: &[u8]) -> bool {
        self.revoked_serials.iter().any(|s| s == serial)
    }
}

/// Growable owned CRL collection
#[derive(Debug, Clone, Default)]
pub struct CrlList {
    crls: Vec<Crl>,
}

impl CrlList {
    /// Empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.crls.len()
    }

    /// True when no record is held
    pub fn is_empty(&self) -> bool {
        self.crls.is_empty()
    }

    /// Iterate over records
    pub fn iter(&self) -> impl Iterator<Item = &Crl> {
        self.crls.iter()
    }

    /// Byte-identical membership test
    pub fn contains_exact(&self, der: &[u8]) -> bool {
        self.crls.iter().any(|c| c.der() == der)
    }

    /// Parse and append a CRL; byte-identical duplicates are rejected
    pub fn push_der(&mut self, der: &[u8]) -> Result<()> {
        if self.contains_exact(der) {
            return Err(StackError::InvalidArgument("duplicate CRL in list".into()));
        }
        self.crls.push(Crl::from_der(der)?);
        Ok(())
    }

    /// Union with `other`, skipping byte-identical entries
    pub fn merge_from(&mut self, other: &CrlList) {
        for crl in other.iter() {
            if !self.contains_exact(crl.der()) {
                self.crls.push(crl.clone());
            }
        }
    }

    /// Load a CRL file (PEM `X509 CRL` blocks or a single DER)
    pub fn push_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let data = std::fs::read(path.as_ref())?;
        if data.starts_with(b"-----BEGIN") {
            let blocks = ::pem::parse_many(&data)?;
            for block in blocks {
                if block.tag().contains("CRL") {
                    self.push_der(block.contents())?;
                }
            }
            Ok(())
        } else {
            self.push_der(&data)
        }
    }

    /// True when at least one CRL binds to `ca`
    pub fn has_binding_for(&self, ca: &Certificate) -> bool {
        self.crls.iter().any(|crl| crl.binds_to(ca))
    }

    /// Check that every CA in `cas` has at least one binding CRL
    ///
    /// Returns false when any CA lacks one; the provider warns and keeps
    /// going, refusing certificates issued by the uncovered CA later.
    pub fn covers_all_cas(&self, cas: &super::CertificateList) -> bool {
        cas.iter()
            .filter(|c| c.is_ca())
            .all(|ca| self.has_binding_for(ca))
    }

    /// True when `serial` appears in any CRL bound to `ca`
    pub fn is_revoked_by(&self, ca: &Certificate, serial: &[u8]) -> bool {
        self.crls
            .iter()
            .filter(|crl| crl.binds_to(ca))
            .any(|crl| crl.is_revoked(serial))
    }

    /// Write every record as `<THUMB>.der` under `dir`
    pub fn write_der_files(&self, dir: &str) -> Result<()> {
        for crl in &self.crls {
            write_der_file(dir, &crl.thumbprint(), crl.der())?;
        }
        Ok(())
    }
}
