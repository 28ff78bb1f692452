//! On-disk trust store layout and IO
//!
//! ```text
//! <root>/trusted/certs/<thumb>.der
//! <root>/trusted/crl/<thumb>.der
//! <root>/issuers/certs/<thumb>.der
//! <root>/issuers/crl/<thumb>.der
//! ```
//!
//! Updates are written under `<root>/updatedTrustList/` shadowing the
//! primary tree; loads try the updated tree first and fall back. Paths
//! are joined with `/` — the layout predates this implementation and
//! every supported platform accepts it. A directory that cannot be
//! listed counts as empty: some platform shims report a generic error
//! for both cases and the load path must degrade gracefully.

use crate::cert::{CertificateList, CrlList};
use crate::error::{Result, StackError};
use tracing::{debug, error};

pub(crate) const STR_TRUSTED: &str = "/trusted";
pub(crate) const STR_TRUSTED_CERTS: &str = "/trusted/certs";
pub(crate) const STR_TRUSTED_CRL: &str = "/trusted/crl";
pub(crate) const STR_ISSUERS: &str = "/issuers";
pub(crate) const STR_ISSUERS_CERTS: &str = "/issuers/certs";
pub(crate) const STR_ISSUERS_CRL: &str = "/issuers/crl";
pub(crate) const STR_UPDATED_TRUSTLIST: &str = "/updatedTrustList";

/// File paths inside `dir`, sorted; empty when the directory cannot be
/// listed
fn dir_file_paths(dir: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return paths,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            if let Some(p) = path.to_str() {
                paths.push(p.to_owned());
            }
        }
    }
    paths.sort();
    paths
}

fn load_certs(dir: &str) -> Result<CertificateList> {
    let mut list = CertificateList::new();
    for path in dir_file_paths(dir) {
        debug!(path, "PKI loading certificate file");
        list.push_from_file(&path)?;
    }
    Ok(list)
}

fn load_crls(dir: &str) -> Result<CrlList> {
    let mut list = CrlList::new();
    for path in dir_file_paths(dir) {
        debug!(path, "PKI loading CRL file");
        list.push_from_file(&path)?;
    }
    Ok(list)
}

/// Loaded store content: trusted certs/CRLs and issuer certs/CRLs
pub(crate) struct StoreContent {
    pub(crate) trusted_certs: CertificateList,
    pub(crate) trusted_crls: CrlList,
    pub(crate) issuer_certs: CertificateList,
    pub(crate) issuer_crls: CrlList,
}

impl StoreContent {
    pub(crate) fn is_empty(&self) -> bool {
        self.trusted_certs.is_empty()
            && self.trusted_crls.is_empty()
            && self.issuer_certs.is_empty()
            && self.issuer_crls.is_empty()
    }
}

/// Read the four leaf directories under `base`
pub(crate) fn load_store_content(base: &str) -> Result<StoreContent> {
    Ok(StoreContent {
        trusted_certs: load_certs(&format!("{base}{STR_TRUSTED_CERTS}"))?,
        trusted_crls: load_crls(&format!("{base}{STR_TRUSTED_CRL}"))?,
        issuer_certs: load_certs(&format!("{base}{STR_ISSUERS_CERTS}"))?,
        issuer_crls: load_crls(&format!("{base}{STR_ISSUERS_CRL}"))?,
    })
}

/// Idempotent directory creation, returning the joined path
pub(crate) fn may_create_dir(base: &str, sub: &str) -> Result<String> {
    let path = format!("{base}{sub}");
    match std::fs::create_dir_all(&path) {
        Ok(()) => Ok(path),
        Err(e) => {
            error!(path, "PKI store: failed to create directory");
            Err(e.into())
        }
    }
}

/// Delete every file inside `dir`
pub(crate) fn remove_files(dir: &str) -> Result<()> {
    for path in dir_file_paths(dir) {
        std::fs::remove_file(&path)
            .map_err(|e| StackError::Store(format!("failed to remove {path}: {e}")))?;
    }
    Ok(())
}

/// Write certificates (roots then the rest) under `dir`
pub(crate) fn write_cert_files(
    roots: &CertificateList,
    certs: &CertificateList,
    dir: &str,
    erase_existing: bool,
) -> Result<()> {
    if erase_existing {
        remove_files(dir)?;
    }
    roots.write_der_files(dir)?;
    certs.write_der_files(dir)
}

/// Write CRLs under `dir`
pub(crate) fn write_crl_files(crls: &CrlList, dir: &str, erase_existing: bool) -> Result<()> {
    if erase_existing {
        remove_files(dir)?;
    }
    crls.write_der_files(dir)
}
