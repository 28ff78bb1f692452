//! PKI provider: trust collections, chain validation, rejected list,
//! on-disk store
//!
//! The provider owns six primary collections (trusted/issuer ×
//! roots/certs/CRLs) plus derived unions, a bounded FIFO list of
//! rejected certificates and an optional store root on disk. A
//! permissive variant accepts everything and exists for test fixtures
//! only; once constructed permissive a provider can never be demoted to
//! strict, and a strict provider can never become permissive.
//!
//! Interior state sits behind a mutex so a TrustList update may arrive
//! from a thread other than the event loop (hot reload). Acquisition is
//! non-reentrant and confined to the public entry points.

pub mod profile;
pub(crate) mod store;
pub(crate) mod verify;

pub use profile::{
    ChainProfile, ExtKeyUsageMask, HashFamily, KeyUsageMask, LeafProfile, Profile,
    PublicKeyAlgorithm, SecurityPolicy,
};

use crate::cert::{Certificate, CertificateList, CrlList};
use crate::error::{CertificateError, Result, StackError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, error, warn};
use verify::{walk_chain, ChainContext, VerifyFlags};

/// Construction-time configuration knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkiConfig {
    /// Upper bound on the rejected-certificate list
    pub max_rejected: usize,
    /// Allow self-signed end-entity certificates as chain leaves
    pub backward_interoperability: bool,
    /// Skip CRL presence/verification during the chain walk
    pub disable_revocation_check: bool,
    /// Run the leaf checks in addition to the chain walk
    pub apply_leaf_profile: bool,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            max_rejected: 512,
            backward_interoperability: true,
            disable_revocation_check: false,
            apply_leaf_profile: true,
        }
    }
}

impl PkiConfig {
    /// Build a [`Profile`] for `policy` with this configuration applied
    pub fn profile(&self, policy: SecurityPolicy) -> Profile {
        let mut profile = policy.profile();
        profile.backward_interoperability = self.backward_interoperability;
        profile.apply_leaf_profile = self.apply_leaf_profile;
        profile.chain.disable_revocation_check = self.disable_revocation_check;
        profile
    }
}

/// Collection sizes, exposed for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PkiSizes {
    /// Self-signed trusted CAs
    pub trusted_roots: usize,
    /// Trusted intermediates and leaves
    pub trusted_certs: usize,
    /// CRLs of the trusted CAs
    pub trusted_crls: usize,
    /// Issuer roots (validate issued certs, not trusted themselves)
    pub issuer_roots: usize,
    /// Issuer intermediates
    pub issuer_certs: usize,
    /// CRLs of the issuer CAs
    pub issuer_crls: usize,
}

#[derive(Debug, Default)]
struct PkiInner {
    trusted_roots: CertificateList,
    trusted_certs: CertificateList,
    trusted_crls: CrlList,
    issuer_roots: CertificateList,
    issuer_certs: CertificateList,
    issuer_crls: CrlList,
    all_roots: CertificateList,
    all_certs: CertificateList,
    all_crls: CrlList,
    rejected: VecDeque<Certificate>,
    max_rejected: usize,
    store_path: Option<String>,
}

impl PkiInner {
    /// FIFO append with the cap enforced; a byte-identical entry is a
    /// no-op
    fn reject(&mut self, cert: &Certificate) {
        if self.max_rejected == 0 {
            return;
        }
        if self.rejected.iter().any(|c| c.der() == cert.der()) {
            return;
        }
        if self.rejected.len() >= self.max_rejected {
            self.rejected.pop_front();
        }
        self.rejected.push_back(cert.clone());
    }
}

enum ProviderMode {
    Strict,
    /// Every validation succeeds. Test fixtures only; never valid in a
    /// production configuration.
    Permissive,
}

/// The PKI provider
pub struct PkiProvider {
    mode: ProviderMode,
    inner: Mutex<PkiInner>,
}

fn check_lists(
    trusted_certs: &CertificateList,
    issuer_certs: &CertificateList,
    trusted_crls: &CrlList,
    issuer_crls: &CrlList,
) -> Result<()> {
    if trusted_certs.is_empty() {
        error!("PKI creation error: no trusted certificate is provided");
        return Err(StackError::InvalidArgument(
            "no trusted certificate is provided".into(),
        ));
    }
    let (trusted_cas, trusted_roots) = trusted_certs.stats();
    let issued_certs = trusted_certs.len() - trusted_cas;
    if trusted_cas != 0 && trusted_crls.is_empty() {
        error!("PKI creation error: trusted CA certificates are provided but no CRL");
        return Err(StackError::InvalidArgument(
            "trusted CA certificates are provided but no CRL".into(),
        ));
    }
    if issued_certs == 0 && trusted_roots == 0 {
        error!("PKI creation error: no trusted certificate and no trusted root is given");
        return Err(StackError::InvalidArgument(
            "no trusted certificate and no trusted root: no certificates will be accepted".into(),
        ));
    }
    let (issuer_cas, issuer_roots) = issuer_certs.stats();
    if issuer_cas != 0 && issuer_crls.is_empty() {
        error!("PKI creation error: issuer CA certificates are provided but no CRL");
        return Err(StackError::InvalidArgument(
            "issuer CA certificates are provided but no CRL".into(),
        ));
    }
    if issuer_certs.len() != issuer_cas {
        error!("PKI creation error: not all issuer certificates are CAs");
        return Err(StackError::InvalidArgument(
            "not all issuer certificates are CAs".into(),
        ));
    }
    if issuer_cas != 0 && issued_certs == 0 {
        warn!(
            "PKI creation: issuer certificates given but no trusted end-entity certificates: \
             only trusted root CAs will be accepted (if backward interoperability is enabled)"
        );
    }
    if issuer_roots == 0 && trusted_roots == 0 && issued_certs != 0 {
        warn!(
            "PKI creation: no root CA defined: only trusted self-signed issued certificates \
             will be accepted, without revocation"
        );
    }
    Ok(())
}

fn build_inner(
    mut trusted_certs: CertificateList,
    trusted_crls: CrlList,
    mut issuer_certs: CertificateList,
    issuer_crls: CrlList,
    max_rejected: usize,
) -> Result<PkiInner> {
    check_lists(&trusted_certs, &issuer_certs, &trusted_crls, &issuer_crls)?;

    let (trusted_cas, _) = trusted_certs.stats();
    if trusted_cas != 0 && !trusted_crls.covers_all_cas(&trusted_certs) {
        warn!(
            "PKI creation: not every CA in the trusted certificates has a verifying CRL; \
             certificates issued by the uncovered CAs will be refused"
        );
    }
    let (issuer_cas, _) = issuer_certs.stats();
    if issuer_cas != 0 && !issuer_crls.covers_all_cas(&issuer_certs) {
        warn!(
            "PKI creation: not every CA in the issuer certificates has a verifying CRL; \
             certificates issued by the uncovered CAs will be refused"
        );
    }

    let trusted_roots = trusted_certs.split_roots();
    let issuer_roots = issuer_certs.split_roots();

    let mut all_certs = CertificateList::new();
    all_certs.merge_from(&issuer_certs);
    all_certs.merge_from(&trusted_certs);
    let mut all_roots = CertificateList::new();
    all_roots.merge_from(&issuer_roots);
    all_roots.merge_from(&trusted_roots);
    let mut all_crls = CrlList::new();
    all_crls.merge_from(&issuer_crls);
    all_crls.merge_from(&trusted_crls);

    Ok(PkiInner {
        trusted_roots,
        trusted_certs,
        trusted_crls,
        issuer_roots,
        issuer_certs,
        issuer_crls,
        all_roots,
        all_certs,
        all_crls,
        rejected: VecDeque::new(),
        max_rejected,
        store_path: None,
    })
}

impl PkiProvider {
    /// Build a strict provider from explicit collections
    ///
    /// Construction is atomic: any failure leaves nothing behind. The
    /// trusted set must not be empty — an empty trust configuration is
    /// an error, not a silent reject-all.
    pub fn from_lists(
        trusted_certs: CertificateList,
        trusted_crls: CrlList,
        issuer_certs: CertificateList,
        issuer_crls: CrlList,
        config: &PkiConfig,
    ) -> Result<Self> {
        let inner = build_inner(
            trusted_certs,
            trusted_crls,
            issuer_certs,
            issuer_crls,
            config.max_rejected,
        )?;
        Ok(Self {
            mode: ProviderMode::Strict,
            inner: Mutex::new(inner),
        })
    }

    /// Build a strict provider from an on-disk store
    ///
    /// The `updatedTrustList` shadow directory is tried first; when it is
    /// empty or malformed the primary tree is used instead.
    pub fn from_store(directory_store_path: &str, config: &PkiConfig) -> Result<Self> {
        if directory_store_path.is_empty() {
            return Err(StackError::InvalidArgument("empty store path".into()));
        }
        let updated = format!("{directory_store_path}{}", store::STR_UPDATED_TRUSTLIST);
        let provider = Self::try_store_dir(&updated, config).or_else(|e| {
            warn!(
                error = %e,
                "PKI creation: updated trust list missing or malformed, \
                 switching to the trusted and issuers folders"
            );
            Self::try_store_dir(directory_store_path, config)
        })?;
        provider
            .inner
            .lock()
            .expect("pki mutex poisoned")
            .store_path = Some(directory_store_path.to_owned());
        Ok(provider)
    }

    fn try_store_dir(base: &str, config: &PkiConfig) -> Result<Self> {
        let content = store::load_store_content(base)?;
        if content.is_empty() {
            return Err(StackError::Store(format!(
                "certificate store is empty ({base})"
            )));
        }
        Self::from_lists(
            content.trusted_certs,
            content.trusted_crls,
            content.issuer_certs,
            content.issuer_crls,
            config,
        )
    }

    /// Build a permissive provider that accepts any certificate
    ///
    /// The flag is sticky: a permissive provider can never be demoted.
    pub fn permissive() -> Self {
        Self {
            mode: ProviderMode::Permissive,
            inner: Mutex::new(PkiInner::default()),
        }
    }

    /// True for providers built with [`PkiProvider::permissive`]
    pub fn is_permissive(&self) -> bool {
        matches!(self.mode, ProviderMode::Permissive)
    }

    /// Validate a single end-entity certificate against `profile`
    ///
    /// On failure the candidate joins the rejected list; on success any
    /// byte-identical rejected entry is dropped. The caller's record is
    /// never mutated.
    pub fn validate_certificate(&self, cert: &Certificate, profile: &Profile) -> Result<()> {
        if self.is_permissive() {
            return Ok(());
        }
        let thumbprint = cert.thumbprint();
        let now = chrono::Utc::now().timestamp();
        let mut inner = self.inner.lock().expect("pki mutex poisoned");

        // CA certificates are never acceptable leaves, except a
        // self-signed zero-pathlen root under backward interoperability.
        if cert.is_ca() {
            let self_signed_leaf_ok = cert.is_self_signed()
                && profile.backward_interoperability
                && cert.path_len().unwrap_or(0) == 0;
            if !self_signed_leaf_ok {
                error!(%thumbprint, "PKI validation failed: certificate is a CA");
                inner.reject(cert);
                return Err(StackError::Validation(CertificateError::UseNotAllowed));
            }
        }

        if profile.apply_leaf_profile {
            if let Err(e) = profile.leaf.check(cert) {
                error!(%thumbprint, "PKI validation failed: bad properties of certificate");
                inner.reject(cert);
                return Err(StackError::Validation(e));
            }
        }

        let ctx = ChainContext {
            intermediates: &inner.all_certs,
            roots: &inner.all_roots,
            crls: &inner.all_crls,
            trusted_certs: &inner.trusted_certs,
            trusted_roots: &inner.trusted_roots,
        };
        let outcome = walk_chain(cert, &ctx, &profile.chain, now);
        let mut flags = outcome.flags;

        // Path validity alone is insufficient: some member of the chain
        // must belong to the trusted sets.
        if flags.is_clear() && !outcome.trusted_seen {
            flags.set(VerifyFlags::NOT_TRUSTED);
        }
        if !flags.is_clear() {
            let code = flags.to_error();
            error!(%thumbprint, %code, "PKI validation failed");
            inner.reject(cert);
            return Err(StackError::Validation(code));
        }

        inner.rejected.retain(|c| c.der() != cert.der());
        debug!(%thumbprint, "PKI validation succeeded");
        Ok(())
    }

    /// Walk every provider certificate with trust forced, collecting
    /// `(verdict, thumbprint)` diagnostics for the failures
    pub fn verify_every_certificate(
        &self,
        chain_profile: &ChainProfile,
    ) -> Result<Vec<(CertificateError, String)>> {
        if self.is_permissive() {
            return Err(StackError::InvalidArgument(
                "permissive PKI has nothing to verify".into(),
            ));
        }
        let now = chrono::Utc::now().timestamp();
        let inner = self.inner.lock().expect("pki mutex poisoned");
        let ctx = ChainContext {
            intermediates: &inner.all_certs,
            roots: &inner.all_roots,
            crls: &inner.all_crls,
            trusted_certs: &inner.trusted_certs,
            trusted_roots: &inner.trusted_roots,
        };
        let mut failures = Vec::new();
        for cert in inner.all_certs.iter().chain(inner.all_roots.iter()) {
            let outcome = walk_chain(cert, &ctx, chain_profile, now);
            if !outcome.flags.is_clear() {
                failures.push((outcome.flags.to_error(), cert.thumbprint()));
            }
        }
        Ok(failures)
    }

    /// Thumbprints currently on the rejected list, oldest first
    pub fn rejected_thumbprints(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("pki mutex poisoned")
            .rejected
            .iter()
            .map(|c| c.thumbprint())
            .collect()
    }

    /// Current collection sizes
    pub fn sizes(&self) -> PkiSizes {
        let inner = self.inner.lock().expect("pki mutex poisoned");
        PkiSizes {
            trusted_roots: inner.trusted_roots.len(),
            trusted_certs: inner.trusted_certs.len(),
            trusted_crls: inner.trusted_crls.len(),
            issuer_roots: inner.issuer_roots.len(),
            issuer_certs: inner.issuer_certs.len(),
            issuer_crls: inner.issuer_crls.len(),
        }
    }

    /// The configured store root, when one is set
    pub fn store_path(&self) -> Option<String> {
        self.inner
            .lock()
            .expect("pki mutex poisoned")
            .store_path
            .clone()
    }

    /// Point the provider at a store root, creating it when necessary
    pub fn set_store_path(&self, directory_store_path: &str) -> Result<()> {
        if self.is_permissive() {
            return Err(StackError::InvalidArgument(
                "permissive PKI has no store".into(),
            ));
        }
        std::fs::create_dir_all(directory_store_path)?;
        self.inner
            .lock()
            .expect("pki mutex poisoned")
            .store_path = Some(directory_store_path.to_owned());
        Ok(())
    }

    /// Export the current collections by merging them into the caller's
    /// lists (roots folded back into their primary lists)
    pub fn write_or_append_to_list(
        &self,
        trusted_certs: &mut CertificateList,
        trusted_crls: &mut CrlList,
        issuer_certs: &mut CertificateList,
        issuer_crls: &mut CrlList,
    ) -> Result<()> {
        if self.is_permissive() {
            return Err(StackError::InvalidArgument(
                "permissive PKI has no collections".into(),
            ));
        }
        let inner = self.inner.lock().expect("pki mutex poisoned");
        trusted_certs.merge_from(&inner.trusted_roots);
        trusted_certs.merge_from(&inner.trusted_certs);
        trusted_crls.merge_from(&inner.trusted_crls);
        issuer_certs.merge_from(&inner.issuer_roots);
        issuer_certs.merge_from(&inner.issuer_certs);
        issuer_crls.merge_from(&inner.issuer_crls);
        Ok(())
    }

    /// Write the collections under `<store>/updatedTrustList/`
    ///
    /// Every parent directory is created idempotently; with
    /// `erase_existing` the leaf directories are emptied first.
    pub fn write_to_store(&self, erase_existing: bool) -> Result<()> {
        if self.is_permissive() {
            return Err(StackError::InvalidArgument(
                "permissive PKI has no store".into(),
            ));
        }
        let inner = self.inner.lock().expect("pki mutex poisoned");
        let root = inner.store_path.as_deref().ok_or_else(|| {
            StackError::InvalidArgument("PKI was built from buffers, no store is set".into())
        })?;
        let base = store::may_create_dir(root, store::STR_UPDATED_TRUSTLIST)?;
        store::may_create_dir(&base, store::STR_TRUSTED)?;
        let certs_dir = store::may_create_dir(&base, store::STR_TRUSTED_CERTS)?;
        store::write_cert_files(
            &inner.trusted_roots,
            &inner.trusted_certs,
            &certs_dir,
            erase_existing,
        )?;
        let crl_dir = store::may_create_dir(&base, store::STR_TRUSTED_CRL)?;
        store::write_crl_files(&inner.trusted_crls, &crl_dir, erase_existing)?;
        store::may_create_dir(&base, store::STR_ISSUERS)?;
        let certs_dir = store::may_create_dir(&base, store::STR_ISSUERS_CERTS)?;
        store::write_cert_files(
            &inner.issuer_roots,
            &inner.issuer_certs,
            &certs_dir,
            erase_existing,
        )?;
        let crl_dir = store::may_create_dir(&base, store::STR_ISSUERS_CRL)?;
        store::write_crl_files(&inner.issuer_crls, &crl_dir, erase_existing)
    }

    /// Replace or extend the trust collections
    ///
    /// With `include_existing` the new collections are merged over the
    /// current ones; otherwise they replace them. The replacement is
    /// built first and swapped in only on success — on any failure the
    /// provider is left untouched. The rejected list starts empty in the
    /// replacement.
    pub fn update_from_lists(
        &self,
        trusted_certs: CertificateList,
        trusted_crls: CrlList,
        issuer_certs: CertificateList,
        issuer_crls: CrlList,
        include_existing: bool,
    ) -> Result<()> {
        if self.is_permissive() {
            return Err(StackError::InvalidArgument(
                "permissive PKI cannot be updated".into(),
            ));
        }
        let mut inner = self.inner.lock().expect("pki mutex poisoned");

        let (t_certs, t_crls, i_certs, i_crls) = if include_existing {
            let mut t = CertificateList::new();
            t.merge_from(&inner.trusted_roots);
            t.merge_from(&inner.trusted_certs);
            t.merge_from(&trusted_certs);
            let mut tc = CrlList::new();
            tc.merge_from(&inner.trusted_crls);
            tc.merge_from(&trusted_crls);
            let mut i = CertificateList::new();
            i.merge_from(&inner.issuer_roots);
            i.merge_from(&inner.issuer_certs);
            i.merge_from(&issuer_certs);
            let mut ic = CrlList::new();
            ic.merge_from(&inner.issuer_crls);
            ic.merge_from(&issuer_crls);
            (t, tc, i, ic)
        } else {
            (trusted_certs, trusted_crls, issuer_certs, issuer_crls)
        };

        let mut replacement = build_inner(t_certs, t_crls, i_certs, i_crls, inner.max_rejected)?;
        replacement.store_path = inner.store_path.take();
        *inner = replacement;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissive_accepts_everything_and_is_sticky() {
        let pki = PkiProvider::permissive();
        assert!(pki.is_permissive());
        // No mutation path can produce a strict provider from it.
        assert!(pki.set_store_path("/tmp/nope").is_err());
        assert!(pki.write_to_store(false).is_err());
        assert!(pki
            .update_from_lists(
                CertificateList::new(),
                CrlList::new(),
                CertificateList::new(),
                CrlList::new(),
                false,
            )
            .is_err());
    }

    #[test]
    fn test_empty_trusted_set_is_a_configuration_error() {
        let err = PkiProvider::from_lists(
            CertificateList::new(),
            CrlList::new(),
            CertificateList::new(),
            CrlList::new(),
            &PkiConfig::default(),
        );
        assert!(matches!(err, Err(StackError::InvalidArgument(_))));
    }

    #[test]
    fn test_default_config() {
        let config = PkiConfig::default();
        assert_eq!(config.max_rejected, 512);
        assert!(config.apply_leaf_profile);
        assert!(!config.disable_revocation_check);
        let profile = config.profile(SecurityPolicy::Basic256Sha256);
        assert!(profile.apply_leaf_profile);
        assert!(!profile.chain.disable_revocation_check);
    }
}
