//! On-disk trust store round-trips and TrustList updates

mod common;

use common::{cert_list, crl_list, make_crl, make_leaf, make_root, LeafOptions};
use opcua_stack::cert::Certificate;
use opcua_stack::cert::{CertificateList, CrlList};
use opcua_stack::keys::sha1_thumbprint;
use opcua_stack::pki::{PkiConfig, PkiProvider, SecurityPolicy};

struct Fixture {
    root: common::TestCert,
    leaf: common::TestCert,
    root_crl: Vec<u8>,
}

fn fixture() -> Fixture {
    let root = make_root("Store Root CA");
    let leaf = make_leaf(&LeafOptions::default(), &root);
    let root_crl = make_crl(&root, &[]);
    Fixture {
        root,
        leaf,
        root_crl,
    }
}

fn provider_from(fx: &Fixture) -> PkiProvider {
    PkiProvider::from_lists(
        cert_list(&[&fx.root.der, &fx.leaf.der]),
        crl_list(&[&fx.root_crl]),
        cert_list(&[]),
        crl_list(&[]),
        &PkiConfig::default(),
    )
    .unwrap()
}

// ============================================================================
// Write and reload
// ============================================================================

#[test]
fn test_write_to_store_and_reload() {
    let fx = fixture();
    let dir = tempfile::tempdir().unwrap();
    let store_root = dir.path().to_str().unwrap();

    let pki = provider_from(&fx);
    pki.set_store_path(store_root).unwrap();
    pki.write_to_store(false).unwrap();

    // Files land under the updatedTrustList shadow with thumbprint names.
    let cert_path = format!(
        "{store_root}/updatedTrustList/trusted/certs/{}.der",
        sha1_thumbprint(&fx.root.der)
    );
    assert_eq!(std::fs::read(&cert_path).unwrap(), fx.root.der);
    let crl_path = format!(
        "{store_root}/updatedTrustList/trusted/crl/{}.der",
        sha1_thumbprint(&fx.root_crl)
    );
    assert_eq!(std::fs::read(&crl_path).unwrap(), fx.root_crl);

    // Reload prefers the updated tree and yields the same collections.
    let reloaded = PkiProvider::from_store(store_root, &PkiConfig::default()).unwrap();
    let sizes = reloaded.sizes();
    assert_eq!(sizes.trusted_roots, 1);
    assert_eq!(sizes.trusted_certs, 1);
    assert_eq!(sizes.trusted_crls, 1);
    assert_eq!(reloaded.store_path().as_deref(), Some(store_root));

    let cert = Certificate::from_der(&fx.leaf.der).unwrap();
    let profile = SecurityPolicy::Basic256Sha256.profile();
    reloaded.validate_certificate(&cert, &profile).unwrap();
}

#[test]
fn test_load_falls_back_to_primary_tree() {
    let fx = fixture();
    let dir = tempfile::tempdir().unwrap();
    let store_root = dir.path().to_str().unwrap();

    // Populate only the primary tree; no updatedTrustList exists.
    for sub in [
        "/trusted/certs",
        "/trusted/crl",
        "/issuers/certs",
        "/issuers/crl",
    ] {
        std::fs::create_dir_all(format!("{store_root}{sub}")).unwrap();
    }
    std::fs::write(
        format!(
            "{store_root}/trusted/certs/{}.der",
            sha1_thumbprint(&fx.root.der)
        ),
        &fx.root.der,
    )
    .unwrap();
    std::fs::write(
        format!(
            "{store_root}/trusted/certs/{}.der",
            sha1_thumbprint(&fx.leaf.der)
        ),
        &fx.leaf.der,
    )
    .unwrap();
    std::fs::write(
        format!(
            "{store_root}/trusted/crl/{}.der",
            sha1_thumbprint(&fx.root_crl)
        ),
        &fx.root_crl,
    )
    .unwrap();

    let pki = PkiProvider::from_store(store_root, &PkiConfig::default()).unwrap();
    assert_eq!(pki.sizes().trusted_roots, 1);
    assert_eq!(pki.sizes().trusted_certs, 1);
}

#[test]
fn test_empty_store_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store_root = dir.path().to_str().unwrap();
    assert!(PkiProvider::from_store(store_root, &PkiConfig::default()).is_err());
}

#[test]
fn test_erase_existing_clears_stale_files() {
    let fx = fixture();
    let dir = tempfile::tempdir().unwrap();
    let store_root = dir.path().to_str().unwrap();

    let pki = provider_from(&fx);
    pki.set_store_path(store_root).unwrap();
    pki.write_to_store(false).unwrap();

    // Drop a stale file into the certs directory, then rewrite erasing.
    let stale = format!("{store_root}/updatedTrustList/trusted/certs/STALE.der");
    std::fs::write(&stale, b"stale").unwrap();
    pki.write_to_store(true).unwrap();
    assert!(!std::path::Path::new(&stale).exists());
    // Current content is still present.
    let kept = format!(
        "{store_root}/updatedTrustList/trusted/certs/{}.der",
        sha1_thumbprint(&fx.root.der)
    );
    assert!(std::path::Path::new(&kept).exists());
}

// ============================================================================
// Exports and updates
// ============================================================================

#[test]
fn test_write_or_append_to_list_exports_collections() {
    let fx = fixture();
    let pki = provider_from(&fx);

    let mut trusted = CertificateList::new();
    let mut trusted_crls = CrlList::new();
    let mut issuers = CertificateList::new();
    let mut issuer_crls = CrlList::new();
    pki.write_or_append_to_list(
        &mut trusted,
        &mut trusted_crls,
        &mut issuers,
        &mut issuer_crls,
    )
    .unwrap();

    assert_eq!(trusted.len(), 2); // root folded back next to the leaf
    assert_eq!(trusted_crls.len(), 1);
    assert!(issuers.is_empty());
    assert!(issuer_crls.is_empty());
    assert!(trusted.contains_exact(&fx.root.der));
    assert!(trusted.contains_exact(&fx.leaf.der));
}

#[test]
fn test_update_replaces_collections_atomically() {
    let fx = fixture();
    let pki = provider_from(&fx);

    let other_root = make_root("Replacement Root CA");
    let other_leaf = make_leaf(&LeafOptions::default(), &other_root);
    let other_crl = make_crl(&other_root, &[]);

    pki.update_from_lists(
        cert_list(&[&other_root.der, &other_leaf.der]),
        crl_list(&[&other_crl]),
        cert_list(&[]),
        crl_list(&[]),
        false,
    )
    .unwrap();

    // The old leaf no longer validates, the new one does.
    let profile = SecurityPolicy::Basic256Sha256.profile();
    let old = Certificate::from_der(&fx.leaf.der).unwrap();
    assert!(pki.validate_certificate(&old, &profile).is_err());
    let new = Certificate::from_der(&other_leaf.der).unwrap();
    pki.validate_certificate(&new, &profile).unwrap();
}

#[test]
fn test_update_with_include_existing_merges() {
    let fx = fixture();
    let pki = provider_from(&fx);

    let other_root = make_root("Additional Root CA");
    let other_leaf = make_leaf(&LeafOptions::default(), &other_root);
    let other_crl = make_crl(&other_root, &[]);

    pki.update_from_lists(
        cert_list(&[&other_root.der, &other_leaf.der]),
        crl_list(&[&other_crl]),
        cert_list(&[]),
        crl_list(&[]),
        true,
    )
    .unwrap();

    let profile = SecurityPolicy::Basic256Sha256.profile();
    for der in [&fx.leaf.der, &other_leaf.der] {
        let cert = Certificate::from_der(der).unwrap();
        pki.validate_certificate(&cert, &profile).unwrap();
    }
    assert_eq!(pki.sizes().trusted_roots, 2);
}

#[test]
fn test_failed_update_leaves_provider_untouched() {
    let fx = fixture();
    let pki = provider_from(&fx);

    // An empty trusted set is a configuration error; the update must
    // fail and the provider keep validating as before.
    assert!(pki
        .update_from_lists(
            CertificateList::new(),
            CrlList::new(),
            CertificateList::new(),
            CrlList::new(),
            false,
        )
        .is_err());

    let profile = SecurityPolicy::Basic256Sha256.profile();
    let cert = Certificate::from_der(&fx.leaf.der).unwrap();
    pki.validate_certificate(&cert, &profile).unwrap();
}
