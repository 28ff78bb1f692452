//! X.509 chain walk and failure-flag translation
//!
//! The walk builds the chain by issuer-DN lookup over the candidate, the
//! provider's intermediates and its root set, verifying each link
//! signature, the validity windows, the chain profile pins, CRL bindings
//! per traversed authority and revocation. Failures accumulate in a flag
//! bitmap that is translated to a single verdict by a fixed priority
//! order.

use crate::cert::{Certificate, CertificateList, CrlList};
use crate::error::CertificateError;
use crate::pki::profile::{ChainProfile, KeyUsageMask, PublicKeyAlgorithm};

/// Upper bound on chain length, leaf included
const MAX_CHAIN_DEPTH: usize = 10;

/// Verification failure flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct VerifyFlags(pub u32);

impl VerifyFlags {
    pub(crate) const MISSING: u32 = 1 << 0;
    pub(crate) const KEY_USAGE: u32 = 1 << 1;
    pub(crate) const EXT_KEY_USAGE: u32 = 1 << 2;
    pub(crate) const NS_CERT_TYPE: u32 = 1 << 3;
    pub(crate) const SKIP_VERIFY: u32 = 1 << 4;
    pub(crate) const BAD_KEY: u32 = 1 << 5;
    pub(crate) const BAD_MD: u32 = 1 << 6;
    pub(crate) const BAD_PK: u32 = 1 << 7;
    pub(crate) const NOT_TRUSTED: u32 = 1 << 8;
    pub(crate) const EXPIRED: u32 = 1 << 9;
    pub(crate) const FUTURE: u32 = 1 << 10;
    pub(crate) const CN_MISMATCH: u32 = 1 << 11;
    pub(crate) const CRL_NOT_TRUSTED: u32 = 1 << 12;
    pub(crate) const CRL_EXPIRED: u32 = 1 << 13;
    pub(crate) const REVOKED: u32 = 1 << 14;
    pub(crate) const OTHER: u32 = 1 << 15;

    pub(crate) fn set(&mut self, flag: u32) {
        self.0 |= flag;
    }

    pub(crate) fn is_clear(self) -> bool {
        self.0 == 0
    }

    fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    /// Translate the bitmap to one verdict, first match wins
    pub(crate) fn to_error(self) -> CertificateError {
        if self.has(Self::MISSING)
            || self.has(Self::KEY_USAGE)
            || self.has(Self::EXT_KEY_USAGE)
            || self.has(Self::NS_CERT_TYPE)
        {
            CertificateError::Invalid
        } else if self.has(Self::SKIP_VERIFY) {
            CertificateError::UseNotAllowed
        } else if self.has(Self::BAD_KEY) || self.has(Self::BAD_MD) || self.has(Self::BAD_PK) {
            CertificateError::Invalid
        } else if self.has(Self::NOT_TRUSTED) {
            CertificateError::Untrusted
        } else if self.has(Self::EXPIRED) || self.has(Self::FUTURE) {
            CertificateError::TimeInvalid
        } else if self.has(Self::CN_MISMATCH) {
            CertificateError::HostNameInvalid
        } else if self.has(Self::CRL_NOT_TRUSTED) || self.has(Self::CRL_EXPIRED) {
            CertificateError::RevocationUnknown
        } else if self.has(Self::REVOKED) {
            CertificateError::Revoked
        } else if self.has(Self::OTHER) {
            CertificateError::Untrusted
        } else {
            CertificateError::Unknown
        }
    }
}

/// Outcome of a chain walk
pub(crate) struct ChainOutcome {
    pub(crate) flags: VerifyFlags,
    /// A member of the trusted sets appeared somewhere in the chain
    pub(crate) trusted_seen: bool,
}

/// Inputs the walk needs from the provider
pub(crate) struct ChainContext<'a> {
    /// Intermediates available for chain building (trusted + issuer)
    pub(crate) intermediates: &'a CertificateList,
    /// Root set: trusted roots plus issuer roots
    pub(crate) roots: &'a CertificateList,
    /// Every CRL known to the provider
    pub(crate) crls: &'a CrlList,
    /// Trusted non-root certificates, for trust-in-chain tracking
    pub(crate) trusted_certs: &'a CertificateList,
    /// Trusted roots, for trust-in-chain tracking
    pub(crate) trusted_roots: &'a CertificateList,
}

fn profile_check(cert: &Certificate, profile: &ChainProfile, flags: &mut VerifyFlags) {
    match cert.signature_hash() {
        Some(hash) if profile.hash_family.allows(hash) => {}
        _ => flags.set(VerifyFlags::BAD_MD),
    }
    if profile.pk_algo == PublicKeyAlgorithm::Rsa && cert.public_key().is_err() {
        flags.set(VerifyFlags::BAD_PK);
    }
    if cert.public_key().is_ok() && cert.key_size_bits() < profile.rsa_min_key_bits {
        flags.set(VerifyFlags::BAD_KEY);
    }
}

fn time_check(cert: &Certificate, now: i64, flags: &mut VerifyFlags) {
    match cert.time_violation_at(now) {
        Some(true) => flags.set(VerifyFlags::EXPIRED),
        Some(false) => flags.set(VerifyFlags::FUTURE),
        None => {}
    }
}

/// Per-authority checks: keyCertSign, CRL binding, revocation of `child`
fn authority_check(
    ca: &Certificate,
    child: &Certificate,
    ctx: &ChainContext<'_>,
    profile: &ChainProfile,
    flags: &mut VerifyFlags,
) {
    if let Some(ku) = ca.key_usage_flags() {
        if ku & KeyUsageMask::KEY_CERT_SIGN == 0 {
            flags.set(VerifyFlags::KEY_USAGE);
        }
    }
    if profile.disable_revocation_check {
        return;
    }
    if !ctx.crls.has_binding_for(ca) {
        flags.set(VerifyFlags::CRL_NOT_TRUSTED);
        return;
    }
    if ctx.crls.is_revoked_by(ca, child.serial()) {
        flags.set(VerifyFlags::REVOKED);
    }
}

fn mark_trusted_if_member(cert: &Certificate, ctx: &ChainContext<'_>, trusted_seen: &mut bool) {
    if *trusted_seen {
        return;
    }
    if ctx.trusted_certs.contains_exact(cert.der()) || ctx.trusted_roots.contains_exact(cert.der())
    {
        *trusted_seen = true;
    }
}

/// Walk the chain rooted at `candidate`
///
/// `now` is unix seconds. The candidate itself acts as the anchor when it
/// is self-signed — OPC UA lets any chain member carry the trust, so path
/// validity and trust membership are judged separately by the caller.
pub(crate) fn walk_chain(
    candidate: &Certificate,
    ctx: &ChainContext<'_>,
    profile: &ChainProfile,
    now: i64,
) -> ChainOutcome {
    let mut flags = VerifyFlags::default();
    let mut trusted_seen = false;

    let mut current = candidate.clone();
    let mut depth = 0usize;

    loop {
        if depth >= MAX_CHAIN_DEPTH {
            flags.set(VerifyFlags::OTHER);
            break;
        }
        profile_check(&current, profile, &mut flags);
        time_check(&current, now, &mut flags);
        mark_trusted_if_member(&current, ctx, &mut trusted_seen);

        if current.is_self_signed() {
            // Anchored at itself, or at a known root carrying the same bytes.
            if depth > 0 && !ctx.roots.contains_exact(current.der()) {
                // A self-signed intermediate that is not a known root ends
                // the path without an anchor.
                flags.set(VerifyFlags::NOT_TRUSTED);
            }
            break;
        }

        let issuer = ctx
            .roots
            .iter()
            .chain(ctx.intermediates.iter())
            .find(|ca| current.verify_issued_by(ca))
            .cloned();

        match issuer {
            None => {
                flags.set(VerifyFlags::NOT_TRUSTED);
                break;
            }
            Some(ca) => {
                authority_check(&ca, &current, ctx, profile, &mut flags);
                let anchored = ctx.roots.contains_exact(ca.der());
                if anchored {
                    profile_check(&ca, profile, &mut flags);
                    time_check(&ca, now, &mut flags);
                    mark_trusted_if_member(&ca, ctx, &mut trusted_seen);
                    break;
                }
                current = ca;
                depth += 1;
            }
        }
    }

    ChainOutcome {
        flags,
        trusted_seen,
    }
}
