//! Certification request construction
//!
//! Builds a signed X.509 CertificationRequest for submission to a CA. The
//! extension set is fixed by the application profile: end-entity key
//! usages, serverAuth or clientAuth, cA = false, and a SAN carrying the
//! ApplicationUri plus the host DNS names.

use crate::error::{Result, StackError};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, Ia5String, IsCa,
    KeyPair, KeyUsagePurpose, SanType, SignatureAlgorithm,
};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;

/// Maximum DER size of a serialised CSR
pub const CSR_MAX_DER_SIZE: usize = 4096;

/// Inputs for CSR construction
#[derive(Debug, Clone)]
pub struct CsrParams {
    /// Subject DN as comma-separated `attr=value` pairs, e.g.
    /// `"CN=device,O=Plant,C=FR"`
    pub subject: String,
    /// Digest name, matched case-insensitively against
    /// {sha1, sha224, sha256, sha384, sha512}
    pub hash_name: String,
    /// serverAuth when true, clientAuth otherwise
    pub is_server: bool,
    /// ApplicationUri placed in the SAN
    pub application_uri: String,
    /// One or more dNSName SAN entries
    pub dns_names: Vec<String>,
}

fn signature_algorithm_for(hash_name: &str) -> Result<&'static SignatureAlgorithm> {
    match hash_name.to_ascii_lowercase().as_str() {
        "sha256" => Ok(&rcgen::PKCS_RSA_SHA256),
        "sha384" => Ok(&rcgen::PKCS_RSA_SHA384),
        "sha512" => Ok(&rcgen::PKCS_RSA_SHA512),
        // Known names without an ecosystem RSA scheme are refused rather
        // than silently substituted.
        "sha1" | "sha224" => Err(StackError::UnsupportedAlgorithm(format!(
            "no RSA signature scheme for {hash_name}"
        ))),
        other => Err(StackError::InvalidArgument(format!(
            "unknown hash name: {other}"
        ))),
    }
}

fn parse_subject(subject: &str) -> Result<DistinguishedName> {
    let mut dn = DistinguishedName::new();
    let mut seen = 0;
    for part in subject.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (attr, value) = part.split_once('=').ok_or_else(|| {
            StackError::InvalidArgument(format!("subject attribute without '=': {part}"))
        })?;
        let value = value.trim();
        let dn_type = match attr.trim().to_ascii_uppercase().as_str() {
            "CN" => DnType::CommonName,
            "O" => DnType::OrganizationName,
            "OU" => DnType::OrganizationalUnitName,
            "C" => DnType::CountryName,
            "ST" => DnType::StateOrProvinceName,
            "L" => DnType::LocalityName,
            other => {
                return Err(StackError::InvalidArgument(format!(
                    "unsupported subject attribute: {other}"
                )))
            }
        };
        dn.push(dn_type, value);
        seen += 1;
    }
    if seen == 0 {
        return Err(StackError::InvalidArgument("empty subject DN".into()));
    }
    Ok(dn)
}

/// Build and sign a CSR, returning its DER
///
/// The output is capped at [`CSR_MAX_DER_SIZE`] bytes; an oversized
/// request is an explicit error, never a truncation.
pub fn build_csr(key: &RsaPrivateKey, params: &CsrParams) -> Result<Vec<u8>> {
    if params.application_uri.len() < 3 {
        return Err(StackError::InvalidArgument(
            "application URI must be at least 3 characters".into(),
        ));
    }
    if params.dns_names.is_empty() {
        return Err(StackError::InvalidArgument(
            "at least one DNS name is required".into(),
        ));
    }
    let alg = signature_algorithm_for(&params.hash_name)?;
    let pkcs8 = key.to_pkcs8_der()?;
    let key_pair = KeyPair::from_pkcs8_der_and_sign_algo(&pkcs8.as_bytes().into(), alg)?;

    let mut cert_params = CertificateParams::default();
    cert_params.distinguished_name = parse_subject(&params.subject)?;
    cert_params.is_ca = IsCa::ExplicitNoCa;
    cert_params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::ContentCommitment,
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::DataEncipherment,
    ];
    cert_params.extended_key_usages = vec![if params.is_server {
        ExtendedKeyUsagePurpose::ServerAuth
    } else {
        ExtendedKeyUsagePurpose::ClientAuth
    }];
    cert_params.subject_alt_names.push(SanType::URI(
        Ia5String::try_from(params.application_uri.as_str())
            .map_err(|_| StackError::InvalidArgument("application URI is not IA5".into()))?,
    ));
    for dns in &params.dns_names {
        cert_params.subject_alt_names.push(SanType::DnsName(
            Ia5String::try_from(dns.as_str())
                .map_err(|_| StackError::InvalidArgument(format!("DNS name is not IA5: {dns}")))?,
        ));
    }

    let csr = cert_params.serialize_request(&key_pair)?;
    let der = csr.der().as_ref().to_vec();
    if der.len() > CSR_MAX_DER_SIZE {
        return Err(StackError::BufferTooSmall {
            needed: der.len(),
            available: CSR_MAX_DER_SIZE,
        });
    }
    Ok(der)
}
