//! Shared fixtures: a small RSA PKI minted with rcgen
//!
//! Root CA → intermediate CA → leaf, each with its own RSA-2048 key,
//! plus empty (or selectively populated) CRLs per CA. Key generation is
//! the slow part, so tests reuse one fixture per scenario.

#![allow(dead_code)]

use opcua_stack::cert::{CertificateList, CrlList};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateRevocationListParams,
    DistinguishedName, DnType, ExtendedKeyUsagePurpose, Ia5String, IsCa, KeyIdMethod, KeyPair,
    KeyUsagePurpose, RevokedCertParams, SanType, SerialNumber,
};
use rsa::pkcs8::EncodePrivateKey;
use time::{Duration, OffsetDateTime};

/// An issued certificate plus its signing key
pub struct TestCert {
    pub cert: Certificate,
    pub key: KeyPair,
    pub der: Vec<u8>,
}

/// Minimal big-endian bytes of a serial, high bit kept clear in tests
fn serial_bytes(n: u64) -> Vec<u8> {
    let bytes: Vec<u8> = n
        .to_be_bytes()
        .iter()
        .copied()
        .skip_while(|&b| b == 0)
        .collect();
    if bytes.is_empty() {
        vec![1]
    } else {
        bytes
    }
}

pub fn rsa_keypair() -> KeyPair {
    let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
    let der = key.to_pkcs8_der().unwrap();
    KeyPair::from_pkcs8_der_and_sign_algo(&der.as_bytes().into(), &rcgen::PKCS_RSA_SHA256).unwrap()
}

fn dn(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn.push(DnType::OrganizationName, "Stack Test PKI");
    dn
}

pub fn make_root(cn: &str) -> TestCert {
    let key = rsa_keypair();
    let mut params = CertificateParams::default();
    params.distinguished_name = dn(cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let cert = params.self_signed(&key).unwrap();
    let der = cert.der().as_ref().to_vec();
    TestCert { cert, key, der }
}

pub fn make_intermediate(cn: &str, issuer: &TestCert) -> TestCert {
    let key = rsa_keypair();
    let mut params = CertificateParams::default();
    params.distinguished_name = dn(cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let cert = params
        .signed_by(&key, &issuer.cert, &issuer.key)
        .unwrap();
    let der = cert.der().as_ref().to_vec();
    TestCert { cert, key, der }
}

pub struct LeafOptions {
    pub cn: String,
    pub uri: String,
    pub dns: String,
    pub serial: u64,
    pub expired: bool,
}

impl Default for LeafOptions {
    fn default() -> Self {
        Self {
            cn: "device".into(),
            uri: "urn:test:device".into(),
            dns: "device.test.example".into(),
            serial: 0,
            expired: false,
        }
    }
}

pub fn make_leaf(options: &LeafOptions, issuer: &TestCert) -> TestCert {
    let key = rsa_keypair();
    let mut params = CertificateParams::default();
    params.distinguished_name = dn(&options.cn);
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::ContentCommitment,
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::DataEncipherment,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params.subject_alt_names = vec![
        SanType::URI(Ia5String::try_from(options.uri.as_str()).unwrap()),
        SanType::DnsName(Ia5String::try_from(options.dns.as_str()).unwrap()),
    ];
    if options.serial != 0 {
        params.serial_number = Some(SerialNumber::from(serial_bytes(options.serial)));
    }
    if options.expired {
        params.not_before = OffsetDateTime::now_utc() - Duration::days(30);
        params.not_after = OffsetDateTime::now_utc() - Duration::days(1);
    }
    let cert = params
        .signed_by(&key, &issuer.cert, &issuer.key)
        .unwrap();
    let der = cert.der().as_ref().to_vec();
    TestCert { cert, key, der }
}

/// A CRL signed by `issuer`, revoking the given serials
pub fn make_crl(issuer: &TestCert, revoked_serials: &[u64]) -> Vec<u8> {
    let params = CertificateRevocationListParams {
        this_update: OffsetDateTime::now_utc() - Duration::hours(1),
        next_update: OffsetDateTime::now_utc() + Duration::days(30),
        crl_number: SerialNumber::from(vec![1u8]),
        issuing_distribution_point: None,
        revoked_certs: revoked_serials
            .iter()
            .map(|serial| RevokedCertParams {
                serial_number: SerialNumber::from(serial_bytes(*serial)),
                revocation_time: OffsetDateTime::now_utc() - Duration::hours(2),
                reason_code: None,
                invalidity_date: None,
            })
            .collect(),
        key_identifier_method: KeyIdMethod::Sha256,
    };
    params
        .signed_by(&issuer.cert, &issuer.key)
        .unwrap()
        .der()
        .as_ref()
        .to_vec()
}

pub fn cert_list(ders: &[&[u8]]) -> CertificateList {
    let mut list = CertificateList::new();
    for der in ders {
        list.push_der(der).unwrap();
    }
    list
}

pub fn crl_list(ders: &[&[u8]]) -> CrlList {
    let mut list = CrlList::new();
    for der in ders {
        list.push_der(der).unwrap();
    }
    list
}
