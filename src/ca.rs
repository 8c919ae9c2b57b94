//! self-signed certificate authority used to terminate intercepted tls.
//!
//! the identity is minted once at startup. clients pin it through the spki
//! fingerprint instead of installing it as a trusted root.

use crate::util::{Result, StasisError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_RSA_SHA256,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

pub const CA_COMMON_NAME: &str = "stasis testing ca";
const CA_ORGANIZATION: &str = "stasis";
const RSA_BITS: usize = 2048;

#[derive(Clone)]
pub struct CaIdentity {
    pub private_key_pem: String,
    pub certificate_pem: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl std::fmt::Debug for CaIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaIdentity")
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// generates a fresh rsa key and a self-signed ca certificate for it.
/// validity starts a day in the past to absorb clock skew and lasts a year.
pub fn generate_ca_certificate() -> Result<CaIdentity> {
    let mut rng = rand::thread_rng();
    let rsa_key = RsaPrivateKey::new(&mut rng, RSA_BITS)?;
    let private_key_pem = rsa_key.to_pkcs8_pem(LineEnding::LF)?.to_string();

    let key_pair = KeyPair::from_pem_and_sign_algo(&private_key_pem, &PKCS_RSA_SHA256)?;

    let now = OffsetDateTime::now_utc();
    let not_before = now - Duration::hours(24);
    let not_after = now + Duration::days(365);

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, CA_COMMON_NAME);
    distinguished_name.push(DnType::OrganizationName, CA_ORGANIZATION);

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::CrlSign,
    ];
    params.not_before = not_before;
    params.not_after = not_after;

    let certificate = params.self_signed(&key_pair)?;

    Ok(CaIdentity {
        private_key_pem,
        certificate_pem: certificate.pem(),
        not_before,
        not_after,
    })
}

/// base64 sha-256 of the certificate's subject public key info
pub fn spki_fingerprint(certificate_pem: &str) -> Result<String> {
    let der = rustls_pemfile::certs(&mut certificate_pem.as_bytes())?
        .into_iter()
        .next()
        .ok_or_else(|| StasisError::Certificate("no certificate in pem".to_string()))?;

    let (_, certificate) = x509_parser::parse_x509_certificate(&der)?;

    Ok(STANDARD.encode(Sha256::digest(certificate.public_key().raw)))
}
