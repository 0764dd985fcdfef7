use pkcs8::{EncodePrivateKey, LineEnding};
use rcgen::{CertificateParams, KeyPair, PKCS_RSA_SHA256};
use rsa::{rand_core::OsRng, RsaPrivateKey};
use time::{Duration, OffsetDateTime};

use self::dn::ConfigStore;
use crate::error::{Error, Result};

pub mod dn;
pub mod san;

/// Smallest RSA modulus accepted for any key.
pub const MIN_KEY_BITS: usize = 2048;

/// Longest validity accepted for any certificate (about a hundred years).
pub const MAX_VALIDITY_DAYS: i64 = 36_500;

/// A fresh leaf key and the request for it, both PEM.
pub struct LeafRequest {
    pub key_pem: String,
    pub csr_pem: String,
}

/// New RSA key plus a SHA-256 CSR whose subject is the persisted template.
pub fn create_csr(configs: &ConfigStore<'_>, key_bits: usize) -> Result<LeafRequest> {
    let subject = configs.distinguished_name()?;
    let key_pair = key_pair_from_rsa(&generate_rsa_key(key_bits)?)?;

    let mut csr = CertificateParams::default();
    csr.distinguished_name = subject;
    let request = csr.serialize_request(&key_pair)?;

    Ok(LeafRequest {
        key_pem: key_pair.serialize_pem(),
        csr_pem: request.pem()?,
    })
}

pub(crate) fn generate_rsa_key(bits: usize) -> Result<RsaPrivateKey> {
    if bits < MIN_KEY_BITS {
        return Err(Error::Configuration(format!(
            "RSA keys must be at least {MIN_KEY_BITS} bits, got {bits}"
        )));
    }
    Ok(RsaPrivateKey::new(&mut OsRng, bits)?)
}

/// `not_before` and `not_after` for a certificate valid `days` from now.
pub(crate) fn validity_window(days: i64) -> Result<(OffsetDateTime, OffsetDateTime)> {
    if !(1..=MAX_VALIDITY_DAYS).contains(&days) {
        return Err(Error::Configuration(format!(
            "validity must be between 1 and {MAX_VALIDITY_DAYS} days, got {days}"
        )));
    }
    let now = OffsetDateTime::now_utc();
    let not_after = now
        .checked_add(Duration::days(days))
        .ok_or_else(|| Error::Configuration(format!("{days} days from now is out of range")))?;
    Ok((now, not_after))
}

/// Hand an RSA key to rcgen for SHA-256 signing.
pub(crate) fn key_pair_from_rsa(key: &RsaPrivateKey) -> Result<KeyPair> {
    let pem = key.to_pkcs8_pem(LineEnding::LF)?;
    Ok(KeyPair::from_pem_and_sign_algo(&pem, &PKCS_RSA_SHA256)?)
}
