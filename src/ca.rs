//! The root CA: `rootCA.key` (encrypted) and `rootCA.pem`.
//!
//! Both are created at most once per working directory. A developer may have
//! already trusted `rootCA.pem`, so existing files are never replaced.

use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, IsCa, Issuer, KeyPair, KeyUsagePurpose, SerialNumber,
};
use rsa::{rand_core::OsRng, RsaPrivateKey};
use tracing::{debug, info};

use crate::{
    cert_sign_request::{dn::ConfigStore, generate_rsa_key, key_pair_from_rsa, validity_window},
    config::CaSettings,
    error::{Error, Result},
    secret::{read_passphrase, SecretHandle},
    store::{
        artifacts::{CA_CERT, CA_KEY, CA_SERIAL},
        ArtifactStore,
    },
};

const SERIAL_BYTES: usize = 16;

/// The persisted CA artifacts, as PEM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaKeyPair {
    /// PKCS#8 `ENCRYPTED PRIVATE KEY`.
    pub key_pem: String,
    pub cert_pem: String,
}

pub struct CaManager<'a> {
    store: &'a dyn ArtifactStore,
    settings: &'a CaSettings,
}

impl<'a> CaManager<'a> {
    pub fn new(store: &'a dyn ArtifactStore, settings: &'a CaSettings) -> Self {
        Self { store, settings }
    }

    pub fn exists(&self) -> bool {
        self.store.exists(CA_KEY) && self.store.exists(CA_CERT)
    }

    /// Create whichever of the CA key and certificate is missing.
    pub fn ensure(&self, secret: &SecretHandle) -> Result<CaKeyPair> {
        let configs = ConfigStore::new(self.store);
        if !configs.exists() {
            return Err(Error::missing_config());
        }

        if self.store.exists(CA_KEY) {
            debug!("{CA_KEY} already exists, keeping it");
        } else {
            info!("*** generating {CA_KEY}");
            let passphrase = read_passphrase(secret.path())?;
            let key = generate_rsa_key(self.settings.key_bits)?;
            let encrypted =
                key.to_pkcs8_encrypted_pem(&mut OsRng, passphrase.as_bytes(), LineEnding::LF)?;
            self.store.write_secret(CA_KEY, &encrypted)?;
        }

        if self.store.exists(CA_CERT) {
            debug!("{CA_CERT} already exists, keeping it");
        } else {
            info!("*** generating {CA_CERT}");
            let key_pair = self.signing_key(secret)?;

            let mut params = CertificateParams::default();
            params.distinguished_name = configs.distinguished_name()?;
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages = vec![
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
                KeyUsagePurpose::DigitalSignature,
            ];
            let (not_before, not_after) = validity_window(self.settings.validity_days)?;
            params.not_before = not_before;
            params.not_after = not_after;

            let cert = params.self_signed(&key_pair)?;
            self.store.write(CA_CERT, &cert.pem())?;
        }

        Ok(CaKeyPair {
            key_pem: self.store.read(CA_KEY)?,
            cert_pem: self.store.read(CA_CERT)?,
        })
    }

    /// Decrypt `rootCA.key` with the passphrase behind `secret`.
    pub fn signing_key(&self, secret: &SecretHandle) -> Result<KeyPair> {
        let encrypted = self.store.read(CA_KEY)?;
        let passphrase = read_passphrase(secret.path())?;
        let key = RsaPrivateKey::from_pkcs8_encrypted_pem(&encrypted, passphrase.as_bytes())
            .map_err(|e| {
                Error::SigningFailure(format!(
                    "can't decrypt {CA_KEY} ({e}); it was sealed with a secret from another run. \
                     Remove {CA_KEY} and {CA_CERT} to start a new CA"
                ))
            })?;
        key_pair_from_rsa(&key)
    }

    /// Signer for leaf certificates.
    pub fn issuer(&self, secret: &SecretHandle) -> Result<Issuer<'static, KeyPair>> {
        let key_pair = self.signing_key(secret)?;
        let cert_pem = self.store.read(CA_CERT)?;
        Ok(Issuer::from_ca_cert_pem(&cert_pem, key_pair)?)
    }

    /// Take the next serial from `rootCA.srl`, creating it on first use.
    pub fn next_serial(&self) -> Result<SerialNumber> {
        let serial = if self.store.exists(CA_SERIAL) {
            let text = self.store.read(CA_SERIAL)?;
            let mut bytes = hex::decode(text.trim()).map_err(|e| Error::parse(CA_SERIAL, e))?;
            if bytes.is_empty() {
                return Err(Error::parse(CA_SERIAL, "empty serial"));
            }
            increment(&mut bytes);
            bytes
        } else {
            let mut bytes = vec![0u8; SERIAL_BYTES];
            rand::rng().fill_bytes(&mut bytes);
            // Keep the DER integer positive and non-zero.
            bytes[0] = (bytes[0] & 0x7f) | 0x01;
            bytes
        };

        self.store
            .write(CA_SERIAL, &format!("{}\n", hex::encode_upper(&serial)))?;
        Ok(SerialNumber::from_slice(&serial))
    }
}

fn increment(bytes: &mut Vec<u8>) {
    for byte in bytes.iter_mut().rev() {
        if *byte == 0xff {
            *byte = 0;
        } else {
            *byte += 1;
            return;
        }
    }
    bytes.insert(0, 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cert_sign_request::dn::DistinguishedNameConfig, secret::EphemeralSecret,
        store::MemoryStore, x509,
    };

    fn configured_store() -> MemoryStore {
        let store = MemoryStore::new();
        ConfigStore::new(&store)
            .persist(&DistinguishedNameConfig::default())
            .unwrap();
        store
    }

    #[test]
    fn test_ensure_requires_config() {
        let store = MemoryStore::new();
        let settings = CaSettings::default();
        let secret = EphemeralSecret::acquire().unwrap();

        let result = CaManager::new(&store, &settings).ensure(&secret);
        assert!(matches!(result, Err(Error::ArtifactMissing { .. })));
        assert!(!store.exists(CA_KEY));
    }

    #[test]
    fn test_ensure_creates_encrypted_key_and_ca_cert() {
        let store = configured_store();
        let settings = CaSettings::default();
        let secret = EphemeralSecret::acquire().unwrap();

        let ca = CaManager::new(&store, &settings).ensure(&secret).unwrap();
        assert!(ca.key_pem.contains("BEGIN ENCRYPTED PRIVATE KEY"));
        assert!(!ca.key_pem.contains("BEGIN PRIVATE KEY"));

        let info = x509::describe(&ca.cert_pem).unwrap();
        assert!(info.is_ca);
        assert_eq!(info.common_name.as_deref(), Some("localhost.ssl"));
        assert!(info.days_valid >= 1023);
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let store = configured_store();
        let settings = CaSettings::default();
        let secret = EphemeralSecret::acquire().unwrap();
        let manager = CaManager::new(&store, &settings);

        let first = manager.ensure(&secret).unwrap();
        let second = manager.ensure(&secret).unwrap();
        assert_eq!(first, second);

        // A later run holds a different secret and must still leave the CA alone.
        let other = EphemeralSecret::acquire().unwrap();
        assert_eq!(manager.ensure(&other).unwrap(), first);
    }

    #[test]
    fn test_ensure_fills_in_missing_cert_only() {
        let store = configured_store();
        let settings = CaSettings::default();
        let secret = EphemeralSecret::acquire().unwrap();
        let manager = CaManager::new(&store, &settings);

        let first = manager.ensure(&secret).unwrap();
        store.delete(CA_CERT).unwrap();

        let second = manager.ensure(&secret).unwrap();
        assert_eq!(first.key_pem, second.key_pem);
        assert_ne!(first.cert_pem, second.cert_pem);
    }

    #[test]
    fn test_wrong_secret_is_a_signing_failure() {
        let store = configured_store();
        let settings = CaSettings::default();
        let secret = EphemeralSecret::acquire().unwrap();
        let manager = CaManager::new(&store, &settings);
        manager.ensure(&secret).unwrap();

        let other = EphemeralSecret::acquire().unwrap();
        assert!(manager.signing_key(&secret).is_ok());
        assert!(matches!(
            manager.signing_key(&other),
            Err(Error::SigningFailure(_))
        ));
    }

    #[test]
    fn test_serial_file_increments() {
        let store = MemoryStore::new();
        let settings = CaSettings::default();
        let manager = CaManager::new(&store, &settings);

        store.write(CA_SERIAL, "01FF\n").unwrap();
        manager.next_serial().unwrap();
        assert_eq!(store.read(CA_SERIAL).unwrap(), "0200\n");

        store.write(CA_SERIAL, "FFFF\n").unwrap();
        manager.next_serial().unwrap();
        assert_eq!(store.read(CA_SERIAL).unwrap(), "010000\n");
    }

    #[test]
    fn test_serial_file_created_on_first_use() {
        let store = MemoryStore::new();
        let settings = CaSettings::default();
        let manager = CaManager::new(&store, &settings);

        manager.next_serial().unwrap();
        let serial = store.read(CA_SERIAL).unwrap();
        assert_eq!(serial.trim().len(), SERIAL_BYTES * 2);
        assert!(serial.trim().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_corrupt_serial_file() {
        let store = MemoryStore::new();
        let settings = CaSettings::default();
        store.write(CA_SERIAL, "not hex\n").unwrap();
        assert!(matches!(
            CaManager::new(&store, &settings).next_serial(),
            Err(Error::Parse { .. })
        ));
    }
}
