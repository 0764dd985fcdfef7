//! Leaf certificate issuance: the whole pipeline from template to `server.crt`.

use rcgen::{CertificateSigningRequestParams, Issuer, KeyPair};
use tracing::info;

use crate::{
    ca::CaManager,
    cert_sign_request::{
        create_csr,
        dn::{ConfigStore, DnOverrides},
        san::SanExtensionBuilder,
        validity_window,
    },
    config::Settings,
    error::{Error, Result},
    secret::{EphemeralSecret, SecretHandle},
    store::{
        artifacts::{SERVER_BUNDLE, SERVER_CERT, SERVER_CSR, SERVER_KEY},
        ArtifactStore,
    },
};

/// The issued leaf, as written to `server.crt` and `server.key`.
#[derive(Debug, Clone)]
pub struct LeafCertificate {
    pub cert_pem: String,
    pub key_pem: String,
    /// Whether `server.pem` was written as well.
    pub bundle_written: bool,
}

pub struct CertificateIssuer<'a> {
    store: &'a dyn ArtifactStore,
    settings: &'a Settings,
}

impl<'a> CertificateIssuer<'a> {
    pub fn new(store: &'a dyn ArtifactStore, settings: &'a Settings) -> Self {
        Self { store, settings }
    }

    /// Acquire a secret, issue, and release the secret on every path.
    pub fn run(&self, emit_pem_bundle: bool) -> Result<LeafCertificate> {
        let secret = EphemeralSecret::acquire()?;
        let leaf = self.issue(&secret, emit_pem_bundle)?;
        secret.release()?;
        Ok(leaf)
    }

    pub fn issue(&self, secret: &SecretHandle, emit_pem_bundle: bool) -> Result<LeafCertificate> {
        if !self.store.is_ready() {
            return Err(Error::DirectoryMissing(self.store.root().to_path_buf()));
        }

        let configs = ConfigStore::new(self.store);
        if !configs.exists() {
            let config = configs.resolve(&DnOverrides::default())?;
            configs.persist(&config)?;
        }

        let ca = CaManager::new(self.store, &self.settings.ca);
        ca.ensure(secret)?;
        if !ca.exists() {
            return Err(Error::Configuration(
                "CA generation reported success but rootCA.key/rootCA.pem are missing".into(),
            ));
        }
        // Unlock the CA before anything else can fail.
        let issuer = ca.issuer(secret)?;

        info!("*** generating {SERVER_KEY}");
        let request = create_csr(&configs, self.settings.leaf.key_bits)?;
        self.store.write(SERVER_CSR, &request.csr_pem)?;

        // The CSR must not outlive signing, whether or not signing worked.
        let signed = self.sign(&ca, &issuer, &request.csr_pem);
        self.store.delete(SERVER_CSR)?;
        let cert_pem = signed?;

        // The new key only replaces the old one together with its certificate.
        self.store.write_secret(SERVER_KEY, &request.key_pem)?;
        self.store.write(SERVER_CERT, &cert_pem)?;

        let bundle_written = if emit_pem_bundle {
            info!("*** writing {SERVER_BUNDLE}");
            let mut bundle = cert_pem.clone();
            if !bundle.ends_with('\n') {
                bundle.push('\n');
            }
            bundle.push_str(&request.key_pem);
            self.store.write_secret(SERVER_BUNDLE, &bundle)?;
            true
        } else {
            false
        };

        Ok(LeafCertificate {
            cert_pem,
            key_pem: request.key_pem,
            bundle_written,
        })
    }

    fn sign(
        &self,
        ca: &CaManager<'_>,
        issuer: &Issuer<'_, KeyPair>,
        csr_pem: &str,
    ) -> Result<String> {
        let extensions = SanExtensionBuilder::new(self.store).ensure()?;

        info!("*** generating {SERVER_CERT}");
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)?;
        extensions.apply(&mut csr.params)?;

        let (not_before, not_after) = validity_window(self.settings.leaf.validity_days)?;
        csr.params.not_before = not_before;
        csr.params.not_after = not_after;
        csr.params.serial_number = Some(ca.next_serial()?);

        Ok(csr.signed_by(issuer)?.pem())
    }
}
