//! A local development certificate authority.
//!
//! One working directory holds one root CA and one leaf certificate for a
//! local domain. The pipeline is: a distinguished-name template
//! (`server.csr.cnf`), a SAN extension file (`v3.ext`), the CA
//! (`rootCA.key` + `rootCA.pem`), and finally `server.key` + `server.crt`.

pub mod ca;
pub mod cert_sign_request;
pub mod cnf;
pub mod config;
pub mod error;
pub mod issuer;
pub mod secret;
pub mod store;
pub mod trust;
pub mod x509;

pub use ca::{CaKeyPair, CaManager};
pub use cert_sign_request::{
    dn::{ConfigStore, DistinguishedNameConfig, DnOverrides},
    san::{SanExtensionBuilder, SanExtensionSpec},
};
pub use config::{read_settings, Settings};
pub use error::{Error, Result};
pub use issuer::{CertificateIssuer, LeafCertificate};
pub use secret::{EphemeralSecret, SecretHandle};
pub use store::{ArtifactStore, FsStore, MemoryStore};
pub use trust::add_ca_to_keychain;
pub use x509::{describe, display_certificate, CertificateInfo};
