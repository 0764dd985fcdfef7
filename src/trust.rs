//! Install `rootCA.pem` into the macOS System keychain.

use std::path::Path;

use tracing::info;

use crate::{
    error::{Error, Result},
    store::{artifacts::CA_CERT, ArtifactStore},
};

#[cfg(any(target_os = "macos", test))]
const SYSTEM_KEYCHAIN: &str = "/Library/Keychains/System.keychain";

/// Arguments handed to `sudo`. The certificate path is a single argv entry.
#[cfg(any(target_os = "macos", test))]
fn keychain_command(cert_path: &Path) -> Vec<String> {
    [
        "-p",
        "sudo password:",
        "security",
        "add-trusted-cert",
        "-d",
        "-r",
        "trustRoot",
        "-k",
        SYSTEM_KEYCHAIN,
    ]
    .into_iter()
    .map(String::from)
    .chain(std::iter::once(cert_path.display().to_string()))
    .collect()
}

pub fn add_ca_to_keychain(store: &dyn ArtifactStore) -> Result<()> {
    if !store.exists(CA_CERT) {
        return Err(Error::ArtifactMissing {
            name: CA_CERT.to_owned(),
            hint: "Run 'devcert generate-certificates' first.",
        });
    }
    let cert_path = store.root().join(CA_CERT);
    info!("Adding {CA_CERT} to system keychain");
    install(&cert_path)
}

#[cfg(target_os = "macos")]
fn install(cert_path: &Path) -> Result<()> {
    use std::process::Command;

    let output = Command::new("sudo")
        .args(keychain_command(cert_path))
        .output()
        .map_err(|e| Error::Command {
            command: "sudo security add-trusted-cert".into(),
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(Error::TrustStore(format!(
            "security add-trusted-cert failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn install(cert_path: &Path) -> Result<()> {
    Err(Error::TrustStore(format!(
        "the keychain is only available on macOS; add {} to your trust store manually",
        cert_path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_requires_root_certificate() {
        let store = MemoryStore::new();
        let err = add_ca_to_keychain(&store).unwrap_err();
        assert!(matches!(err, Error::ArtifactMissing { .. }));
        assert!(err.to_string().contains(CA_CERT));
    }

    #[test]
    fn test_command_keeps_path_as_one_argument() {
        let args = keychain_command(Path::new("/tmp/my certs/rootCA.pem"));
        assert_eq!(args[0], "-p");
        assert_eq!(args[2], "security");
        assert_eq!(args[8], SYSTEM_KEYCHAIN);
        assert_eq!(args.last().unwrap(), "/tmp/my certs/rootCA.pem");
        assert_eq!(args.len(), 10);
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_other_platforms_name_the_certificate() {
        let store = MemoryStore::new();
        store.write(CA_CERT, "pem").unwrap();
        let err = add_ca_to_keychain(&store).unwrap_err();
        assert!(matches!(err, Error::TrustStore(_)));
        assert!(err.to_string().contains(CA_CERT));
    }
}
