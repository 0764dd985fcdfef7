//! Throwaway passphrase protecting `rootCA.key`.
//!
//! The value lives only in a private temp file for the duration of one
//! issuance. Code that needs it is handed the file's path and reads it back
//! with [`read_passphrase`].

use std::{io::Write, path::Path};

use rand::RngCore;
use tempfile::NamedTempFile;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Random bytes behind each passphrase, before hex encoding.
pub const SECRET_BYTES: usize = 64;

pub struct EphemeralSecret;

impl EphemeralSecret {
    /// Generate a passphrase and park it in an owner-only temp file.
    pub fn acquire() -> Result<SecretHandle> {
        let mut bytes = Zeroizing::new([0u8; SECRET_BYTES]);
        rand::rng().fill_bytes(&mut bytes[..]);
        let encoded = Zeroizing::new(hex::encode(&bytes[..]));

        let write_err = |e| Error::WriteFile {
            path: std::env::temp_dir(),
            source: e,
        };
        let mut file = tempfile::Builder::new()
            .prefix("devcert-secret-")
            .tempfile()
            .map_err(write_err)?;
        file.write_all(encoded.as_bytes()).map_err(write_err)?;
        file.flush().map_err(write_err)?;

        debug!("acquired ephemeral secret at {}", file.path().display());
        Ok(SecretHandle { file: Some(file) })
    }
}

/// Exclusive owner of the passphrase file. The file is removed by
/// [`release`](Self::release) or, failing that, on drop.
pub struct SecretHandle {
    file: Option<NamedTempFile>,
}

impl SecretHandle {
    pub fn path(&self) -> &Path {
        match &self.file {
            Some(file) => file.path(),
            None => Path::new(""),
        }
    }

    /// Delete the passphrase file, reporting failures.
    pub fn release(mut self) -> Result<()> {
        match self.file.take() {
            Some(file) => {
                let path = file.path().to_path_buf();
                file.close().map_err(|e| Error::Remove { path, source: e })?;
                debug!("released ephemeral secret");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for SecretHandle {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            // NamedTempFile removes itself; errors here have nowhere to go.
            let _ = file.close();
            debug!("released ephemeral secret on drop");
        }
    }
}

impl std::fmt::Debug for SecretHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretHandle")
            .field("path", &self.path())
            .finish()
    }
}

/// Read a passphrase back from the location a [`SecretHandle`] points at.
pub fn read_passphrase(path: &Path) -> Result<Zeroizing<String>> {
    std::fs::read_to_string(path)
        .map(Zeroizing::new)
        .map_err(|e| Error::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_secret_is_long_hex() {
        let handle = EphemeralSecret::acquire().unwrap();
        let passphrase = read_passphrase(handle.path()).unwrap();

        assert_eq!(passphrase.len(), SECRET_BYTES * 2);
        assert!(passphrase.chars().all(|c| c.is_ascii_hexdigit()));
        handle.release().unwrap();
    }

    #[test]
    fn test_secrets_differ() {
        let a = EphemeralSecret::acquire().unwrap();
        let b = EphemeralSecret::acquire().unwrap();
        assert_ne!(
            *read_passphrase(a.path()).unwrap(),
            *read_passphrase(b.path()).unwrap()
        );
    }

    #[test]
    fn test_release_deletes_file() {
        let handle = EphemeralSecret::acquire().unwrap();
        let path = handle.path().to_path_buf();
        assert!(path.exists());

        handle.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_deletes_file_on_error_path() {
        let mut seen = PathBuf::new();
        let result = (|| -> Result<()> {
            let handle = EphemeralSecret::acquire()?;
            seen = handle.path().to_path_buf();
            Err(Error::SigningFailure("boom".into()))
        })();

        assert!(result.is_err());
        assert!(!seen.as_os_str().is_empty());
        assert!(!seen.exists());
    }

    #[test]
    fn test_drop_deletes_file() {
        let handle = EphemeralSecret::acquire().unwrap();
        let path = handle.path().to_path_buf();
        drop(handle);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let handle = EphemeralSecret::acquire().unwrap();
        let mode = std::fs::metadata(handle.path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let handle = EphemeralSecret::acquire().unwrap();
        let passphrase = read_passphrase(handle.path()).unwrap();
        assert!(!format!("{handle:?}").contains(passphrase.as_str()));
    }
}
