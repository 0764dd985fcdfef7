//! The working directory: named artifacts and nothing else.
//!
//! Every component reads and writes through [`ArtifactStore`], so the whole
//! pipeline runs unchanged against [`MemoryStore`] in tests.

use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::error::{Error, Result};

/// File names of everything the pipeline produces.
pub mod artifacts {
    pub const CSR_CONFIG: &str = "server.csr.cnf";
    pub const V3_EXT: &str = "v3.ext";
    pub const CA_KEY: &str = "rootCA.key";
    pub const CA_CERT: &str = "rootCA.pem";
    pub const CA_SERIAL: &str = "rootCA.srl";
    pub const SERVER_KEY: &str = "server.key";
    pub const SERVER_CSR: &str = "server.csr";
    pub const SERVER_CERT: &str = "server.crt";
    pub const SERVER_BUNDLE: &str = "server.pem";
}

pub trait ArtifactStore {
    /// Where the artifacts live, for messages and for collaborators that need a real path.
    fn root(&self) -> &Path;

    /// Whether the working directory exists.
    fn is_ready(&self) -> bool;

    fn exists(&self, name: &str) -> bool;

    fn read(&self, name: &str) -> Result<String>;

    /// Replace `name` with `content`. Readers never observe a partial write.
    fn write(&self, name: &str, content: &str) -> Result<()>;

    /// Like [`write`](Self::write), restricted to the current user.
    fn write_secret(&self, name: &str, content: &str) -> Result<()> {
        self.write(name, content)
    }

    fn delete(&self, name: &str) -> Result<()>;
}

/// Artifacts stored as files in a directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory if needed. This is the `setup` step.
    pub fn setup(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| Error::WriteFile {
            path: self.root.clone(),
            source: e,
        })
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        let suffix: u64 = rand::random();
        self.root.join(format!(".{name}.tmp-{suffix:x}"))
    }

    fn commit(&self, temp_path: &Path, name: &str) -> Result<()> {
        let path = self.path_of(name);
        fs::rename(temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(temp_path);
            Error::WriteFile { path, source: e }
        })
    }
}

#[cfg(unix)]
fn owner_only(options: &mut fs::OpenOptions) {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(0o600);
}

#[cfg(not(unix))]
fn owner_only(_options: &mut fs::OpenOptions) {}

fn write_file(path: &Path, contents: &[u8], secret: bool) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    if secret {
        owner_only(&mut options);
    }

    let io_err = |e| Error::WriteFile {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = options.open(path).map_err(io_err)?;
    file.write_all(contents).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    Ok(())
}

impl ArtifactStore for FsStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn is_ready(&self) -> bool {
        self.root.is_dir()
    }

    fn exists(&self, name: &str) -> bool {
        self.path_of(name).exists()
    }

    fn read(&self, name: &str) -> Result<String> {
        let path = self.path_of(name);
        fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::missing(name),
            _ => Error::ReadFile { path, source: e },
        })
    }

    fn write(&self, name: &str, content: &str) -> Result<()> {
        let temp_path = self.temp_path(name);
        write_file(&temp_path, content.as_bytes(), false)?;
        self.commit(&temp_path, name)
    }

    fn write_secret(&self, name: &str, content: &str) -> Result<()> {
        let temp_path = self.temp_path(name);
        write_file(&temp_path, content.as_bytes(), true)?;
        self.commit(&temp_path, name)
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_of(name);
        fs::remove_file(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::missing(name),
            _ => Error::Remove { path, source: e },
        })
    }
}

/// In-memory artifacts, for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ArtifactStore for MemoryStore {
    fn root(&self) -> &Path {
        Path::new(":memory:")
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn exists(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    fn read(&self, name: &str) -> Result<String> {
        self.lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::missing(name))
    }

    fn write(&self, name: &str, content: &str) -> Result<()> {
        self.lock().insert(name.to_owned(), content.to_owned());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::missing(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        assert!(store.is_ready());
        assert!(!store.exists("a.txt"));
        store.write("a.txt", "first").unwrap();
        store.write("a.txt", "second").unwrap();
        assert_eq!(store.read("a.txt").unwrap(), "second");

        store.delete("a.txt").unwrap();
        assert!(!store.exists("a.txt"));
    }

    #[test]
    fn test_fs_store_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.write("a.txt", "content").unwrap();
        store.write_secret("b.key", "secret").unwrap();

        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.key"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_fs_store_secret_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.write_secret("server.key", "secret").unwrap();

        let mode = fs::metadata(store.path_of("server.key"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_missing_artifacts_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let fs_store = FsStore::new(dir.path());
        let memory = MemoryStore::new();

        let stores: [&dyn ArtifactStore; 2] = [&fs_store, &memory];
        for store in stores {
            assert!(matches!(
                store.read("server.crt"),
                Err(Error::ArtifactMissing { .. })
            ));
            assert!(matches!(
                store.delete("server.csr"),
                Err(Error::ArtifactMissing { .. })
            ));
        }
    }

    #[test]
    fn test_setup_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path().join("ssl"));
        assert!(!store.is_ready());
        store.setup().unwrap();
        assert!(store.is_ready());
        // Idempotent
        store.setup().unwrap();
    }
}
