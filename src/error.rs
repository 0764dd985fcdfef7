use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Directory ({0}) doesn't exist. Run 'devcert setup' first.")]
    DirectoryMissing(PathBuf),

    #[error("{name} missing. {hint}")]
    ArtifactMissing { name: String, hint: &'static str },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Signing failed: {0}")]
    SigningFailure(String),

    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {name}: {reason}")]
    Parse { name: String, reason: String },

    #[error("Trust store operation failed: {0}")]
    TrustStore(String),

    #[error("Command failed: {command}\n{stderr}")]
    Command { command: String, stderr: String },
}

impl Error {
    pub(crate) fn missing(name: &str) -> Self {
        Self::ArtifactMissing {
            name: name.to_owned(),
            hint: "It has not been generated yet.",
        }
    }

    pub(crate) fn missing_config() -> Self {
        Self::ArtifactMissing {
            name: crate::store::artifacts::CSR_CONFIG.to_owned(),
            hint: "Run 'devcert generate-config' first.",
        }
    }

    pub(crate) fn parse(name: &str, reason: impl ToString) -> Self {
        Self::Parse {
            name: name.to_owned(),
            reason: reason.to_string(),
        }
    }
}

impl From<rcgen::Error> for Error {
    fn from(value: rcgen::Error) -> Self {
        Self::SigningFailure(value.to_string())
    }
}

impl From<rsa::Error> for Error {
    fn from(value: rsa::Error) -> Self {
        Self::SigningFailure(format!("RSA key operation failed: {value}"))
    }
}

impl From<pkcs8::Error> for Error {
    fn from(value: pkcs8::Error) -> Self {
        Self::SigningFailure(format!("PKCS#8 encoding failed: {value}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
