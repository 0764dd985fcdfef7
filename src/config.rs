use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::{bail, ensure, Context};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::cert_sign_request::{MAX_VALIDITY_DAYS, MIN_KEY_BITS};

/// Tool settings, read from `config.toml`. Every field is optional in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub ca: CaSettings,
    pub leaf: LeafSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CaSettings {
    pub validity_days: i64,
    pub key_bits: usize,
}

impl Default for CaSettings {
    fn default() -> Self {
        Self {
            validity_days: 1024,
            key_bits: 2048,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LeafSettings {
    pub validity_days: i64,
    pub key_bits: usize,
}

impl Default for LeafSettings {
    fn default() -> Self {
        Self {
            validity_days: 500,
            key_bits: 2048,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (what, days, bits) in [
            ("ca", self.ca.validity_days, self.ca.key_bits),
            ("leaf", self.leaf.validity_days, self.leaf.key_bits),
        ] {
            ensure!(days > 0, "{what}.validity_days must be positive, got {days}");
            ensure!(
                days <= MAX_VALIDITY_DAYS,
                "{what}.validity_days must be at most {MAX_VALIDITY_DAYS}, got {days}"
            );
            ensure!(
                bits >= MIN_KEY_BITS,
                "{what}.key_bits must be at least {MIN_KEY_BITS}, got {bits}"
            );
        }
        Ok(())
    }
}

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "devcert", "devcert")
}

pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Settings from `user_config_path` if given (it must exist), else from the
/// platform config dir if a file is there, else the built-in defaults.
pub fn read_settings(user_config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let settings = match user_config_path {
        Some(path) => {
            if !path.exists() {
                bail!("can't find file {path:?}");
            }
            parse_settings_file(path)?
        }
        None => match default_config_path() {
            Some(path) if path.exists() => parse_settings_file(&path)?,
            _ => Settings::default(),
        },
    };
    settings.validate()?;
    Ok(settings)
}

fn parse_settings_file(path: &Path) -> anyhow::Result<Settings> {
    let mut str = String::new();
    File::open(path)
        .with_context(|| format!("can't open {path:?}"))?
        .read_to_string(&mut str)
        .with_context(|| format!("Can't read {path:?}"))?;
    toml::from_str::<Settings>(&str).with_context(|| format!("Can't parse file {path:?}"))
}
