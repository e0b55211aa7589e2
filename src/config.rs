use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::keyring;

// ---------------------------------------------------------------------------
// Housekeeping policies
// ---------------------------------------------------------------------------

/// Delete messages older than `days` from `folder`. Disabled unless both
/// fields are present, like the original plist pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default)]
    pub days: i64,
    #[serde(default)]
    pub folder: String,
}

impl RetentionPolicy {
    pub fn enabled(&self) -> bool {
        self.days > 0 && !self.folder.is_empty()
    }
}

/// Copy messages older than `days` out of `from_folders` into
/// `to_account`/`to_folder`, verify, then delete the source copies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchivePolicy {
    /// Comma-delimited source folder list, in archive order.
    #[serde(default)]
    pub from_folders: String,
    #[serde(default)]
    pub to_account: String,
    #[serde(default)]
    pub to_folder: String,
    #[serde(default)]
    pub days: i64,
}

impl ArchivePolicy {
    /// Source folders split on commas, trimmed, empties dropped.
    pub fn source_folders(&self) -> Vec<String> {
        self.from_folders
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn enabled(&self) -> bool {
        self.days > 0
            && !self.source_folders().is_empty()
            && !self.to_account.is_empty()
            && !self.to_folder.is_empty()
    }
}

// ---------------------------------------------------------------------------
// On-disk per-account config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend")]
pub enum PasswordBackend {
    #[serde(rename = "keyring")]
    Keyring,
    #[serde(rename = "plaintext")]
    Plaintext { value: String },
}

impl Default for PasswordBackend {
    fn default() -> Self {
        PasswordBackend::Plaintext {
            value: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAccountConfig {
    pub name: String,
    #[serde(default)]
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: PasswordBackend,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default)]
    pub archive: ArchivePolicy,
}

fn default_port() -> u16 {
    993
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub accounts: Vec<FileAccountConfig>,
}

/// Errors loading the config file. All of them degrade to "no accounts" at
/// the orchestrator level; nothing here is fatal to process startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Runtime account config (resolved password, ready to use)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub name: String,
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub retention: RetentionPolicy,
    pub archive: ArchivePolicy,
}

impl AccountConfig {
    /// Connection security is derived from the port: 143 means plaintext,
    /// everything else gets TLS.
    pub fn use_tls(&self) -> bool {
        self.port != 143
    }

    /// Build a runtime account from its on-disk record, resolving the
    /// password. A keyring miss degrades to an empty password with a warning;
    /// the login failure downstream is loud enough.
    pub fn from_file_account(fac: &FileAccountConfig) -> Self {
        let password = match &fac.password {
            PasswordBackend::Plaintext { value } => value.clone(),
            PasswordBackend::Keyring => {
                keyring::get_password(&fac.username, &fac.server).unwrap_or_else(|e| {
                    log::warn!(
                        "{}: password not available from keyring ({e}), using empty password",
                        fac.name
                    );
                    String::new()
                })
            }
        };
        if fac.server.is_empty() {
            log::warn!("{}: no server configured", fac.name);
        }
        if fac.username.is_empty() {
            log::warn!("{}: no username configured", fac.name);
        }
        AccountConfig {
            name: fac.name.clone(),
            server: fac.server.clone(),
            port: fac.port,
            username: fac.username.clone(),
            password,
            retention: fac.retention.clone(),
            archive: fac.archive.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// File paths + resolution
// ---------------------------------------------------------------------------

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailsweep")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load and resolve every account from the config file.
///
/// An unreadable or unparsable file logs an error and yields zero accounts;
/// the run then simply has nothing to do.
pub fn resolve_accounts(path: &Path) -> Vec<AccountConfig> {
    let file = match FileConfig::load(path) {
        Ok(file) => file,
        Err(e) => {
            log::error!("unable to load config from {}: {e}", path.display());
            return Vec::new();
        }
    };
    file.accounts
        .iter()
        .map(AccountConfig::from_file_account)
        .collect()
}
