//! On-disk configuration, turned into the explicit options a
//! [`Reconciler`](crate::sync::Reconciler) is built with.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::git::{COMMIT_STAMP_V1, Signature, placeholder_signature};
use crate::package::Scheme;
use crate::sync::SyncOptions;

/// Default per-file extraction limit: 15 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 15 * 1024 * 1024;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Always-desired versions as `<scheme>:<versioned syntax>`.
    pub versions: Vec<String>,
    /// Registry base URLs overriding each scheme's public registry.
    pub registries: BTreeMap<Scheme, String>,
    pub contact_email: String,
    /// Archive entries larger than this are skipped; `null` disables the limit.
    pub max_file_size: Option<u64>,
    pub command_timeout_secs: u64,
    pub on_demand: bool,
    pub scratch_root: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let options = SyncOptions::default();
        Self {
            versions: Vec::new(),
            registries: BTreeMap::new(),
            contact_email: options.contact_email,
            max_file_size: Some(DEFAULT_MAX_FILE_SIZE),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            on_demand: options.on_demand,
            scratch_root: None,
        }
    }
}

impl SyncConfig {
    /// Read the config at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse config {:?}", path))
    }

    /// `$XDG_CONFIG_HOME/pkgsync/config.json` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pkgsync").join("config.json"))
    }

    /// Where the metadata store lives unless overridden.
    pub fn default_store_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("pkgsync").join("store.json"))
    }

    /// The configured registry for `scheme`, or its public default.
    pub fn registry_url(&self, scheme: Scheme) -> &str {
        self.registries
            .get(&scheme)
            .map(String::as_str)
            .unwrap_or_else(|| scheme.default_registry_url())
    }

    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            configured_versions: self.versions.clone(),
            contact_email: self.contact_email.clone(),
            on_demand: self.on_demand,
            scratch_root: self.scratch_root.clone(),
            ..Default::default()
        }
    }

    /// Identity for git commands that do not create content.
    pub fn placeholder_signature(&self) -> Signature {
        placeholder_signature(&self.contact_email, COMMIT_STAMP_V1)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = SyncConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.max_file_size, Some(DEFAULT_MAX_FILE_SIZE));
        assert!(config.on_demand);
    }

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "versions": ["npm:react@18.2.0", "python:requests==2.31.0"],
                "registries": {"npm": "http://localhost:4873"},
                "on_demand": false
            }"#,
        )
        .unwrap();

        let config = SyncConfig::load(&path).unwrap();

        assert_eq!(config.versions.len(), 2);
        assert_eq!(config.registry_url(Scheme::Npm), "http://localhost:4873");
        assert_eq!(config.registry_url(Scheme::Go), Scheme::Go.default_registry_url());
        assert_eq!(config.command_timeout(), Duration::from_secs(600));
        assert!(!config.on_demand);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = SyncConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_options_carry_explicit_settings() {
        let config = SyncConfig {
            versions: vec!["npm:left-pad@1.3.0".to_string()],
            contact_email: "ops@example.com".to_string(),
            on_demand: false,
            scratch_root: Some(PathBuf::from("/var/tmp/pkgsync")),
            ..Default::default()
        };

        let options = config.options();

        assert_eq!(options.configured_versions, config.versions);
        assert_eq!(options.contact_email, "ops@example.com");
        assert!(!options.on_demand);
        assert_eq!(options.scratch_root, config.scratch_root);
        assert_eq!(options.commit_stamp, COMMIT_STAMP_V1);
    }

    #[test]
    fn test_placeholder_signature_uses_contact_email() {
        let config = SyncConfig {
            contact_email: "ops@example.com".to_string(),
            ..Default::default()
        };
        let signature = config.placeholder_signature();
        assert_eq!(signature.email, "ops@example.com");
        assert_eq!(signature.date, COMMIT_STAMP_V1.date);
    }
}
