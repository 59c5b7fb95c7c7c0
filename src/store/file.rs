use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::MetadataStore;
use crate::package::{Package, Scheme, VersionedPackage};

/// On-disk layout of the store.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
struct StoreFile {
    #[serde(default)]
    packages: Vec<PackageRecord>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct PackageRecord {
    scheme: Scheme,
    name: String,
    #[serde(default)]
    versions: Vec<String>,
    /// Block every version of this package.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    blocked: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    blocked_versions: Vec<String>,
}

impl PackageRecord {
    fn new(package: &Package) -> Self {
        Self {
            scheme: package.scheme,
            name: package.name.clone(),
            versions: Vec::new(),
            blocked: false,
            blocked_versions: Vec::new(),
        }
    }

    fn is(&self, package: &Package) -> bool {
        self.scheme == package.scheme && self.name == package.name
    }
}

impl StoreFile {
    fn find(&self, package: &Package) -> Option<&PackageRecord> {
        self.packages.iter().find(|r| r.is(package))
    }

    fn find_or_insert(&mut self, package: &Package) -> &mut PackageRecord {
        let index = match self.packages.iter().position(|r| r.is(package)) {
            Some(index) => index,
            None => {
                self.packages.push(PackageRecord::new(package));
                self.packages.len() - 1
            }
        };
        &mut self.packages[index]
    }
}

/// Metadata store kept in a single JSON file.
///
/// Writes go to a temporary file that is renamed over the original, and a
/// lock serializes read-modify-write cycles within one process.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block a single version, or the whole package when `version` is `None`.
    pub async fn block(&self, package: &Package, version: Option<&str>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        let record = file.find_or_insert(package);
        match version {
            Some(v) if !record.blocked_versions.iter().any(|b| b == v) => {
                record.blocked_versions.push(v.to_string())
            }
            Some(_) => {}
            None => record.blocked = true,
        }
        self.save(&file).await
    }

    #[tracing::instrument(skip(self))]
    async fn load(&self) -> Result<StoreFile> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Store {:?} does not exist yet, starting empty", self.path);
                return Ok(StoreFile::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read store {:?}", self.path));
            }
        };
        serde_json::from_str(&content).with_context(|| format!("Failed to parse store {:?}", self.path))
    }

    #[tracing::instrument(skip(self, file))]
    async fn save(&self, file: &StoreFile) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(file)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("Failed to save store to {:?}", self.path))
    }
}

#[async_trait]
impl MetadataStore for JsonFileStore {
    async fn list_versions(&self, package: &Package) -> Result<Vec<String>> {
        let file = self.load().await?;
        Ok(file
            .find(package)
            .map(|r| r.versions.clone())
            .unwrap_or_default())
    }

    async fn insert_versions(&self, versions: &[VersionedPackage]) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;

        let mut added = 0;
        for pkg in versions {
            let record = file.find_or_insert(&pkg.package);
            if !record.versions.contains(&pkg.version) {
                record.versions.push(pkg.version.clone());
                added += 1;
            }
        }

        if added > 0 {
            self.save(&file).await?;
        }
        Ok(added)
    }

    async fn is_version_allowed(&self, package: &Package, version: &str) -> Result<bool> {
        let file = self.load().await?;
        Ok(match file.find(package) {
            Some(record) => !record.blocked && !record.blocked_versions.iter().any(|b| b == version),
            None => true,
        })
    }
}
