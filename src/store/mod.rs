//! Package metadata: which versions are known and which are allowed.

mod file;

use anyhow::Result;
use async_trait::async_trait;

use crate::package::{Package, VersionedPackage};

pub use file::JsonFileStore;

/// Trait for the package metadata store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Versions recorded for `package`, in no particular order.
    async fn list_versions(&self, package: &Package) -> Result<Vec<String>>;

    /// Record versions, ignoring ones already present.
    /// Returns how many were newly added.
    async fn insert_versions(&self, versions: &[VersionedPackage]) -> Result<usize>;

    /// Whether policy allows syncing `version` of `package`.
    async fn is_version_allowed(&self, package: &Package, version: &str) -> Result<bool>;
}
