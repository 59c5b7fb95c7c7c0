//! Reconciling a synthetic repository's tags with a package's desired versions.
//!
//! Each desired version becomes one tag (`v<version>`) pointing at a single
//! deterministic commit of that version's published sources, and the
//! `latest` branch follows the highest version present.

mod builder;
mod errors;
mod lazy;

use anyhow::Result;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::git::{COMMIT_STAMP_V1, CommitStamp, GitBackend};
use crate::package::{Package, VersionedPackage};
use crate::source::{PackageSource, is_not_found};
use crate::store::MetadataStore;

pub use builder::materialize;
pub use errors::{MultiError, PolicyDenied};
pub use lazy::recover_version;

/// Branch that tracks the highest present version.
pub const LATEST_BRANCH: &str = "latest";

/// Settings a [`Reconciler`] is constructed with.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Configuration strings (`<scheme>:<versioned syntax>`) naming versions
    /// that are always desired.
    pub configured_versions: Vec<String>,
    /// Address recorded on every synthetic commit.
    pub contact_email: String,
    pub commit_stamp: CommitStamp,
    /// Resolve unknown revisions on demand in [`Reconciler::fetch`].
    pub on_demand: bool,
    /// Parent directory for scratch directories; the system temp dir if unset.
    pub scratch_root: Option<PathBuf>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            configured_versions: Vec::new(),
            contact_email: "pkgsync@localhost".to_string(),
            commit_stamp: COMMIT_STAMP_V1,
            on_demand: true,
            scratch_root: None,
        }
    }
}

/// Keeps synthetic package repositories in sync with their desired versions.
pub struct Reconciler<S, G, M> {
    source: S,
    git: G,
    store: M,
    options: SyncOptions,
}

impl<S, G, M> Reconciler<S, G, M>
where
    S: PackageSource,
    G: GitBackend,
    M: MetadataStore,
{
    pub fn new(source: S, git: G, store: M, options: SyncOptions) -> Self {
        Self {
            source,
            git,
            store,
            options,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn git(&self) -> &G {
        &self.git
    }

    pub fn store(&self) -> &M {
        &self.store
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Bring the repository at `repo_dir` up to date for `repo_name`.
    ///
    /// With a `revision` (and on-demand resolution enabled) only that
    /// revision is resolved; otherwise every desired version is reconciled.
    #[tracing::instrument(skip(self))]
    pub async fn fetch(&self, repo_dir: &Path, repo_name: &str, revision: Option<&str>) -> Result<()> {
        let package = self.source.parse_repo_name(repo_name)?;
        let versions = self.desired_versions(&package).await?;

        match revision {
            Some(revision) if self.options.on_demand => {
                self.resolve_on_demand(repo_dir, &package, revision, &versions)
                    .await
            }
            _ => Ok(self.reconcile(repo_dir, &package, &versions).await?),
        }
    }

    /// Versions configured statically for `package` plus those recorded in the store.
    #[tracing::instrument(skip(self))]
    pub async fn desired_versions(&self, package: &Package) -> Result<Vec<String>> {
        let mut versions = Vec::new();

        for config in &self.options.configured_versions {
            match self.source.parse_config_string(config) {
                Ok(pkg) if pkg.package == *package => versions.push(pkg.version),
                Ok(_) => {}
                // Configuration may name packages from other ecosystems.
                Err(e) => debug!("Ignoring configured version {:?}: {:#}", config, e),
            }
        }

        for version in self.store.list_versions(package).await? {
            if !versions.contains(&version) {
                versions.push(version);
            }
        }

        debug!("Desired versions for {}: {:?}", package, versions);
        Ok(versions)
    }

    /// Make the tags in `repo_dir` match `desired` exactly.
    ///
    /// Versions that fail to parse or materialize are collected into the
    /// returned [`MultiError`] without stopping the others. Stale tags are
    /// only deleted when every missing version materialized.
    #[tracing::instrument(skip(self, desired))]
    pub async fn reconcile(
        &self,
        repo_dir: &Path,
        package: &Package,
        desired: &[String],
    ) -> Result<(), MultiError> {
        let mut errors = MultiError::new();

        let mut candidates: Vec<VersionedPackage> = Vec::new();
        for version in desired {
            match self.source.parse_versioned_package(&package.name, version) {
                Ok(pkg) => {
                    if !candidates.iter().any(|c| c.tag_name() == pkg.tag_name()) {
                        candidates.push(pkg);
                    }
                }
                Err(e) => errors.push(e.context(format!("invalid version {:?} for {}", version, package))),
            }
        }
        candidates.sort_by(|a, b| b.cmp_version(a));

        let existing: HashSet<String> = match self.git.list_tags(repo_dir).await {
            Ok(tags) => tags.into_iter().collect(),
            Err(e) => {
                errors.push(e.context(format!("failed to list tags in {:?}", repo_dir)));
                return Err(errors);
            }
        };

        let mut present: Vec<&VersionedPackage> = Vec::new();
        let mut materialize_failed = false;
        for candidate in &candidates {
            if existing.contains(&candidate.tag_name()) {
                present.push(candidate);
                continue;
            }

            info!("Materializing {} into {:?}", candidate, repo_dir);
            match materialize(
                &self.source,
                &self.git,
                &self.options,
                repo_dir,
                candidate,
            )
            .await
            {
                Ok(()) => present.push(candidate),
                Err(e) => {
                    if is_not_found(&e) {
                        warn!("Skipping {}: {:#}", candidate, e);
                    } else {
                        error!("Failed to materialize {}: {:#}", candidate, e);
                    }
                    materialize_failed = true;
                    errors.push(e.context(format!("error pushing package {}", candidate)));
                }
            }
        }

        match present.first() {
            Some(latest) => {
                if let Err(e) = self
                    .git
                    .force_branch(repo_dir, LATEST_BRANCH, &latest.tag_name())
                    .await
                {
                    errors.push(e.context(format!("failed to move {} to {}", LATEST_BRANCH, latest)));
                }
            }
            None => {
                if let Err(e) = self.git.delete_branch(repo_dir, LATEST_BRANCH).await {
                    debug!("Could not delete {} branch: {:#}", LATEST_BRANCH, e);
                }
            }
        }

        if materialize_failed {
            warn!("Not pruning stale tags in {:?} after failures", repo_dir);
        } else {
            let wanted: HashSet<String> = candidates.iter().map(|c| c.tag_name()).collect();
            let mut stale: Vec<&String> = existing.difference(&wanted).collect();
            stale.sort();
            for tag in stale {
                info!("Deleting stale tag {} from {:?}", tag, repo_dir);
                if let Err(e) = self.git.delete_tag(repo_dir, tag).await {
                    error!("Failed to delete tag {} from {:?}: {:#}", tag, repo_dir, e);
                }
            }
        }

        errors.into_result()
    }
}
