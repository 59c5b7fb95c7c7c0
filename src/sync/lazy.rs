//! On-demand resolution of a single requested revision.

use anyhow::{Context, Result};
use log::{debug, info};
use std::path::Path;

use super::{PolicyDenied, Reconciler, materialize};
use crate::git::GitBackend;
use crate::package::Package;
use crate::source::PackageSource;
use crate::store::MetadataStore;

/// Strip one leading `v` and one trailing `^0` from a revision string.
///
/// `v1.2.3^0` becomes `1.2.3`; anything else passes through mostly
/// unchanged, since callers may hand in arbitrary revisions.
pub fn recover_version(revision: &str) -> &str {
    let version = revision.strip_prefix('v').unwrap_or(revision);
    version.strip_suffix("^0").unwrap_or(version)
}

impl<S, G, M> Reconciler<S, G, M>
where
    S: PackageSource,
    G: GitBackend,
    M: MetadataStore,
{
    /// Sync the version named by `revision` if it is not already known.
    ///
    /// Revisions that are not versions, and versions that fail to download
    /// or build, are ignored without error. A version blocked by policy, or
    /// one that was pushed but could not be recorded in the store, is an error.
    #[tracing::instrument(skip(self, known))]
    pub async fn resolve_on_demand(
        &self,
        repo_dir: &Path,
        package: &Package,
        revision: &str,
        known: &[String],
    ) -> Result<()> {
        let requested = recover_version(revision);
        if known.iter().any(|v| v == requested) {
            debug!("{} is already known for {}", requested, package);
            return Ok(());
        }

        let pkg = match self.source().parse_versioned_package(&package.name, requested) {
            Ok(pkg) => pkg,
            Err(e) => {
                debug!("Revision {:?} is not a version of {}: {:#}", revision, package, e);
                return Ok(());
            }
        };
        if known.contains(&pkg.version) {
            return Ok(());
        }

        let allowed = self
            .store()
            .is_version_allowed(package, &pkg.version)
            .await
            .with_context(|| format!("Failed to check whether {} is allowed", pkg))?;
        if !allowed {
            return Err(PolicyDenied {
                package: package.to_string(),
                version: pkg.version.clone(),
            }
            .into());
        }

        if let Err(e) = materialize(self.source(), self.git(), self.options(), repo_dir, &pkg).await {
            info!("Could not resolve {} on demand: {:#}", pkg, e);
            return Ok(());
        }

        self.store()
            .insert_versions(std::slice::from_ref(&pkg))
            .await
            .with_context(|| format!("Failed to record {} after pushing it", pkg))?;

        let mut versions = known.to_vec();
        versions.push(pkg.version.clone());
        self.reconcile(repo_dir, package, &versions).await?;
        Ok(())
    }
}
