//! Package sources: where package archives come from.
//!
//! A [`PackageSource`] knows one ecosystem's naming rules and how to fetch a
//! single version's source archive into a local directory.

mod registry;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::archive::{ArchiveFormat, ExtractOptions};
use crate::http::PermanentError;
use crate::package::{Package, Scheme, VersionedPackage};

pub use registry::RegistrySource;

/// An archive fetched by a source, ready to extract.
#[derive(Debug, Clone)]
pub struct DownloadedArchive {
    pub path: PathBuf,
    pub format: ArchiveFormat,
    /// Extraction policy for this source's archives.
    pub options: ExtractOptions,
}

/// Errors a source reports to callers that need to tell them apart.
#[derive(Debug)]
pub enum SourceError {
    /// The registry has no such package version.
    NotFound(String),
    /// The package belongs to a different ecosystem than this source.
    SchemeMismatch { expected: Scheme, found: Scheme },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::NotFound(pkg) => write!(f, "package not found: {}", pkg),
            SourceError::SchemeMismatch { expected, found } => {
                write!(f, "expected a {} package, got {}", expected, found)
            }
        }
    }
}

impl std::error::Error for SourceError {}

/// Whether `err` reports a package version missing from its registry.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    let source = |e: Option<&SourceError>| matches!(e, Some(SourceError::NotFound(_)));
    let http = |e: Option<&PermanentError>| matches!(e, Some(PermanentError::NotFound { .. }));

    source(err.downcast_ref()) || http(err.downcast_ref()) || err.chain().any(|cause| {
        source(cause.downcast_ref()) || http(cause.downcast_ref())
    })
}

/// Trait for package sources (npm, Go module proxy, crates.io, etc.).
///
/// Parsing defaults to the ecosystem rules in [`Scheme`]; implementors only
/// need to say which scheme they serve and how to download.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Get the ecosystem this source serves.
    fn scheme(&self) -> Scheme;

    /// Parse a package name and version into a validated package.
    fn parse_versioned_package(&self, name: &str, version: &str) -> Result<VersionedPackage> {
        self.scheme().parse_versioned(name, version)
    }

    /// Parse a `<scheme>:<package>` configuration string.
    fn parse_config_string(&self, s: &str) -> Result<VersionedPackage> {
        let pkg = Scheme::parse_config_string(s)?;
        check_scheme(self.scheme(), pkg.scheme())?;
        Ok(pkg)
    }

    /// Parse a synthetic repository name back into its package.
    fn parse_repo_name(&self, repo_name: &str) -> Result<Package> {
        let pkg = Scheme::parse_repo_name(repo_name)?;
        check_scheme(self.scheme(), pkg.scheme)?;
        Ok(pkg)
    }

    /// Download the source archive for `package` into `dest_dir`.
    ///
    /// A version the registry does not have is reported as
    /// [`SourceError::NotFound`].
    async fn download(&self, dest_dir: &Path, package: &VersionedPackage)
    -> Result<DownloadedArchive>;
}

fn check_scheme(expected: Scheme, found: Scheme) -> Result<()> {
    if expected != found {
        return Err(SourceError::SchemeMismatch { expected, found }.into());
    }
    Ok(())
}
