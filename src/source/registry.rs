//! Package source backed by a public registry's download endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::fs::File;
use std::path::Path;

use super::{DownloadedArchive, PackageSource, SourceError};
use crate::archive::{ArchiveFormat, ExtractOptions};
use crate::http::{HttpClient, PermanentError};
use crate::package::{Scheme, VersionedPackage};

/// Downloads source archives from a registry over HTTP.
pub struct RegistrySource {
    scheme: Scheme,
    base_url: String,
    http_client: HttpClient,
    max_file_size: Option<u64>,
}

impl RegistrySource {
    /// Create a source for the scheme's public registry.
    pub fn new(scheme: Scheme, http_client: HttpClient) -> Self {
        Self::with_base_url(scheme, http_client, scheme.default_registry_url())
    }

    /// Create a source for a mirror or private registry.
    pub fn with_base_url(scheme: Scheme, http_client: HttpClient, base_url: &str) -> Self {
        Self {
            scheme,
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            max_file_size: None,
        }
    }

    /// Skip archive entries larger than `max_size` bytes during extraction.
    pub fn with_max_file_size(mut self, max_size: Option<u64>) -> Self {
        self.max_file_size = max_size;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the source archive for `pkg`.
    pub fn archive_url(&self, pkg: &VersionedPackage) -> String {
        let base = &self.base_url;
        let name = pkg.name();
        let version = &pkg.version;
        match pkg.scheme() {
            Scheme::Npm => {
                let basename = name.rsplit('/').next().unwrap_or(name);
                format!("{}/{}/-/{}-{}.tgz", base, name, basename, version)
            }
            Scheme::Go => format!(
                "{}/{}/@v/{}.zip",
                base,
                escape_module_path(name),
                escape_module_path(version)
            ),
            Scheme::Crates => format!("{}/api/v1/crates/{}/{}/download", base, name, version),
            Scheme::Python => {
                let initial = name.chars().next().unwrap_or('_');
                format!(
                    "{}/packages/source/{}/{}/{}-{}.tar.gz",
                    base, initial, name, name, version
                )
            }
            Scheme::Maven => {
                let (group, artifact) = name.split_once(':').unwrap_or(("", name));
                format!(
                    "{}/{}/{}/{}/{}-{}-sources.jar",
                    base,
                    group.replace('.', "/"),
                    artifact,
                    version,
                    artifact,
                    version
                )
            }
        }
    }

    /// Local file name, archive format and leading directories to strip.
    fn archive_layout(&self, pkg: &VersionedPackage) -> (&'static str, ArchiveFormat, usize) {
        match pkg.scheme() {
            // npm tarballs nest everything under `package/`.
            Scheme::Npm => ("package.tgz", ArchiveFormat::TarGz, 1),
            // Module zips nest everything under `<module path>@<version>/`.
            Scheme::Go => ("module.zip", ArchiveFormat::Zip, pkg.name().split('/').count()),
            Scheme::Crates => ("package.crate", ArchiveFormat::TarGz, 1),
            Scheme::Python => ("sdist.tar.gz", ArchiveFormat::TarGz, 1),
            Scheme::Maven => ("sources.jar", ArchiveFormat::Zip, 0),
        }
    }

    fn extract_options(&self, strip_components: usize) -> ExtractOptions {
        let options = ExtractOptions {
            skip_invalid: true,
            skip_duplicates: true,
            strip_components,
            filter: None,
        };
        match self.max_file_size {
            Some(max) => options.with_max_file_size(max),
            None => options,
        }
    }
}

/// Escape a module path or version for the Go module proxy protocol:
/// each uppercase letter becomes `!` followed by its lowercase form.
fn escape_module_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii_uppercase() {
            escaped.push('!');
            escaped.push(c.to_ascii_lowercase());
        } else {
            escaped.push(c);
        }
    }
    escaped
}

#[async_trait]
impl PackageSource for RegistrySource {
    fn scheme(&self) -> Scheme {
        self.scheme
    }

    async fn download(&self, dest_dir: &Path, pkg: &VersionedPackage) -> Result<DownloadedArchive> {
        let url = self.archive_url(pkg);
        let (file_name, format, strip_components) = self.archive_layout(pkg);
        let path = dest_dir.join(file_name);

        info!("Downloading {} from {}", pkg, url);
        let result = self
            .http_client
            .download_file(&url, || {
                File::create(&path).with_context(|| format!("Failed to create {:?}", path))
            })
            .await;

        match result {
            Ok(bytes) => {
                debug!("Downloaded {} bytes to {:?}", bytes, path);
                Ok(DownloadedArchive {
                    path,
                    format,
                    options: self.extract_options(strip_components),
                })
            }
            Err(e) if matches!(
                e.downcast_ref::<PermanentError>(),
                Some(PermanentError::NotFound { .. })
            ) =>
            {
                Err(e.context(SourceError::NotFound(pkg.versioned_syntax())))
            }
            Err(e) => Err(e.context(format!("Failed to download {}", pkg))),
        }
    }
}
