//! Security-hardened archive extraction.
//!
//! Entries from untrusted zip, tar and gzip-compressed tar archives pass
//! through the same [`Unpacker`], which applies the caller's filter, rejects
//! unsafe paths and links, and creates files without ever overwriting an
//! existing path.

pub mod sanitize;
mod tar;
mod zip;

use anyhow::{Context, Result, anyhow};
use log::debug;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use self::tar::{extract_tar, extract_tar_gz};
pub use self::zip::extract_zip;
pub use sanitize::UnsafePath;

/// Callback deciding whether an entry should be extracted at all.
pub type EntryFilter = Arc<dyn Fn(&Path, &EntryInfo) -> bool + Send + Sync>;

/// Kind of an archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink(PathBuf),
    HardLink(PathBuf),
}

/// What a filter gets to see about an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub kind: EntryKind,
    pub size: u64,
}

/// Options controlling extraction policy.
#[derive(Clone, Default)]
pub struct ExtractOptions {
    /// Skip entries with unsafe paths or links instead of failing.
    pub skip_invalid: bool,
    /// Skip entries whose destination already exists instead of failing.
    pub skip_duplicates: bool,
    /// Number of leading path segments to drop from every entry.
    pub strip_components: usize,
    /// Entries for which this returns false are silently skipped.
    pub filter: Option<EntryFilter>,
}

impl fmt::Debug for ExtractOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractOptions")
            .field("skip_invalid", &self.skip_invalid)
            .field("skip_duplicates", &self.skip_duplicates)
            .field("strip_components", &self.strip_components)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

impl ExtractOptions {
    /// Skip every regular file larger than `max_size` bytes.
    pub fn with_max_file_size(mut self, max_size: u64) -> Self {
        self.filter = Some(Arc::new(move |path: &Path, info: &EntryInfo| {
            if info.kind == EntryKind::File && info.size > max_size {
                debug!(
                    "Skipping {:?}: {} bytes exceeds limit of {} bytes",
                    path, info.size, max_size
                );
                return false;
            }
            true
        }));
        self
    }
}

/// Supported container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    /// Gzip-compressed tar; a stream without the gzip magic is read as plain tar.
    TarGz,
}

impl ArchiveFormat {
    /// Guess the format from a file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") || name.ends_with(".jar") || name.ends_with(".whl") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".crate")
        {
            Some(ArchiveFormat::TarGz)
        } else if name.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else {
            None
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFormat::Zip => write!(f, "zip"),
            ArchiveFormat::Tar => write!(f, "tar"),
            ArchiveFormat::TarGz => write!(f, "tar.gz"),
        }
    }
}

impl std::str::FromStr for ArchiveFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zip" | "jar" => Ok(ArchiveFormat::Zip),
            "tar" => Ok(ArchiveFormat::Tar),
            "tar.gz" | "tgz" | "targz" => Ok(ArchiveFormat::TarGz),
            _ => anyhow::bail!("Unknown archive format: {}. Expected zip, tar, or tar.gz.", s),
        }
    }
}

/// Extract the archive file at `archive_path` into `dest`.
#[tracing::instrument(skip(opts))]
pub fn extract_file(
    archive_path: &Path,
    format: ArchiveFormat,
    dest: &Path,
    opts: &ExtractOptions,
) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;
    match format {
        ArchiveFormat::Zip => {
            let len = file
                .metadata()
                .with_context(|| format!("Failed to stat archive {:?}", archive_path))?
                .len();
            extract_zip(file, len, dest, opts)
        }
        ArchiveFormat::Tar => extract_tar(file, dest, opts),
        ArchiveFormat::TarGz => extract_tar_gz(file, dest, opts),
    }
}

/// Writes sanitized entries below a destination directory.
pub(crate) struct Unpacker<'a> {
    dest: PathBuf,
    opts: &'a ExtractOptions,
}

impl<'a> Unpacker<'a> {
    pub(crate) fn new(dest: &Path, opts: &'a ExtractOptions) -> Result<Self> {
        fs::create_dir_all(dest)
            .with_context(|| format!("Failed to create destination {:?}", dest))?;
        let dest = std::path::absolute(dest)
            .with_context(|| format!("Failed to resolve destination {:?}", dest))?;
        Ok(Self {
            dest: sanitize::normalize_path(&dest),
            opts,
        })
    }

    /// Unpack one entry. `contents` is only read for regular files.
    pub(crate) fn unpack(
        &self,
        raw_path: &Path,
        info: &EntryInfo,
        contents: &mut dyn Read,
    ) -> Result<()> {
        let relative = match self.relative_path(raw_path) {
            Ok(Some(relative)) => relative,
            Ok(None) => {
                debug!("Skipping {:?}: consumed by strip_components", raw_path);
                return Ok(());
            }
            Err(unsafe_path) => return self.reject(unsafe_path),
        };

        if let Some(filter) = &self.opts.filter
            && !filter(&relative, info)
        {
            return Ok(());
        }

        let target = match self.sanitize(&relative, info) {
            Ok(target) => target,
            Err(unsafe_path) => return self.reject(unsafe_path),
        };

        match self.write(&target, info, contents) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && self.opts.skip_duplicates => {
                debug!("Skipping duplicate entry {:?}", relative);
                Ok(())
            }
            result => result.with_context(|| format!("Failed to extract {:?}", relative)),
        }
    }

    /// Skip or abort on an unsafe entry, per `skip_invalid`.
    pub(crate) fn reject(&self, unsafe_path: UnsafePath) -> Result<()> {
        if self.opts.skip_invalid {
            debug!("Skipping entry: {}", unsafe_path);
            Ok(())
        } else {
            Err(anyhow!(unsafe_path))
        }
    }

    /// The entry path below the destination, or `None` when stripping
    /// consumes it entirely. The raw path is validated before anything is
    /// stripped, so a hostile leading segment cannot be dropped unseen.
    fn relative_path(&self, raw_path: &Path) -> Result<Option<PathBuf>, UnsafePath> {
        let normalized = sanitize::check_raw_entry_path(raw_path)?;
        let stripped: PathBuf = normalized
            .components()
            .skip(self.opts.strip_components)
            .collect();
        if stripped.as_os_str().is_empty() {
            Ok(None)
        } else {
            Ok(Some(stripped))
        }
    }

    fn sanitize(&self, relative: &Path, info: &EntryInfo) -> Result<PathBuf, UnsafePath> {
        let target = sanitize::check_entry_path(&self.dest, relative)?;
        if sanitize::has_symlink_ancestor(&self.dest, &target) {
            return Err(UnsafePath::ThroughSymlink(relative.to_path_buf()));
        }

        match &info.kind {
            EntryKind::Symlink(link_target) => {
                sanitize::check_symlink_target(&self.dest, &target, link_target)?;
            }
            EntryKind::HardLink(link_target) => {
                let source = self.hard_link_source(link_target);
                let escapes = match &source {
                    Ok(source) => sanitize::has_symlink_ancestor(&self.dest, source),
                    Err(_) => true,
                };
                if escapes {
                    return Err(UnsafePath::LinkEscapes {
                        link: relative.to_path_buf(),
                        target: link_target.clone(),
                    });
                }
            }
            EntryKind::Directory | EntryKind::File => {}
        }
        Ok(target)
    }

    fn hard_link_source(&self, link_target: &Path) -> Result<PathBuf, UnsafePath> {
        let relative = self
            .relative_path(link_target)?
            .ok_or_else(|| UnsafePath::Escapes(link_target.to_path_buf()))?;
        sanitize::check_entry_path(&self.dest, &relative)
    }

    fn write(&self, target: &Path, info: &EntryInfo, contents: &mut dyn Read) -> io::Result<()> {
        match &info.kind {
            EntryKind::Directory => create_dir_all(target),
            EntryKind::File => {
                if let Some(parent) = target.parent() {
                    create_dir_all(parent)?;
                }
                let mut file = create_new_file(target)?;
                io::copy(contents, &mut file)?;
                Ok(())
            }
            EntryKind::Symlink(link_target) => {
                if let Some(parent) = target.parent() {
                    create_dir_all(parent)?;
                }
                create_symlink(link_target, target)
            }
            EntryKind::HardLink(link_target) => {
                let source = self
                    .hard_link_source(link_target)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                let meta = fs::symlink_metadata(&source)?;
                if !meta.file_type().is_file() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("hard link target {:?} is not a regular file", link_target),
                    ));
                }
                if let Some(parent) = target.parent() {
                    create_dir_all(parent)?;
                }
                fs::hard_link(&source, target)
            }
        }
    }
}

fn create_dir_all(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

fn create_new_file(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(unix)]
fn create_symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(not(unix))]
fn create_symlink(original: &Path, link: &Path) -> io::Result<()> {
    debug!("Symlinks unsupported on this platform, skipping {:?} -> {:?}", link, original);
    Ok(())
}
