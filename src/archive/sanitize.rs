//! Path sanitization for untrusted archive entries.
//!
//! Every check here is lexical: paths are cleaned without touching the
//! filesystem, and containment is decided by comparing components. The one
//! exception is [`has_symlink_ancestor`], which inspects what earlier entries
//! already wrote to the destination.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Name of the version-control metadata directory that archives must never create.
pub const VCS_METADATA_DIR: &str = ".git";

/// Reason an archive entry was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsafePath {
    /// The entry path is absolute.
    Absolute(PathBuf),
    /// The entry resolves outside the destination directory.
    Escapes(PathBuf),
    /// A segment of the entry path is the VCS metadata directory.
    VcsMetadata(PathBuf),
    /// A symlink or hard link target resolves outside the destination.
    LinkEscapes { link: PathBuf, target: PathBuf },
    /// The entry would be written through a symlink created by an earlier entry.
    ThroughSymlink(PathBuf),
    /// A symlink whose declared target is longer than extraction accepts.
    OversizedLink(PathBuf),
}

impl fmt::Display for UnsafePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsafePath::Absolute(p) => write!(f, "illegal absolute path in archive: {}", p.display()),
            UnsafePath::Escapes(p) => {
                write!(f, "illegal path in archive escapes destination: {}", p.display())
            }
            UnsafePath::VcsMetadata(p) => write!(
                f,
                "illegal path in archive contains {} directory: {}",
                VCS_METADATA_DIR,
                p.display()
            ),
            UnsafePath::LinkEscapes { link, target } => write!(
                f,
                "illegal link in archive: {} -> {} resolves outside destination",
                link.display(),
                target.display()
            ),
            UnsafePath::ThroughSymlink(p) => {
                write!(f, "illegal path in archive traverses a symlink: {}", p.display())
            }
            UnsafePath::OversizedLink(p) => {
                write!(f, "illegal link in archive: target of {} is too long", p.display())
            }
        }
    }
}

impl std::error::Error for UnsafePath {}

/// Normalize a path by processing `.` and `..` components lexically.
/// This does not access the filesystem and does not follow symlinks.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Keep a leading `..` that cannot be popped, so escapes stay visible.
                let popped = match result.components().next_back() {
                    Some(Component::Normal(_)) => result.pop(),
                    Some(Component::RootDir) | Some(Component::Prefix(_)) => true,
                    _ => false,
                };
                if !popped {
                    result.push(component);
                }
            }
            _ => result.push(component),
        }
    }
    result
}

/// Check if a path is under a given directory by comparing normalized path components.
///
/// `/dest/../../etc/passwd` is NOT under `/dest`, and `/destination` is not under `/dest`.
pub fn is_path_under(path: &Path, dir: &Path) -> bool {
    let normalized_path = normalize_path(path);
    let normalized_dir = normalize_path(dir);

    let path_components: Vec<_> = normalized_path.components().collect();
    let dir_components: Vec<_> = normalized_dir.components().collect();

    if path_components.len() < dir_components.len() {
        return false;
    }

    dir_components
        .iter()
        .zip(path_components.iter())
        .all(|(d, p)| d == p)
}

fn is_vcs_metadata(component: &Component<'_>) -> bool {
    match component {
        Component::Normal(name) => name
            .to_str()
            .is_some_and(|n| n.eq_ignore_ascii_case(VCS_METADATA_DIR)),
        _ => false,
    }
}

/// Validate an entry path as the archive declares it, before any leading
/// segments are stripped, and return it with `.` and inner `..` resolved.
///
/// Rejects absolute paths, a `.git` segment anywhere, and any `..` that
/// climbs above the archive root.
pub fn check_raw_entry_path(entry: &Path) -> Result<PathBuf, UnsafePath> {
    if entry.has_root()
        || entry
            .components()
            .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
    {
        return Err(UnsafePath::Absolute(entry.to_path_buf()));
    }

    if entry.components().any(|c| is_vcs_metadata(&c)) {
        return Err(UnsafePath::VcsMetadata(entry.to_path_buf()));
    }

    let normalized = normalize_path(entry);
    if normalized
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(UnsafePath::Escapes(entry.to_path_buf()));
    }

    Ok(normalized)
}

/// Validate an entry path and return the absolute destination it maps to.
///
/// `dest` must already be normalized.
pub fn check_entry_path(dest: &Path, entry: &Path) -> Result<PathBuf, UnsafePath> {
    let normalized = check_raw_entry_path(entry)?;

    let resolved = normalize_path(&dest.join(normalized));
    if !is_path_under(&resolved, dest) {
        return Err(UnsafePath::Escapes(entry.to_path_buf()));
    }

    Ok(resolved)
}

/// Validate a symlink target.
///
/// Absolute targets must themselves lie under `dest`. Relative targets are
/// resolved against the directory containing `link` (an absolute path inside
/// `dest`) and must also land under `dest`. A `..` is only accepted before
/// the first named segment: after one, lexical resolution stops being
/// trustworthy because that segment may be (or later become) a symlink.
pub fn check_symlink_target(dest: &Path, link: &Path, target: &Path) -> Result<(), UnsafePath> {
    let escapes = || UnsafePath::LinkEscapes {
        link: link.to_path_buf(),
        target: target.to_path_buf(),
    };

    let mut seen_name = target.is_absolute();
    for component in target.components() {
        match component {
            Component::Normal(_) => seen_name = true,
            Component::ParentDir if seen_name => return Err(escapes()),
            _ => {}
        }
    }

    let resolved = if target.is_absolute() {
        normalize_path(target)
    } else {
        let base = link.parent().unwrap_or(dest);
        normalize_path(&base.join(target))
    };

    let inside = is_path_under(&resolved, dest)
        && resolved
            .strip_prefix(dest)
            .is_ok_and(|rel| !rel.components().any(|c| is_vcs_metadata(&c)));

    if !inside {
        return Err(escapes());
    }
    Ok(())
}

/// Returns true when any existing ancestor of `path` strictly below `dest` is a symlink.
pub fn has_symlink_ancestor(dest: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(dest) else {
        return true;
    };

    let mut current = dest.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        match std::fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => return true,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    false
}
