use anyhow::{Context, Result, bail};
use log::{debug, info};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use super::{EntryInfo, EntryKind, ExtractOptions, Unpacker, UnsafePath};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Upper bound on the size of a symlink entry's target.
const MAX_LINK_TARGET: u64 = 4096;

/// Extract a zip archive of `declared_len` bytes from `reader` into `dest`.
///
/// Zip needs random access, so exactly `declared_len` bytes are buffered in
/// memory; a shorter stream is reported as truncated.
#[tracing::instrument(skip(reader, opts))]
pub fn extract_zip<R: Read>(
    reader: R,
    declared_len: u64,
    dest: &Path,
    opts: &ExtractOptions,
) -> Result<()> {
    debug!("Extracting zip archive to {:?}...", dest);

    let mut buffer = Vec::new();
    reader
        .take(declared_len)
        .read_to_end(&mut buffer)
        .context("Failed to read zip archive")?;
    if buffer.len() as u64 != declared_len {
        bail!(
            "Zip archive truncated: expected {} bytes, got {}",
            declared_len,
            buffer.len()
        );
    }

    let mut archive =
        ZipArchive::new(Cursor::new(buffer)).context("Failed to parse ZIP archive")?;
    let unpacker = Unpacker::new(dest, opts)?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to read ZIP entry {}", i))?;

        // Zip names are `/`-separated, but some writers emit `\`.
        let path = PathBuf::from(entry.name().replace('\\', "/"));

        let is_symlink = entry
            .unix_mode()
            .is_some_and(|mode| mode & S_IFMT == S_IFLNK);

        let kind = if is_symlink {
            let mut target = String::new();
            (&mut entry)
                .take(MAX_LINK_TARGET + 1)
                .read_to_string(&mut target)
                .with_context(|| format!("Failed to read symlink target of {:?}", path))?;
            if target.len() as u64 > MAX_LINK_TARGET {
                unpacker.reject(UnsafePath::OversizedLink(path))?;
                continue;
            }
            EntryKind::Symlink(PathBuf::from(target))
        } else if entry.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };

        let info = EntryInfo {
            kind,
            size: entry.size(),
        };
        unpacker.unpack(&path, &info, &mut entry)?;
    }

    info!("Extraction complete.");
    Ok(())
}
