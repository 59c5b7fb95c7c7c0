use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use log::{debug, info};
use std::io::{self, Read};
use std::path::Path;
use tar::Archive;

use super::{EntryInfo, EntryKind, ExtractOptions, Unpacker};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Extract a gzip-compressed tar stream into `dest`.
///
/// Some registries serve plain tarballs under a `.tgz` name, so a stream that
/// does not start with the gzip magic number is read as an uncompressed tar.
#[tracing::instrument(skip(reader, opts))]
pub fn extract_tar_gz<R: Read>(mut reader: R, dest: &Path, opts: &ExtractOptions) -> Result<()> {
    let mut magic = [0u8; GZIP_MAGIC.len()];
    let len = read_prefix(&mut reader, &mut magic).context("Failed to read archive header")?;
    let reader = (&magic[..len]).chain(reader);

    if magic[..len] == GZIP_MAGIC {
        extract_tar(GzDecoder::new(reader), dest, opts)
    } else {
        debug!("Archive is not gzip-compressed, reading as plain tar");
        extract_tar(reader, dest, opts)
    }
}

/// Fill `buf` unless the stream ends first; returns how many bytes were read.
fn read_prefix<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut len = 0;
    while len < buf.len() {
        match reader.read(&mut buf[len..]) {
            Ok(0) => break,
            Ok(n) => len += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(len)
}

/// Extract an uncompressed tar stream into `dest`.
#[tracing::instrument(skip(reader, opts))]
pub fn extract_tar<R: Read>(reader: R, dest: &Path, opts: &ExtractOptions) -> Result<()> {
    debug!("Extracting tar archive to {:?}...", dest);
    let unpacker = Unpacker::new(dest, opts)?;
    let mut archive = Archive::new(reader);

    for entry in archive.entries().context("Failed to read tar archive")? {
        let mut entry = entry.context("Failed to read tar entry")?;
        let path = entry
            .path()
            .context("Failed to decode tar entry path")?
            .into_owned();
        let entry_type = entry.header().entry_type();

        let kind = if entry_type.is_dir() {
            EntryKind::Directory
        } else if entry_type.is_file() {
            EntryKind::File
        } else if entry_type.is_symlink() || entry_type.is_hard_link() {
            let target = entry
                .link_name()
                .context("Failed to decode tar link target")?
                .with_context(|| format!("Link entry {:?} has no target", path))?
                .into_owned();
            if entry_type.is_symlink() {
                EntryKind::Symlink(target)
            } else {
                EntryKind::HardLink(target)
            }
        } else {
            debug!("Skipping {:?}: unsupported entry type {:?}", path, entry_type);
            continue;
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
