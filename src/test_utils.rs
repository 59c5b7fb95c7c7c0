//! Test doubles and archive builders shared by unit tests.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tar::{EntryType, Header};

use crate::archive::{ArchiveFormat, ExtractOptions};
use crate::git::{GitBackend, Signature};
use crate::package::{Package, Scheme, VersionedPackage};
use crate::source::{DownloadedArchive, PackageSource, SourceError};
use crate::store::MetadataStore;

/// One entry of a tar archive built for a test.
#[derive(Debug, Clone)]
pub struct TarEntry {
    path: String,
    kind: EntryType,
    contents: Vec<u8>,
    link_target: Option<String>,
    /// Write `path` into the header verbatim, bypassing the tar crate's checks.
    raw: bool,
}

impl TarEntry {
    fn new(path: &str, kind: EntryType) -> Self {
        Self {
            path: path.to_string(),
            kind,
            contents: Vec::new(),
            link_target: None,
            raw: false,
        }
    }

    pub fn file(path: &str, contents: &str) -> Self {
        Self {
            contents: contents.as_bytes().to_vec(),
            ..Self::new(path, EntryType::Regular)
        }
    }

    pub fn dir(path: &str) -> Self {
        Self::new(path, EntryType::Directory)
    }

    /// A regular file whose name may be absolute or contain `..`.
    pub fn raw_file(path: &str, contents: &str) -> Self {
        Self {
            raw: true,
            ..Self::file(path, contents)
        }
    }

    pub fn symlink(path: &str, target: &str) -> Self {
        Self {
            link_target: Some(target.to_string()),
            ..Self::new(path, EntryType::Symlink)
        }
    }

    pub fn hard_link(path: &str, target: &str) -> Self {
        Self {
            link_target: Some(target.to_string()),
            ..Self::new(path, EntryType::Link)
        }
    }

    fn append_to<W: Write>(&self, builder: &mut tar::Builder<W>) {
        let mut header = Header::new_gnu();
        header.set_entry_type(self.kind);
        header.set_size(self.contents.len() as u64);
        header.set_mode(if self.kind.is_dir() { 0o755 } else { 0o644 });
        header.set_mtime(0);
        if let Some(target) = &self.link_target {
            header.set_link_name(target).unwrap();
        }

        if self.raw {
            let name = self.path.as_bytes();
            header.as_old_mut().name[..name.len()].copy_from_slice(name);
            header.set_cksum();
            builder.append(&header, self.contents.as_slice()).unwrap();
        } else {
            builder
                .append_data(&mut header, &self.path, self.contents.as_slice())
                .unwrap();
        }
    }
}

pub fn tar_bytes(entries: &[TarEntry]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for entry in entries {
        entry.append_to(&mut builder);
    }
    builder.into_inner().unwrap()
}

pub fn tar_gz_bytes(entries: &[TarEntry]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes(entries)).unwrap();
    encoder.finish().unwrap()
}

/// Build a zip from `(name, contents)` pairs; names ending in `/` become directories.
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// A commit recorded by [`FakeGit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCommit {
    pub message: String,
    pub author: Signature,
    /// Staged file paths relative to the working tree, sorted.
    pub files: Vec<String>,
    pub contents: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct FakeRepo {
    staged: Vec<(String, Vec<u8>)>,
    head: Option<FakeCommit>,
    tags: BTreeMap<String, FakeCommit>,
    /// Branch name to the tag it was moved to.
    branches: BTreeMap<String, String>,
    remotes: HashMap<String, PathBuf>,
}

/// In-memory [`GitBackend`]. Working trees are read from disk when staged;
/// everything else lives in memory keyed by directory.
#[derive(Debug, Default)]
pub struct FakeGit {
    repos: Mutex<HashMap<PathBuf, FakeRepo>>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted tag names in `repo`.
    pub fn tags(&self, repo: &Path) -> Vec<String> {
        let repos = self.repos.lock().unwrap();
        repos
            .get(repo)
            .map(|r| r.tags.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The tag a branch was last moved to.
    pub fn branch(&self, repo: &Path, branch: &str) -> Option<String> {
        let repos = self.repos.lock().unwrap();
        repos.get(repo)?.branches.get(branch).cloned()
    }

    pub fn commit_of(&self, repo: &Path, tag: &str) -> Option<FakeCommit> {
        let repos = self.repos.lock().unwrap();
        repos.get(repo)?.tags.get(tag).cloned()
    }

    /// File contents tagged as `tag`, for checking a tag was left untouched.
    pub fn tag_content(&self, repo: &Path, tag: &str) -> Option<Vec<Vec<u8>>> {
        self.commit_of(repo, tag).map(|c| c.contents)
    }

    /// Create a tag directly, as if an earlier run had pushed it.
    pub fn seed_tag(&self, repo: &Path, tag: &str) {
        let mut repos = self.repos.lock().unwrap();
        repos.entry(repo.to_path_buf()).or_default().tags.insert(
            tag.to_string(),
            FakeCommit {
                message: tag.to_string(),
                author: Signature::new("seed", "seed@localhost", ""),
                files: Vec::new(),
                contents: Vec::new(),
            },
        );
    }
}

fn walk_files(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.file_name().is_some_and(|n| n == ".git") {
            continue;
        }
        let meta = std::fs::symlink_metadata(&path)?;
        if meta.is_dir() {
            walk_files(root, &path, out)?;
        } else {
            let relative = path.strip_prefix(root)?.to_string_lossy().replace('\\', "/");
            let contents = if meta.file_type().is_symlink() {
                std::fs::read_link(&path)?.to_string_lossy().into_owned().into_bytes()
            } else {
                std::fs::read(&path)?
            };
            out.push((relative, contents));
        }
    }
    Ok(())
}

#[async_trait]
impl GitBackend for FakeGit {
    async fn init(&self, dir: &Path, _bare: bool) -> Result<()> {
        self.repos
            .lock()
            .unwrap()
            .entry(dir.to_path_buf())
            .or_default();
        Ok(())
    }

    async fn add_all(&self, dir: &Path) -> Result<()> {
        let mut files = Vec::new();
        walk_files(dir, dir, &mut files)?;
        files.sort();
        let mut repos = self.repos.lock().unwrap();
        let repo = repos.get_mut(dir).context("not a repository")?;
        repo.staged = files;
        Ok(())
    }

    async fn commit(&self, dir: &Path, message: &str, author: &Signature) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos.get_mut(dir).context("not a repository")?;
        repo.head = Some(FakeCommit {
            message: message.to_string(),
            author: author.clone(),
            files: repo.staged.iter().map(|(p, _)| p.clone()).collect(),
            contents: repo.staged.iter().map(|(_, c)| c.clone()).collect(),
        });
        Ok(())
    }

    async fn tag_annotated(
        &self,
        dir: &Path,
        tag: &str,
        _message: &str,
        _tagger: &Signature,
    ) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos.get_mut(dir).context("not a repository")?;
        let head = repo.head.clone().context("no commit to tag")?;
        repo.tags.insert(tag.to_string(), head);
        Ok(())
    }

    async fn add_remote(&self, dir: &Path, name: &str, url: &Path) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos.get_mut(dir).context("not a repository")?;
        repo.remotes.insert(name.to_string(), url.to_path_buf());
        Ok(())
    }

    async fn push_tag(&self, dir: &Path, remote: &str, tag: &str) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos.get(dir).context("not a repository")?;
        let url = repo.remotes.get(remote).context("no such remote")?.clone();
        let commit = repo.tags.get(tag).context("no such tag")?.clone();
        repos
            .entry(url)
            .or_default()
            .tags
            .insert(tag.to_string(), commit);
        Ok(())
    }

    async fn list_tags(&self, dir: &Path) -> Result<Vec<String>> {
        Ok(self.tags(dir))
    }

    async fn force_branch(&self, dir: &Path, branch: &str, target: &str) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        let repo = repos.entry(dir.to_path_buf()).or_default();
        if !repo.tags.contains_key(target) {
            bail!("unknown revision {}", target);
        }
        repo.branches.insert(branch.to_string(), target.to_string());
        Ok(())
    }

    async fn delete_tag(&self, dir: &Path, tag: &str) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        repos
            .get_mut(dir)
            .and_then(|r| r.tags.remove(tag))
            .map(|_| ())
            .ok_or_else(|| anyhow!("tag {} not found", tag))
    }

    async fn delete_branch(&self, dir: &Path, branch: &str) -> Result<()> {
        let mut repos = self.repos.lock().unwrap();
        repos
            .get_mut(dir)
            .and_then(|r| r.branches.remove(branch))
            .map(|_| ())
            .ok_or_else(|| anyhow!("branch {} not found", branch))
    }
}

/// [`PackageSource`] serving a tiny generated tarball for any version.
#[derive(Debug)]
pub struct FakeSource {
    scheme: Scheme,
    downloads: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeSource {
    pub fn new(scheme: Scheme) -> Self {
        Self {
            scheme,
            downloads: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make downloads of `version` report not found.
    pub fn fail_version(&self, version: &str) {
        self.failing.lock().unwrap().insert(version.to_string());
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }

    pub fn downloads_of(&self, version: &str) -> usize {
        self.downloads
            .lock()
            .unwrap()
            .iter()
            .filter(|v| *v == version)
            .count()
    }
}

#[async_trait]
impl PackageSource for FakeSource {
    fn scheme(&self) -> Scheme {
        self.scheme
    }

    async fn download(&self, dest_dir: &Path, pkg: &VersionedPackage) -> Result<DownloadedArchive> {
        self.downloads.lock().unwrap().push(pkg.version.clone());
        if self.failing.lock().unwrap().contains(&pkg.version) {
            return Err(SourceError::NotFound(pkg.versioned_syntax()).into());
        }

        let path = dest_dir.join("package.tgz");
        let contents = format!("module.exports = '{}';\n", pkg.version);
        std::fs::write(
            &path,
            tar_gz_bytes(&[TarEntry::file("package/index.js", &contents)]),
        )?;
        Ok(DownloadedArchive {
            path,
            format: ArchiveFormat::TarGz,
            options: ExtractOptions {
                strip_components: 1,
                ..Default::default()
            },
        })
    }
}

/// In-memory [`MetadataStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    versions: Mutex<HashMap<Package, Vec<String>>>,
    blocked: Mutex<HashSet<(Package, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, package: &Package, versions: &[&str]) {
        let mut map = self.versions.lock().unwrap();
        let entry = map.entry(package.clone()).or_default();
        entry.extend(versions.iter().map(|v| v.to_string()));
    }

    pub fn versions(&self, package: &Package) -> Vec<String> {
        self.versions
            .lock()
            .unwrap()
            .get(package)
            .cloned()
            .unwrap_or_default()
    }

    pub fn block(&self, package: &Package, version: &str) {
        self.blocked
            .lock()
            .unwrap()
            .insert((package.clone(), version.to_string()));
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn list_versions(&self, package: &Package) -> Result<Vec<String>> {
        Ok(self.versions(package))
    }

    async fn insert_versions(&self, versions: &[VersionedPackage]) -> Result<usize> {
        let mut map = self.versions.lock().unwrap();
        let mut added = 0;
        for pkg in versions {
            let entry = map.entry(pkg.package.clone()).or_default();
            if !entry.contains(&pkg.version) {
                entry.push(pkg.version.clone());
                added += 1;
            }
        }
        Ok(added)
    }

    async fn is_version_allowed(&self, package: &Package, version: &str) -> Result<bool> {
        let blocked = self.blocked.lock().unwrap();
        Ok(!blocked.contains(&(package.clone(), version.to_string())))
    }
}
