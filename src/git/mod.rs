//! Git operations used to build and maintain synthetic repositories.

mod cli;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;

pub use cli::GitCli;

/// Identity and timestamp recorded on a commit or tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// Git date string, e.g. `Thu Apr  8 14:24:52 2021 +0200`.
    pub date: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            date: date.into(),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Versioned commit timestamp.
///
/// Commit and tag hashes depend on this date. Changing it means every
/// repository gets rebuilt, so a new value must come with a new revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitStamp {
    pub revision: u32,
    pub date: &'static str,
}

pub const COMMIT_STAMP_V1: CommitStamp = CommitStamp {
    revision: 1,
    date: "Thu Apr  8 14:24:52 2021 +0200",
};

/// Placeholder identity for git operations that record no package-specific author.
pub fn placeholder_signature(email: &str, stamp: CommitStamp) -> Signature {
    Signature::new("pkgsync", email, stamp.date)
}

/// Trait for git operations.
///
/// `dir` is a working tree for the building operations and the target
/// (usually bare) repository for the maintenance ones.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Initialize a repository in `dir`, creating it if needed.
    async fn init(&self, dir: &Path, bare: bool) -> Result<()>;

    /// Stage every file in the working tree.
    async fn add_all(&self, dir: &Path) -> Result<()>;

    /// Commit the index, even if it is empty.
    async fn commit(&self, dir: &Path, message: &str, author: &Signature) -> Result<()>;

    /// Create an annotated tag pointing at `HEAD`.
    async fn tag_annotated(&self, dir: &Path, tag: &str, message: &str, tagger: &Signature)
    -> Result<()>;

    /// Register `url` as remote `name`.
    async fn add_remote(&self, dir: &Path, name: &str, url: &Path) -> Result<()>;

    /// Force-push exactly one tag to `remote`.
    async fn push_tag(&self, dir: &Path, remote: &str, tag: &str) -> Result<()>;

    /// List all tag names in the repository.
    async fn list_tags(&self, dir: &Path) -> Result<Vec<String>>;

    /// Create or move `branch` to the commit `target` points at.
    async fn force_branch(&self, dir: &Path, branch: &str, target: &str) -> Result<()>;

    async fn delete_tag(&self, dir: &Path, tag: &str) -> Result<()>;

    async fn delete_branch(&self, dir: &Path, branch: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_stamp_v1_is_stable() {
        assert_eq!(COMMIT_STAMP_V1.revision, 1);
        assert_eq!(COMMIT_STAMP_V1.date, "Thu Apr  8 14:24:52 2021 +0200");
    }

    #[test]
    fn test_signature_display() {
        let sig = Signature::new("react@18.2.0", "pkgsync@localhost", COMMIT_STAMP_V1.date);
        assert_eq!(sig.to_string(), "react@18.2.0 <pkgsync@localhost>");
    }

    #[test]
    fn test_placeholder_signature_uses_stamp_date() {
        let sig = placeholder_signature("ops@example.com", COMMIT_STAMP_V1);
        assert_eq!(sig.email, "ops@example.com");
        assert_eq!(sig.date, COMMIT_STAMP_V1.date);
    }
}
