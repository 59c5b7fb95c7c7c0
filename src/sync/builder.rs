//! Building one version's deterministic commit and tag.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::Path;
use tempfile::TempDir;

use super::SyncOptions;
use crate::archive;
use crate::git::{GitBackend, Signature};
use crate::package::VersionedPackage;
use crate::source::PackageSource;

const REMOTE: &str = "origin";

/// Download, extract, commit and tag `pkg`, then push the tag into `repo_dir`.
///
/// All intermediate work happens in a fresh scratch directory, which is
/// removed whether or not this succeeds; `repo_dir` only ever receives the
/// finished tag. The commit's identity and date depend solely on `pkg` and
/// `options`, so the same sources always produce the same commit hash.
#[tracing::instrument(skip(source, git, options))]
pub async fn materialize<S, G>(
    source: &S,
    git: &G,
    options: &SyncOptions,
    repo_dir: &Path,
    pkg: &VersionedPackage,
) -> Result<()>
where
    S: PackageSource + ?Sized,
    G: GitBackend + ?Sized,
{
    let scratch = scratch_dir(options, pkg)?;
    let result = build_and_push(source, git, options, repo_dir, pkg, &scratch).await;

    let scratch_path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        warn!("Failed to remove scratch directory {:?}: {}", scratch_path, e);
    }
    result
}

fn scratch_dir(options: &SyncOptions, pkg: &VersionedPackage) -> Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    let prefix = format!("pkgsync-{}-", pkg.scheme());
    builder.prefix(&prefix);
    let dir = match &options.scratch_root {
        Some(root) => {
            std::fs::create_dir_all(root)
                .with_context(|| format!("Failed to create scratch root {:?}", root))?;
            builder.tempdir_in(root)
        }
        None => builder.tempdir(),
    };
    dir.context("Failed to create scratch directory")
}

async fn build_and_push<S, G>(
    source: &S,
    git: &G,
    options: &SyncOptions,
    repo_dir: &Path,
    pkg: &VersionedPackage,
    scratch: &TempDir,
) -> Result<()>
where
    S: PackageSource + ?Sized,
    G: GitBackend + ?Sized,
{
    // The archive lives next to the working tree, never inside it.
    let download_dir = scratch.path().join("download");
    let work_dir = scratch.path().join("content");
    tokio::fs::create_dir_all(&download_dir)
        .await
        .with_context(|| format!("Failed to create {:?}", download_dir))?;

    let downloaded = source.download(&download_dir, pkg).await?;

    debug!("Extracting {:?} into {:?}", downloaded.path, work_dir);
    let dest = work_dir.clone();
    tokio::task::spawn_blocking(move || {
        archive::extract_file(&downloaded.path, downloaded.format, &dest, &downloaded.options)
    })
    .await
    .context("Extraction task panicked")?
    .with_context(|| format!("Failed to extract {}", pkg))?;

    let syntax = pkg.versioned_syntax();
    let tag = pkg.tag_name();
    let signature = Signature::new(
        syntax.as_str(),
        options.contact_email.as_str(),
        options.commit_stamp.date,
    );
    let remote_url = std::path::absolute(repo_dir)
        .with_context(|| format!("Failed to resolve {:?}", repo_dir))?;

    git.init(&work_dir, false).await?;
    git.add_all(&work_dir).await?;
    git.commit(&work_dir, &syntax, &signature).await?;
    git.tag_annotated(&work_dir, &tag, &syntax, &signature).await?;
    git.add_remote(&work_dir, REMOTE, &remote_url).await?;
    git.push_tag(&work_dir, REMOTE, &tag).await?;

    debug!("Pushed {} to {:?}", tag, repo_dir);
    Ok(())
}
