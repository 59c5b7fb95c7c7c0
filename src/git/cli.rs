//! [`GitBackend`] implemented by running the `git` binary.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use log::debug;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{GitBackend, Signature};

/// Config overrides applied to every invocation, so that hooks, signing and
/// the user's configuration cannot influence what gets written.
const CONFIG_OVERRIDES: &[&str] = &[
    "-c",
    "core.hooksPath=/dev/null",
    "-c",
    "commit.gpgSign=false",
    "-c",
    "tag.gpgSign=false",
    "-c",
    "core.autocrlf=false",
];

/// Runs `git` as a subprocess with a bounded run time.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
    timeout: Duration,
    /// Identity for commands that record no package-specific author.
    placeholder: Signature,
    /// Branch bare repositories start on.
    default_branch: String,
}

impl GitCli {
    pub fn new(placeholder: Signature, timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("git"),
            timeout,
            placeholder,
            default_branch: "latest".to_string(),
        }
    }

    /// Use a specific git executable instead of the one on `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    /// Run `git <args>` in `dir` with `identity` as author and committer.
    async fn run<I, S>(&self, dir: &Path, args: I, identity: &Signature) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args
            .into_iter()
            .map(|a| a.as_ref().to_os_string())
            .collect();
        let display = args
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        debug!("git {} (in {:?})", display, dir);

        let mut cmd = Command::new(&self.program);
        cmd.args(CONFIG_OVERRIDES)
            .args(&args)
            .current_dir(dir)
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("GIT_CONFIG_GLOBAL", null_device())
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_AUTHOR_NAME", &identity.name)
            .env("GIT_AUTHOR_EMAIL", &identity.email)
            .env("GIT_AUTHOR_DATE", &identity.date)
            .env("GIT_COMMITTER_NAME", &identity.name)
            .env("GIT_COMMITTER_EMAIL", &identity.email)
            .env("GIT_COMMITTER_DATE", &identity.date)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow!("git {} timed out after {:?}", display, self.timeout))?
            .with_context(|| format!("Failed to execute {:?}", self.program))?;

        if !output.status.success() {
            bail!(
                "git {} failed ({}): {}",
                display,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn null_device() -> &'static str {
    if cfg!(windows) { "NUL" } else { "/dev/null" }
}

#[async_trait]
impl GitBackend for GitCli {
    async fn init(&self, dir: &Path, bare: bool) -> Result<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create directory {:?}", dir))?;

        let default_branch = format!("init.defaultBranch={}", self.default_branch);
        let mut args = vec!["-c", default_branch.as_str(), "init", "--quiet"];
        if bare {
            args.push("--bare");
        }
        self.run(dir, args, &self.placeholder).await?;
        Ok(())
    }

    async fn add_all(&self, dir: &Path) -> Result<()> {
        self.run(dir, ["add", "--all", "."], &self.placeholder)
            .await?;
        Ok(())
    }

    async fn commit(&self, dir: &Path, message: &str, author: &Signature) -> Result<()> {
        self.run(
            dir,
            ["commit", "--quiet", "--no-verify", "--allow-empty", "-m", message],
            author,
        )
        .await?;
        Ok(())
    }

    async fn tag_annotated(
        &self,
        dir: &Path,
        tag: &str,
        message: &str,
        tagger: &Signature,
    ) -> Result<()> {
        self.run(dir, ["tag", "--annotate", "-m", message, tag], tagger)
            .await?;
        Ok(())
    }

    async fn add_remote(&self, dir: &Path, name: &str, url: &Path) -> Result<()> {
        let args: [&OsStr; 4] = ["remote".as_ref(), "add".as_ref(), name.as_ref(), url.as_os_str()];
        self.run(dir, args, &self.placeholder).await?;
        Ok(())
    }

    async fn push_tag(&self, dir: &Path, remote: &str, tag: &str) -> Result<()> {
        let refspec = format!("+refs/tags/{tag}:refs/tags/{tag}");
        self.run(
            dir,
            ["push", "--quiet", "--no-verify", remote, refspec.as_str()],
            &self.placeholder,
        )
        .await?;
        Ok(())
    }

    async fn list_tags(&self, dir: &Path) -> Result<Vec<String>> {
        let output = self.run(dir, ["tag", "--list"], &self.placeholder).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn force_branch(&self, dir: &Path, branch: &str, target: &str) -> Result<()> {
        self.run(dir, ["branch", "--force", branch, target], &self.placeholder)
            .await?;
        Ok(())
    }

    async fn delete_tag(&self, dir: &Path, tag: &str) -> Result<()> {
        self.run(dir, ["tag", "--delete", tag], &self.placeholder)
            .await?;
        Ok(())
    }

    async fn delete_branch(&self, dir: &Path, branch: &str) -> Result<()> {
        self.run(dir, ["branch", "--delete", "--force", branch], &self.placeholder)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{COMMIT_STAMP_V1, placeholder_signature};
    use tempfile::tempdir;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn cli() -> GitCli {
        GitCli::new(
            placeholder_signature("pkgsync@localhost", COMMIT_STAMP_V1),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let dir = tempdir().unwrap();
        let git = cli().with_program("/nonexistent/git");

        let err = git.list_tags(dir.path()).await.unwrap_err();

        assert!(err.to_string().contains("Failed to execute"));
    }

    #[tokio::test]
    async fn test_build_tag_and_push() -> Result<()> {
        if !git_available() {
            return Ok(());
        }
        let dir = tempdir()?;
        let work = dir.path().join("work");
        let target = dir.path().join("target.git");
        let git = cli();
        let author = Signature::new("left-pad@1.3.0", "pkgsync@localhost", COMMIT_STAMP_V1.date);

        git.init(&target, true).await?;
        git.init(&work, false).await?;
        std::fs::write(work.join("index.js"), "module.exports = 1")?;
        git.add_all(&work).await?;
        git.commit(&work, "left-pad@1.3.0", &author).await?;
        git.tag_annotated(&work, "v1.3.0", "left-pad@1.3.0", &author)
            .await?;
        git.add_remote(&work, "origin", &target).await?;
        git.push_tag(&work, "origin", "v1.3.0").await?;

        assert_eq!(git.list_tags(&target).await?, vec!["v1.3.0"]);

        git.force_branch(&target, "latest", "v1.3.0").await?;
        git.delete_tag(&target, "v1.3.0").await?;
        assert!(git.list_tags(&target).await?.is_empty());
        git.delete_branch(&target, "latest").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_command_reports_stderr() -> Result<()> {
        if !git_available() {
            return Ok(());
        }
        let dir = tempdir()?;
        let git = cli();
        git.init(dir.path(), true).await?;

        let err = git.delete_tag(dir.path(), "v0.0.0").await.unwrap_err();

        assert!(err.to_string().contains("git tag --delete v0.0.0 failed"));
        Ok(())
    }
}
