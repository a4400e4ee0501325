use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::process::{CommandOutput, CommandRunner};

/// Validate that a branch name is safe: matches `^[a-zA-Z0-9/_.-]+$`, does not
/// start with `refs/` and contains no `..`.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::NotFound("branch name must not be empty".to_string()));
    }
    if name.starts_with("refs/") {
        return Err(Error::NotFound(format!(
            "branch name must not start with 'refs/': {name}"
        )));
    }
    if name.contains("..") || name.starts_with('-') || name.ends_with('/') {
        return Err(Error::NotFound(format!("invalid branch name: {name}")));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '_' || c == '.' || c == '-')
    {
        return Err(Error::NotFound(format!(
            "branch name contains invalid characters (allowed: a-zA-Z0-9/_.-): {name}"
        )));
    }
    Ok(())
}

/// Validate a remote/user name: `^[a-zA-Z0-9._-]+$`, not starting with `-`.
pub fn validate_user_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('-')
        || name.starts_with('.')
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
    {
        return Err(Error::NotFound(format!("invalid user name: {name:?}")));
    }
    Ok(())
}

/// A branch as named in a request: `branch` (local) or `user:branch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSpec {
    pub owner: Option<String>,
    pub branch: String,
}

impl BranchSpec {
    pub fn local(branch: impl Into<String>) -> Self {
        Self {
            owner: None,
            branch: branch.into(),
        }
    }

    pub fn remote(owner: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            branch: branch.into(),
        }
    }

    /// Parse `branch` or `user:branch`, validating both parts.
    pub fn parse(name: &str) -> Result<Self> {
        let spec = match name.split_once(':') {
            Some((owner, branch)) => {
                validate_user_name(owner)?;
                Self::remote(owner, branch)
            }
            None => Self::local(name),
        };
        validate_branch_name(&spec.branch)?;
        Ok(spec)
    }

    /// Fully qualified ref: `refs/heads/<b>` or `refs/remotes/<user>/<b>`.
    pub fn full_ref(&self) -> String {
        match &self.owner {
            Some(owner) => format!("refs/remotes/{owner}/{}", self.branch),
            None => format!("refs/heads/{}", self.branch),
        }
    }
}

impl fmt::Display for BranchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{owner}:{}", self.branch),
            None => write!(f, "{}", self.branch),
        }
    }
}

/// Git runs with the work tree as its cwd, so relative paths must be
/// resolved up front.
fn absolute_or_keep(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

/// Runs git against one (git-dir, work-tree) pair.
///
/// Every invocation is prefixed with `--git-dir` and `--work-tree` so the
/// process working directory never matters.
#[derive(Clone)]
pub struct Git {
    runner: Arc<dyn CommandRunner>,
    git_dir: PathBuf,
    work_tree: PathBuf,
}

impl fmt::Debug for Git {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Git")
            .field("git_dir", &self.git_dir)
            .field("work_tree", &self.work_tree)
            .finish()
    }
}

impl Git {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        git_dir: impl Into<PathBuf>,
        work_tree: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            git_dir: absolute_or_keep(git_dir.into()),
            work_tree: absolute_or_keep(work_tree.into()),
        }
    }

    /// Gateway for a normal checkout where the git dir is `<work_tree>/.git`.
    pub fn for_work_tree(runner: Arc<dyn CommandRunner>, work_tree: impl Into<PathBuf>) -> Self {
        let work_tree = work_tree.into();
        Self::new(runner, work_tree.join(".git"), work_tree)
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn work_tree(&self) -> &Path {
        &self.work_tree
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    fn invoke(&self, args: &[&str]) -> Result<CommandOutput> {
        let git_dir = self.git_dir.to_string_lossy();
        let work_tree = self.work_tree.to_string_lossy();
        let mut full: Vec<&str> = vec!["--git-dir", &git_dir, "--work-tree", &work_tree];
        full.extend_from_slice(args);
        debug!(args = %args.join(" "), "git");
        self.runner.run("git", &full, &self.work_tree, None)
    }

    /// Fire-and-report: returns the exit code. Only a spawn failure is an error.
    pub fn status(&self, args: &[&str]) -> Result<i32> {
        Ok(self.invoke(args)?.code)
    }

    /// Run-and-capture-or-fail: non-zero exit becomes [`Error::GitCommand`].
    pub fn output(&self, args: &[&str]) -> Result<Vec<u8>> {
        let out = self.invoke(args)?;
        if out.success() {
            Ok(out.stdout)
        } else {
            Err(Error::GitCommand {
                args: args.join(" "),
                code: out.code,
                stderr: out.stderr_lossy(),
            })
        }
    }

    pub fn output_string(&self, args: &[&str]) -> Result<String> {
        let bytes = self.output(args)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn check(&self, args: &[&str]) -> Result<()> {
        self.output(args).map(|_| ())
    }

    pub fn ref_exists(&self, full_ref: &str) -> Result<bool> {
        Ok(self.status(&["show-ref", "--verify", "--quiet", full_ref])? == 0)
    }

    pub fn commit_exists(&self, rev: &str) -> Result<bool> {
        if rev.is_empty() || rev.starts_with('-') {
            return Ok(false);
        }
        let spec = format!("{rev}^{{commit}}");
        Ok(self.status(&["rev-parse", "--verify", "--quiet", &spec])? == 0)
    }

    /// Add a remote, tolerating the case where it already exists.
    pub fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        let code = self.status(&["remote", "add", name, url])?;
        if code != 0 {
            debug!(remote = name, code, "git remote add failed (likely exists)");
        }
        Ok(())
    }

    pub fn fetch(&self, remote: &str, prune: bool) -> Result<()> {
        if prune {
            self.check(&["fetch", "-p", remote])
        } else {
            self.check(&["fetch", remote])
        }
    }

    /// Best-effort variant of [`Git::check`] that only logs failures.
    pub fn try_check(&self, args: &[&str]) {
        if let Err(e) = self.check(args) {
            warn!(args = %args.join(" "), error = %e, "best-effort git command failed");
        }
    }
}
