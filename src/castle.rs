use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::git::{BranchSpec, Git};
use crate::process::CommandRunner;

/// Local branch namespace holding aliases of remote-tracking refs.
const ALIAS_PREFIX: &str = "castle";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CastleInfo {
    /// `branch` or `user:branch`
    pub key: String,
    pub path: PathBuf,
    pub commit: String,
}

/// Publishes read-only checkouts ("castles") of branches of the primary repo.
///
/// Each castle is a shallow single-branch clone under `castles_dir/<key>`.
/// Republishing fetches the branch tip into the clone and hard-resets it, so
/// the end state is always a clean checkout of the current tip.
#[derive(Debug, Clone)]
pub struct CastlePublisher {
    git: Git,
    castles_dir: PathBuf,
}

impl CastlePublisher {
    pub fn new(git: Git, castles_dir: impl Into<PathBuf>) -> Self {
        Self {
            git,
            castles_dir: castles_dir.into(),
        }
    }

    pub fn castle_path(&self, spec: &BranchSpec) -> PathBuf {
        self.castles_dir.join(spec.to_string())
    }

    /// Local branch the clone is taken from.
    fn source_branch(&self, spec: &BranchSpec) -> Result<String> {
        match &spec.owner {
            None => Ok(spec.branch.clone()),
            Some(owner) => {
                let alias = format!("{ALIAS_PREFIX}/{owner}/{}", spec.branch);
                self.git.check(&["branch", "-f", &alias, &spec.full_ref()])?;
                debug!(alias = %alias, target = %spec.full_ref(), "updated castle alias");
                Ok(alias)
            }
        }
    }

    pub fn publish(&self, spec: &BranchSpec) -> Result<CastleInfo> {
        if !self.git.ref_exists(&spec.full_ref())? {
            return Err(Error::NotFound(format!("no such branch: {spec}")));
        }

        let source = self.source_branch(spec)?;
        let path = self.castle_path(spec);
        let castle = Git::for_work_tree(self.git.runner().clone(), &path);

        if path.join(".git").exists() {
            let refspec = format!("refs/heads/{source}");
            castle.check(&["fetch", "--depth", "1", "origin", &refspec])?;
            castle.check(&["reset", "--hard", "FETCH_HEAD"])?;
            castle.check(&["clean", "-fdx"])?;
            info!(key = %spec, path = %path.display(), "refreshed castle");
        } else {
            std::fs::create_dir_all(&self.castles_dir)?;
            clone_shallow(
                self.git.runner().as_ref(),
                self.git.work_tree(),
                &source,
                &path,
                &self.castles_dir,
            )?;
            info!(key = %spec, path = %path.display(), "cloned castle");
        }

        let commit = castle
            .output_string(&["rev-parse", "HEAD"])?
            .trim()
            .to_string();
        Ok(CastleInfo {
            key: spec.to_string(),
            path,
            commit,
        })
    }
}

fn clone_shallow(
    runner: &dyn CommandRunner,
    repo: &Path,
    branch: &str,
    dest: &Path,
    cwd: &Path,
) -> Result<()> {
    // `--depth` is ignored for plain local paths; a file:// URL honours it.
    let repo = repo.canonicalize()?;
    let url = format!("file://{}", repo.display());
    // Relative to the caller, not to `cwd`.
    let dest = std::path::absolute(dest)?;
    let dest_str = dest.to_string_lossy();
    let args: [&str; 9] = [
        "clone",
        "--quiet",
        "--depth",
        "1",
        "--single-branch",
        "--branch",
        branch,
        &url,
        &dest_str,
    ];
    let out = runner.run("git", &args, cwd, None)?;
    if out.success() {
        Ok(())
    } else {
        Err(Error::GitCommand {
            args: args.join(" "),
            code: out.code,
            stderr: out.stderr_lossy(),
        })
    }
}
