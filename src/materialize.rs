use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::castle::{CastleInfo, CastlePublisher};
use crate::classifier::ReviewClassifier;
use crate::error::{Error, Result};
use crate::git::{BranchSpec, Git};
use crate::lock::WorkdirLock;
use crate::process::CommandRunner;

/// Canonical branch name for a review: `arcpatch-D<id>`.
pub fn review_branch(review_id: u64) -> String {
    format!("arcpatch-D{review_id}")
}

/// Temporary branch used while a patch is being applied.
pub fn working_branch(review_id: u64) -> String {
    format!("{}-new", review_branch(review_id))
}

/// Applies a review's patch onto the currently checked-out work tree.
pub trait PatchApplier: Send + Sync {
    /// Mutates `work_tree` in place. Any error means the patch did not apply.
    fn apply(&self, review_id: u64, work_tree: &Path) -> Result<()>;
}

/// Applies patches with `arc patch --nobranch D<id>`.
pub struct ArcPatch {
    runner: Arc<dyn CommandRunner>,
    arc_binary: String,
}

impl ArcPatch {
    pub fn new(runner: Arc<dyn CommandRunner>, arc_binary: impl Into<String>) -> Self {
        Self {
            runner,
            arc_binary: arc_binary.into(),
        }
    }
}

impl PatchApplier for ArcPatch {
    fn apply(&self, review_id: u64, work_tree: &Path) -> Result<()> {
        let patch = format!("D{review_id}");
        let out = self.runner.run(
            &self.arc_binary,
            &["patch", "--nobranch", &patch],
            work_tree,
            None,
        )?;
        if out.success() {
            Ok(())
        } else {
            Err(Error::external(
                "arc patch",
                format!("{patch} exited with code {}: {}", out.code, out.stderr_lossy()),
            ))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MaterializedReview {
    pub review_id: u64,
    pub branch: String,
    pub castle: CastleInfo,
    /// Unified diff of the review branch against the upstream mainline.
    pub patch: String,
}

/// Turns a review into a local branch plus a published castle.
///
/// All mutation of the shared work tree happens while holding the
/// [`WorkdirLock`]; fetch, classification and the final diff do not.
pub struct PatchMaterializer {
    git: Git,
    classifier: ReviewClassifier,
    applier: Box<dyn PatchApplier>,
    publisher: CastlePublisher,
    lock: WorkdirLock,
    upstream_remote: String,
    primary_branch: String,
}

impl PatchMaterializer {
    pub fn new(
        git: Git,
        classifier: ReviewClassifier,
        applier: Box<dyn PatchApplier>,
        publisher: CastlePublisher,
        lock: WorkdirLock,
        upstream_remote: impl Into<String>,
        primary_branch: impl Into<String>,
    ) -> Self {
        Self {
            git,
            classifier,
            applier,
            publisher,
            lock,
            upstream_remote: upstream_remote.into(),
            primary_branch: primary_branch.into(),
        }
    }

    pub fn classifier(&self) -> &ReviewClassifier {
        &self.classifier
    }

    fn mainline_ref(&self) -> String {
        format!(
            "refs/remotes/{}/{}",
            self.upstream_remote, self.primary_branch
        )
    }

    /// Make sure `arc` finds its default relative commit. Idempotent.
    pub fn ensure_arc_config(&self) -> Result<()> {
        let dir = self.git.git_dir().join("arc");
        let file = dir.join("default-relative-commit");
        if file.is_file() {
            return Ok(());
        }
        std::fs::create_dir_all(&dir)?;
        std::fs::write(
            &file,
            format!("{}/{}", self.upstream_remote, self.primary_branch),
        )?;
        info!(path = %file.display(), "wrote arc default-relative-commit");
        Ok(())
    }

    pub fn materialize(&self, review_id: u64) -> Result<MaterializedReview> {
        self.ensure_arc_config()?;

        self.git.fetch(&self.upstream_remote, true)?;

        let (relevant, fetched) = self.classifier.check(review_id)?;
        if !relevant {
            return Err(Error::Forbidden(format!(
                "D{review_id} is not a {} review.",
                self.classifier.project_name()
            )));
        }

        let info = match fetched {
            Some(info) => info,
            None => self.classifier.diff_info(review_id)?,
        };
        let base = info.base_revision.unwrap_or_else(|| self.mainline_ref());
        // Must not reach git as an option.
        if base.starts_with('-') {
            return Err(Error::NotFound(format!(
                "D{review_id} has an invalid base revision: {base}"
            )));
        }
        let branch = review_branch(review_id);

        let castle = {
            let _guard = self.lock.acquire()?;
            info!(review = review_id, base = %base, "applying review patch");

            if let Err(e) = self.apply_on_branch(review_id, &base) {
                self.abandon(review_id);
                warn!(review = review_id, error = %e, "patch application failed");
                return Err(Error::NotFound(format!(
                    "D{review_id} could not be applied: {e}"
                )));
            }

            self.publisher.publish(&BranchSpec::local(&branch))?
        };

        let range = format!("{}...refs/heads/{branch}", self.mainline_ref());
        let patch = self.git.output_string(&["diff", &range])?;

        info!(review = review_id, branch = %branch, commit = %castle.commit, "materialized review");
        Ok(MaterializedReview {
            review_id,
            branch,
            castle,
            patch,
        })
    }

    /// Checkout base, branch, apply, finalize. Caller holds the lock.
    fn apply_on_branch(&self, review_id: u64, base: &str) -> Result<()> {
        let working = working_branch(review_id);
        let branch = review_branch(review_id);

        self.git.check(&["checkout", "--quiet", "--force", "--detach", base])?;
        self.git.check(&["checkout", "--quiet", "-B", &working])?;
        self.applier.apply(review_id, self.git.work_tree())?;
        self.git.check(&["branch", "-M", &working, &branch])?;
        self.git
            .check(&["checkout", "--quiet", "--force", &self.primary_branch])?;
        Ok(())
    }

    /// Compensate a failed application: back to the primary branch, drop the
    /// working branch. Best effort; failures are logged.
    fn abandon(&self, review_id: u64) {
        let working = working_branch(review_id);
        self.git
            .try_check(&["checkout", "--quiet", "--force", &self.primary_branch]);
        self.git.try_check(&["clean", "-fdq"]);
        match self.git.status(&["branch", "-D", &working]) {
            Ok(0) => info!(branch = %working, "deleted working branch"),
            Ok(_) => {}
            Err(e) => warn!(branch = %working, error = %e, "failed to delete working branch"),
        }
    }
}
