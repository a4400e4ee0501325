use tracing::{debug, info};

use crate::conduit::{Conduit, DiffInfo};
use crate::error::Result;
use crate::git::Git;
use crate::review_store::ReviewStore;

/// Decides whether a review belongs to the tracked project.
///
/// Decisions are memoised forever in the [`ReviewStore`].
pub struct ReviewClassifier {
    store: Box<dyn ReviewStore>,
    conduit: Box<dyn Conduit>,
    git: Git,
    project_name: String,
}

impl ReviewClassifier {
    pub fn new(
        store: Box<dyn ReviewStore>,
        conduit: Box<dyn Conduit>,
        git: Git,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            conduit,
            git,
            project_name: project_name.into(),
        }
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn conduit(&self) -> &dyn Conduit {
        self.conduit.as_ref()
    }

    pub fn is_relevant(&self, review_id: u64) -> Result<bool> {
        self.check(review_id).map(|(relevant, _)| relevant)
    }

    /// Relevance plus the diff metadata when it had to be fetched to decide.
    /// A cached decision returns `None`.
    pub fn check(&self, review_id: u64) -> Result<(bool, Option<DiffInfo>)> {
        let mut fetched = None;
        let relevant = self.store.get_or_compute(review_id, &mut || {
            let info = self.conduit.diff_info(review_id)?;
            let relevant = self.classify(&info)?;
            info!(
                review = review_id,
                relevant,
                project = info.project_name.as_deref().unwrap_or(""),
                "classified review"
            );
            fetched = Some(info);
            Ok(relevant)
        })?;
        Ok((relevant, fetched))
    }

    /// A declared project name decides on its own. Without one, the review is
    /// relevant only if its base revision is in local history.
    pub fn classify(&self, info: &DiffInfo) -> Result<bool> {
        if let Some(project) = &info.project_name {
            return Ok(project == &self.project_name);
        }
        match &info.base_revision {
            Some(rev) => {
                let exists = self.git.commit_exists(rev)?;
                debug!(rev = %rev, exists, "checked base revision");
                Ok(exists)
            }
            None => Ok(false),
        }
    }

    /// Latest diff metadata, queried fresh (not cached).
    pub fn diff_info(&self, review_id: u64) -> Result<DiffInfo> {
        self.conduit.diff_info(review_id)
    }
}
