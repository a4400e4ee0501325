use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::castle::{CastleInfo, CastlePublisher};
use crate::classifier::ReviewClassifier;
use crate::conduit::{ArcConduit, OpenReview};
use crate::config::Config;
use crate::diff;
use crate::error::{Error, Result};
use crate::git::{BranchSpec, Git, validate_branch_name, validate_user_name};
use crate::github::{GitHubPulls, PullRequest, PullRequestSource};
use crate::lock::WorkdirLock;
use crate::materialize::{ArcPatch, PatchMaterializer};
use crate::process::{CommandRunner, SystemRunner};
use crate::review_store::TomlReviewStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchEntry {
    pub name: String,
    /// `<remote>:<name>`, usable with [`Sandcastle::branch`].
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub branches: Vec<BranchEntry>,
    pub pulls: Vec<PullRequest>,
    pub reviews: Vec<OpenReview>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffPage {
    pub title: String,
    pub body: String,
    /// `branch` or `user:branch`
    pub branch: String,
    /// URL path under which the castle is served.
    pub castle_url: String,
    pub castle: CastleInfo,
    pub files: Vec<String>,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Browse {
    Directory { title: String, entries: Vec<String> },
    File { bytes: Vec<u8> },
}

/// The named handlers a front end routes requests to.
pub struct Sandcastle {
    config: Config,
    git: Git,
    materializer: PatchMaterializer,
    publisher: CastlePublisher,
    lock: WorkdirLock,
    pulls: Box<dyn PullRequestSource>,
}

impl Sandcastle {
    pub fn new(
        config: Config,
        git: Git,
        materializer: PatchMaterializer,
        publisher: CastlePublisher,
        lock: WorkdirLock,
        pulls: Box<dyn PullRequestSource>,
    ) -> Self {
        Self {
            config,
            git,
            materializer,
            publisher,
            lock,
            pulls,
        }
    }

    /// Wire every component to the real tools named in `config`.
    pub fn from_config(config: Config) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let git = Git::new(runner.clone(), config.git_dir(), &config.repo_dir);
        let lock = WorkdirLock::new(&config.lock_file, config.lock_timeout());
        let publisher = CastlePublisher::new(git.clone(), &config.castles_dir);
        let classifier = ReviewClassifier::new(
            Box::new(TomlReviewStore::new(&config.review_store)),
            Box::new(ArcConduit::new(
                runner.clone(),
                &config.arc_binary,
                &config.repo_dir,
            )),
            git.clone(),
            &config.project_name,
        );
        let materializer = PatchMaterializer::new(
            git.clone(),
            classifier,
            Box::new(ArcPatch::new(runner, &config.arc_binary)),
            publisher.clone(),
            lock.clone(),
            &config.upstream_remote,
            &config.primary_branch,
        );
        let pulls = Box::new(GitHubPulls::new(&config));
        Self::new(config, git, materializer, publisher, lock, pulls)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn mainline(&self) -> String {
        format!(
            "refs/remotes/{}/{}",
            self.config.upstream_remote, self.config.primary_branch
        )
    }

    /// Upstream branches, open pull requests, and open reviews that belong
    /// to the tracked project.
    pub fn overview(&self) -> Result<Overview> {
        self.git.fetch(&self.config.upstream_remote, true)?;

        let prefix = format!("refs/remotes/{}/", self.config.upstream_remote);
        let pattern = format!("{prefix}*");
        let listing = self
            .git
            .output_string(&["for-each-ref", "--format=%(refname)", &pattern])?;

        let mut refs: Vec<&str> = listing.lines().filter(|l| !l.is_empty()).collect();
        refs.sort_unstable();
        let branches = refs
            .into_iter()
            .filter_map(|r| r.strip_prefix(&prefix))
            .filter(|name| *name != "HEAD")
            .map(|name| BranchEntry {
                name: name.to_string(),
                path: format!("{}:{name}", self.config.upstream_remote),
            })
            .collect();

        let pulls = self.pulls.list_open()?;

        let classifier = self.materializer.classifier();
        let mut reviews = Vec::new();
        for review in classifier.conduit().open_reviews()? {
            if classifier.is_relevant(review.id)? {
                reviews.push(review);
            }
        }

        Ok(Overview {
            branches,
            pulls,
            reviews,
        })
    }

    /// Add (if needed) and fetch a contributor's remote.
    fn fetch_remote(&self, user: &str) -> Result<()> {
        validate_user_name(user)?;
        self.git.add_remote(user, &self.config.remote_url(user))?;
        self.git.fetch(user, false).map_err(|e| {
            warn!(remote = user, error = %e, "fetch failed");
            Error::NotFound(format!("could not fetch {user}: {e}"))
        })
    }

    fn publish_locked(&self, spec: &BranchSpec) -> Result<CastleInfo> {
        let _guard = self.lock.acquire()?;
        self.publisher.publish(spec)
    }

    fn page(
        &self,
        title: String,
        body: String,
        spec: &BranchSpec,
        castle: CastleInfo,
        patch: &str,
    ) -> Result<DiffPage> {
        let rendered = diff::render(patch)?;
        Ok(DiffPage {
            title,
            body,
            branch: spec.to_string(),
            castle_url: format!("/castles/{spec}"),
            castle,
            files: rendered.files,
            html: rendered.html,
        })
    }

    pub fn pull(&self, number: u64) -> Result<DiffPage> {
        let pull = self.pulls.get(number)?;
        let (user, branch) = pull.owner_and_branch()?;
        validate_branch_name(branch)?;
        let spec = BranchSpec::remote(user, branch);
        info!(pull = number, branch = %spec, "previewing pull request");

        self.fetch_remote(user)?;
        let patch = self.pulls.diff(&pull)?;
        let castle = self.publish_locked(&spec)?;

        self.page(
            pull.title.clone(),
            pull.body.clone().unwrap_or_default(),
            &spec,
            castle,
            &patch,
        )
    }

    /// `name` is `branch` (on the upstream remote) or `user:branch`.
    pub fn branch(&self, name: &str) -> Result<DiffPage> {
        let parsed = BranchSpec::parse(name)?;
        let user = parsed
            .owner
            .clone()
            .unwrap_or_else(|| self.config.upstream_remote.clone());
        let spec = BranchSpec::remote(&user, &parsed.branch);
        info!(branch = %spec, "previewing branch");

        self.fetch_remote(&user)?;
        if !self.git.ref_exists(&spec.full_ref())? {
            return Err(Error::NotFound(format!("no such branch: {spec}")));
        }

        let range = format!("{}...{}", self.mainline(), spec.full_ref());
        let patch = self.git.output_string(&["diff", &range])?;
        let castle = self.publish_locked(&spec)?;

        self.page(name.to_string(), String::new(), &spec, castle, &patch)
    }

    pub fn review(&self, review_id: u64) -> Result<DiffPage> {
        let review = self.materializer.materialize(review_id)?;
        let spec = BranchSpec::local(&review.branch);
        self.page(
            format!("D{review_id}"),
            String::new(),
            &spec,
            review.castle,
            &review.patch,
        )
    }

    /// Read-only view of a branch's tree at `path`.
    pub fn browse(&self, name: &str, path: &str) -> Result<Browse> {
        let spec = BranchSpec::parse(name)?;
        if !self.git.ref_exists(&spec.full_ref())? {
            return Err(Error::NotFound(format!("no such branch: {spec}")));
        }

        let path = path.trim_matches('/');
        if path.split('/').any(|part| part == "..") {
            return Err(Error::NotFound(format!("invalid path: {path}")));
        }
        let object = format!("{}:{path}", spec.full_ref());

        let kind = self
            .git
            .output_string(&["cat-file", "-t", &object])
            .map_err(|_| Error::NotFound(format!("{spec}/{path}")))?;

        if kind.trim() == "tree" {
            let listing = self.git.output(&["ls-tree", "-z", &object])?;
            let mut entries: Vec<String> = Vec::new();
            if !path.is_empty() {
                entries.push("..".to_string());
            }
            for record in listing.split(|b| *b == 0).filter(|r| !r.is_empty()) {
                entries.push(parse_tree_entry(&String::from_utf8_lossy(record))?);
            }
            let title = if path.is_empty() {
                format!("{spec}/")
            } else {
                format!("{spec}/{path}/")
            };
            Ok(Browse::Directory { title, entries })
        } else {
            let bytes = self.git.output(&["cat-file", "blob", &object])?;
            Ok(Browse::File { bytes })
        }
    }
}

/// `<mode> SP <type> SP <object> TAB <name>` → name, with `/` for trees.
fn parse_tree_entry(record: &str) -> Result<String> {
    let (meta, name) = record
        .split_once('\t')
        .ok_or_else(|| Error::external("git ls-tree", format!("bad entry: {record:?}")))?;
    let kind = meta.split(' ').nth(1).unwrap_or_default();
    if kind == "tree" {
        Ok(format!("{name}/"))
    } else {
        Ok(name.to_string())
    }
}
