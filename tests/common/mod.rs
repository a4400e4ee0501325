#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sandcastle::castle::CastlePublisher;
use sandcastle::classifier::ReviewClassifier;
use sandcastle::conduit::Conduit;
use sandcastle::config::Config;
use sandcastle::error::{Error, Result};
use sandcastle::git::Git;
use sandcastle::github::{PullHead, PullRequest, PullRequestSource};
use sandcastle::lock::WorkdirLock;
use sandcastle::materialize::{PatchApplier, PatchMaterializer};
use sandcastle::process::{CommandRunner, SystemRunner};
use sandcastle::review_store::MemoryReviewStore;
use serde_json::{Value, json};
use tempfile::TempDir;

pub fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} in {} failed: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn git_ok(dir: &Path, args: &[&str]) -> bool {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap()
        .status
        .success()
}

pub fn configure_identity(dir: &Path) {
    run_git(dir, &["config", "user.email", "test@test.com"]);
    run_git(dir, &["config", "user.name", "Test"]);
}

pub fn commit_file(dir: &Path, name: &str, content: &str, message: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
    run_git(dir, &["add", "."]);
    run_git(dir, &["commit", "-m", message]);
}

/// Temp layout: `upstream.git` (bare), `repo` (the shared work tree cloned
/// from it, on `master`), and `castles`.
pub struct Fixture {
    pub root: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap();
        let seed = root.path().join("seed");
        std::fs::create_dir_all(&seed).unwrap();
        run_git(&seed, &["init"]);
        configure_identity(&seed);
        commit_file(&seed, "README.md", "# exercises\n", "init");
        commit_file(&seed, "exercises/adding.html", "<p>1 + 1</p>\n", "add exercise");
        run_git(&seed, &["branch", "-M", "master"]);

        let upstream = root.path().join("upstream.git");
        run_git(root.path(), &["init", "--bare", upstream.to_str().unwrap()]);
        run_git(&upstream, &["symbolic-ref", "HEAD", "refs/heads/master"]);
        run_git(&seed, &["remote", "add", "origin", upstream.to_str().unwrap()]);
        run_git(&seed, &["push", "-u", "origin", "master"]);

        run_git(root.path(), &["clone", upstream.to_str().unwrap(), "repo"]);
        let fixture = Self { root };
        configure_identity(&fixture.repo());
        fixture
    }

    pub fn seed(&self) -> PathBuf {
        self.root.path().join("seed")
    }

    pub fn upstream(&self) -> PathBuf {
        self.root.path().join("upstream.git")
    }

    pub fn repo(&self) -> PathBuf {
        self.root.path().join("repo")
    }

    pub fn castles(&self) -> PathBuf {
        self.root.path().join("castles")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.path().join("locks").join("work.lock")
    }

    pub fn master_sha(&self) -> String {
        run_git(&self.repo(), &["rev-parse", "refs/remotes/origin/master"])
    }

    pub fn current_branch(&self) -> String {
        run_git(&self.repo(), &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn ref_exists(&self, full_ref: &str) -> bool {
        git_ok(&self.repo(), &["show-ref", "--verify", "--quiet", full_ref])
    }

    /// Push a new branch with one extra file to the upstream.
    pub fn push_upstream_branch(&self, branch: &str, file: &str, content: &str) {
        let seed = self.seed();
        run_git(&seed, &["checkout", "-B", branch, "master"]);
        commit_file(&seed, file, content, &format!("work on {branch}"));
        run_git(&seed, &["push", "-f", "origin", branch]);
        run_git(&seed, &["checkout", "master"]);
    }

    /// Create a contributor fork `<root>/forks/<user>.git` with `branch`.
    pub fn create_fork(&self, user: &str, branch: &str, file: &str, content: &str) {
        let forks = self.root.path().join("forks");
        std::fs::create_dir_all(&forks).unwrap();
        let fork = forks.join(format!("{user}.git"));
        run_git(
            &forks,
            &[
                "clone",
                "--bare",
                self.upstream().to_str().unwrap(),
                fork.to_str().unwrap(),
            ],
        );
        let seed = self.seed();
        run_git(&seed, &["checkout", "-B", branch, "master"]);
        commit_file(&seed, file, content, &format!("{user} works on {branch}"));
        run_git(&seed, &["push", "-f", fork.to_str().unwrap(), branch]);
        run_git(&seed, &["checkout", "master"]);
    }

    pub fn config(&self) -> Config {
        Config {
            repo_dir: self.repo(),
            castles_dir: self.castles(),
            review_store: self.root.path().join("state").join("reviews.toml"),
            lock_file: self.lock_file(),
            lock_timeout: 10,
            github_user: "Khan".to_string(),
            github_repo: "khan-exercises".to_string(),
            github_api_url: "http://127.0.0.1:9".to_string(),
            project_name: "khan-exercises".to_string(),
            upstream_remote: "origin".to_string(),
            primary_branch: "master".to_string(),
            remote_url_template: format!(
                "{}/forks/{{user}}.git",
                self.root.path().display()
            ),
            arc_binary: "arc".to_string(),
        }
    }

    pub fn git(&self) -> Git {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        Git::for_work_tree(runner, self.repo())
    }

    pub fn lock(&self, timeout: Duration) -> WorkdirLock {
        WorkdirLock::new(self.lock_file(), timeout).with_poll_interval(Duration::from_millis(10))
    }

    pub fn publisher(&self) -> CastlePublisher {
        CastlePublisher::new(self.git(), self.castles())
    }

    pub fn classifier(&self, conduit: FakeConduit) -> ReviewClassifier {
        ReviewClassifier::new(
            Box::new(MemoryReviewStore::new()),
            Box::new(conduit),
            self.git(),
            "khan-exercises",
        )
    }

    pub fn materializer(
        &self,
        conduit: FakeConduit,
        applier: impl PatchApplier + 'static,
        lock_timeout: Duration,
    ) -> PatchMaterializer {
        PatchMaterializer::new(
            self.git(),
            self.classifier(conduit),
            Box::new(applier),
            self.publisher(),
            self.lock(lock_timeout),
            "origin",
            "master",
        )
    }
}

/// Conduit fake answering `differential.getdiff` and `differential.query`.
pub struct FakeConduit {
    pub base_revision: Option<String>,
    pub project_name: Option<String>,
    pub open: Vec<Value>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeConduit {
    pub fn new(base_revision: Option<&str>, project_name: Option<&str>) -> Self {
        Self {
            base_revision: base_revision.map(String::from),
            project_name: project_name.map(String::from),
            open: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn for_project(base_revision: &str) -> Self {
        Self::new(Some(base_revision), Some("khan-exercises"))
    }

    pub fn with_open(mut self, open: Vec<Value>) -> Self {
        self.open = open;
        self
    }
}

impl Conduit for FakeConduit {
    fn call(&self, method: &str, _params: &Value) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match method {
            "differential.getdiff" => Ok(json!({
                "sourceControlBaseRevision": self.base_revision,
                "projectName": self.project_name,
            })),
            "differential.query" => Ok(Value::Array(self.open.clone())),
            other => Err(Error::external("conduit", format!("unexpected method {other}"))),
        }
    }
}

/// Patch applier backed by a closure.
pub struct FnApplier<F>(pub F);

impl<F> PatchApplier for FnApplier<F>
where
    F: Fn(u64, &Path) -> Result<()> + Send + Sync,
{
    fn apply(&self, review_id: u64, work_tree: &Path) -> Result<()> {
        (self.0)(review_id, work_tree)
    }
}

/// Applier that commits `patched-<id>.txt` with `content`.
pub fn committing_applier(
    content: &'static str,
) -> FnApplier<impl Fn(u64, &Path) -> Result<()> + Send + Sync> {
    FnApplier(move |id: u64, work_tree: &Path| -> Result<()> {
        commit_file(work_tree, &format!("patched-{id}.txt"), content, &format!("D{id}"));
        Ok(())
    })
}

/// Pull request source serving canned pull requests and diffs.
pub struct FakePulls {
    pub pulls: Vec<(PullRequest, String)>,
}

impl FakePulls {
    pub fn single(number: u64, label: &str, diff: &str) -> Self {
        let pull = PullRequest {
            number,
            title: format!("Pull {number}"),
            body: Some("Please review <b>this</b>".to_string()),
            diff_url: format!("https://example.invalid/{number}.diff"),
            html_url: format!("https://example.invalid/{number}"),
            head: PullHead {
                label: label.to_string(),
            },
        };
        Self {
            pulls: vec![(pull, diff.to_string())],
        }
    }
}

impl PullRequestSource for FakePulls {
    fn list_open(&self) -> Result<Vec<PullRequest>> {
        Ok(self.pulls.iter().map(|(p, _)| p.clone()).collect())
    }

    fn get(&self, number: u64) -> Result<PullRequest> {
        self.pulls
            .iter()
            .find(|(p, _)| p.number == number)
            .map(|(p, _)| p.clone())
            .ok_or_else(|| Error::NotFound(format!("pull request #{number}")))
    }

    fn diff(&self, pull: &PullRequest) -> Result<String> {
        self.pulls
            .iter()
            .find(|(p, _)| p.number == pull.number)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| Error::NotFound(format!("diff for #{}", pull.number)))
    }
}
