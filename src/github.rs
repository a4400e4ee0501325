use std::io::Read as _;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("sandcastle/", env!("CARGO_PKG_VERSION"));
const TOKEN_ENV: &str = "GITHUB_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullHead {
    /// `<user>:<branch>`
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub diff_url: String,
    pub html_url: String,
    pub head: PullHead,
}

impl PullRequest {
    /// Split `head.label` into `(user, branch)`.
    pub fn owner_and_branch(&self) -> Result<(&str, &str)> {
        self.head
            .label
            .split_once(':')
            .filter(|(user, branch)| !user.is_empty() && !branch.is_empty())
            .ok_or_else(|| {
                Error::external(
                    "github",
                    format!("malformed head label: {:?}", self.head.label),
                )
            })
    }
}

/// Source of pull requests, abstracted for testability.
pub trait PullRequestSource: Send + Sync {
    fn list_open(&self) -> Result<Vec<PullRequest>>;

    /// Unknown pull requests are [`Error::NotFound`].
    fn get(&self, number: u64) -> Result<PullRequest>;

    /// Raw unified diff of a pull request.
    fn diff(&self, pull: &PullRequest) -> Result<String>;
}

/// GitHub REST client over `ureq`.
pub struct GitHubPulls {
    api_url: String,
    user: String,
    repo: String,
    token: Option<String>,
}

impl GitHubPulls {
    pub fn new(config: &Config) -> Self {
        Self {
            api_url: config.github_api_url.trim_end_matches('/').to_string(),
            user: config.github_user.clone(),
            repo: config.github_repo.clone(),
            token: std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()),
        }
    }

    fn pulls_url(&self) -> String {
        format!("{}/repos/{}/{}/pulls", self.api_url, self.user, self.repo)
    }

    /// One GET per call. Failures are returned to the caller, never retried.
    fn get_response(&self, url: &str) -> std::result::Result<ureq::Response, ureq::Error> {
        let mut request = ureq::get(url).set("User-Agent", USER_AGENT);
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        request.call()
    }
}

fn http_error(url: &str, err: ureq::Error) -> Error {
    match err {
        ureq::Error::Status(404, _) => Error::NotFound(format!("{url} returned 404")),
        other => Error::external("github", format!("GET {url} failed: {other}")),
    }
}

impl PullRequestSource for GitHubPulls {
    fn list_open(&self) -> Result<Vec<PullRequest>> {
        let url = format!("{}?per_page=100", self.pulls_url());
        debug!(%url, "listing pull requests");
        let response = self.get_response(&url).map_err(|e| http_error(&url, e))?;
        response
            .into_json()
            .map_err(|e| Error::external("github", format!("failed to parse pull list: {e}")))
    }

    fn get(&self, number: u64) -> Result<PullRequest> {
        let url = format!("{}/{number}", self.pulls_url());
        debug!(%url, "fetching pull request");
        let response = self.get_response(&url).map_err(|e| match http_error(&url, e) {
            Error::NotFound(_) => Error::NotFound(format!("pull request #{number}")),
            other => other,
        })?;
        response
            .into_json()
            .map_err(|e| Error::external("github", format!("failed to parse pull request: {e}")))
    }

    fn diff(&self, pull: &PullRequest) -> Result<String> {
        let url = &pull.diff_url;
        let response = self.get_response(url).map_err(|e| http_error(url, e))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| Error::external("github", format!("failed to read diff: {e}")))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
