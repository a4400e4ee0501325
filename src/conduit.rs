use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};
use crate::process::CommandRunner;

/// Metadata about the latest diff of a review.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffInfo {
    pub base_revision: Option<String>,
    pub project_name: Option<String>,
}

/// An open review as listed by `differential.query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenReview {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub uri: String,
}

#[derive(Debug, Deserialize)]
struct RawDiff {
    #[serde(rename = "sourceControlBaseRevision", default)]
    base_revision: Option<String>,
    #[serde(rename = "projectName", default)]
    project_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    id: Value,
    #[serde(default)]
    title: String,
    #[serde(default)]
    uri: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Abstraction over the review system's API for testability.
pub trait Conduit: Send + Sync {
    /// Call a conduit method and return the unwrapped `response` value.
    fn call(&self, method: &str, params: &Value) -> Result<Value>;

    fn diff_info(&self, review_id: u64) -> Result<DiffInfo> {
        let response = self.call(
            "differential.getdiff",
            &json!({ "revision_id": review_id.to_string() }),
        )?;
        let raw: RawDiff = serde_json::from_value(response)
            .map_err(|e| Error::external("conduit", format!("unexpected diff payload: {e}")))?;
        Ok(DiffInfo {
            base_revision: non_empty(raw.base_revision),
            project_name: non_empty(raw.project_name),
        })
    }

    fn open_reviews(&self) -> Result<Vec<OpenReview>> {
        let response = self.call("differential.query", &json!({ "status": "status-open" }))?;
        let raw: Vec<RawReview> = serde_json::from_value(response)
            .map_err(|e| Error::external("conduit", format!("unexpected query payload: {e}")))?;
        raw.into_iter()
            .map(|r| {
                let id = match &r.id {
                    Value::Number(n) => n.as_u64(),
                    Value::String(s) => s.parse().ok(),
                    _ => None,
                }
                .ok_or_else(|| Error::external("conduit", format!("bad review id: {}", r.id)))?;
                Ok(OpenReview {
                    id,
                    title: r.title,
                    uri: r.uri,
                })
            })
            .collect()
    }
}

/// Conduit client that shells out to `arc call-conduit <method>`.
pub struct ArcConduit {
    runner: Arc<dyn CommandRunner>,
    arc_binary: String,
    working_dir: PathBuf,
}

impl ArcConduit {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        arc_binary: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            arc_binary: arc_binary.into(),
            working_dir: working_dir.into(),
        }
    }
}

impl Conduit for ArcConduit {
    fn call(&self, method: &str, params: &Value) -> Result<Value> {
        let body = serde_json::to_vec(params)
            .map_err(|e| Error::external("conduit", format!("failed to encode params: {e}")))?;
        debug!(method, "calling conduit");

        let output = self.runner.run(
            &self.arc_binary,
            &["call-conduit", method],
            &self.working_dir,
            Some(&body),
        )?;
        if !output.success() {
            return Err(Error::external(
                "conduit",
                format!(
                    "arc call-conduit {method} exited with code {}: {}",
                    output.code,
                    output.stderr_lossy()
                ),
            ));
        }

        unwrap_envelope(method, &output.stdout)
    }
}

/// Unwrap `{"error": ..., "errorMessage": ..., "response": ...}`.
fn unwrap_envelope(method: &str, stdout: &[u8]) -> Result<Value> {
    let envelope: Value = serde_json::from_slice(stdout)
        .map_err(|e| Error::external("conduit", format!("invalid JSON from {method}: {e}")))?;

    if let Some(err) = envelope.get("error").filter(|v| !v.is_null()) {
        let message = envelope
            .get("errorMessage")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(Error::external(
            "conduit",
            format!("{method} returned {err}: {message}"),
        ));
    }

    envelope
        .get("response")
        .cloned()
        .ok_or_else(|| Error::external("conduit", format!("{method} response missing")))
}
