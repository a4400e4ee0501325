use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cli::Cli;
use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = "sandcastle.toml";

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub repo_dir: Option<String>,
    pub castles_dir: Option<String>,
    pub review_store: Option<String>,
    pub lock_file: Option<String>,
    pub lock_timeout: Option<u64>,
    pub github_user: Option<String>,
    pub github_repo: Option<String>,
    pub github_api_url: Option<String>,
    pub project_name: Option<String>,
    pub upstream_remote: Option<String>,
    pub primary_branch: Option<String>,
    pub remote_url_template: Option<String>,
    pub arc_binary: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub repo_dir: PathBuf,
    pub castles_dir: PathBuf,
    pub review_store: PathBuf,
    pub lock_file: PathBuf,
    pub lock_timeout: u64,
    pub github_user: String,
    pub github_repo: String,
    pub github_api_url: String,
    pub project_name: String,
    pub upstream_remote: String,
    pub primary_branch: String,
    pub remote_url_template: String,
    pub arc_binary: String,
}

impl Config {
    /// Load the config file (if any) and apply CLI overrides.
    ///
    /// An explicitly named file must exist; the default path is optional.
    pub fn load(cli: &Cli) -> Result<Self> {
        let file_config = match &cli.config {
            Some(path) => {
                let path = Path::new(path);
                if !path.exists() {
                    return Err(Error::ConfigNotFound(path.to_path_buf()));
                }
                parse_config(&std::fs::read_to_string(path)?)?
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    parse_config(&std::fs::read_to_string(path)?)?
                } else {
                    ConfigFile::default()
                }
            }
        };

        let config = merge(file_config, cli)?;
        validate_merged(&config)?;
        Ok(config)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout)
    }

    pub fn git_dir(&self) -> PathBuf {
        self.repo_dir.join(".git")
    }

    /// Fetch URL for a contributor's fork.
    pub fn remote_url(&self, user: &str) -> String {
        self.remote_url_template
            .replace("{user}", user)
            .replace("{repo}", &self.github_repo)
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ConfigFile) -> Result<()> {
    if let Some(timeout) = config.lock_timeout
        && timeout == 0
    {
        return Err(Error::ConfigValidation(
            "lock_timeout must be > 0".to_string(),
        ));
    }
    if let Some(ref template) = config.remote_url_template
        && !template.contains("{user}")
    {
        return Err(Error::ConfigValidation(format!(
            "remote_url_template must contain {{user}}: {template}"
        )));
    }
    for (field, value) in [
        ("github_user", &config.github_user),
        ("github_repo", &config.github_repo),
        ("project_name", &config.project_name),
        ("upstream_remote", &config.upstream_remote),
        ("primary_branch", &config.primary_branch),
    ] {
        if let Some(v) = value
            && v.trim().is_empty()
        {
            return Err(Error::ConfigValidation(format!("{field} must not be empty")));
        }
    }
    Ok(())
}

fn validate_merged(config: &Config) -> Result<()> {
    if config.lock_timeout == 0 {
        return Err(Error::ConfigValidation(
            "lock_timeout must be > 0".to_string(),
        ));
    }
    crate::git::validate_branch_name(&config.primary_branch)
        .map_err(|e| Error::ConfigValidation(format!("primary_branch: {e}")))?;
    crate::git::validate_user_name(&config.upstream_remote)
        .map_err(|e| Error::ConfigValidation(format!("upstream_remote: {e}")))?;
    Ok(())
}

/// Resolve against the current directory. Git is run with the work tree as
/// its cwd, so a relative path would otherwise be resolved twice.
fn absolute(path: impl AsRef<Path>) -> Result<PathBuf> {
    std::path::absolute(path.as_ref()).map_err(|e| {
        Error::ConfigValidation(format!("cannot resolve {}: {e}", path.as_ref().display()))
    })
}

pub fn merge(file: ConfigFile, cli: &Cli) -> Result<Config> {
    let repo_dir = absolute(
        cli.repo_dir
            .clone()
            .or(file.repo_dir)
            .unwrap_or_else(|| "media/repo".to_string()),
    )?;
    let lock_file = match file.lock_file {
        Some(path) => absolute(path)?,
        None => repo_dir.join(".git").join("sandcastle.lock"),
    };

    Ok(Config {
        castles_dir: absolute(
            cli.castles_dir
                .clone()
                .or(file.castles_dir)
                .unwrap_or_else(|| "media/castles".to_string()),
        )?,
        review_store: absolute(
            file.review_store
                .unwrap_or_else(|| ".sandcastle/reviews.toml".to_string()),
        )?,
        lock_file,
        lock_timeout: cli.lock_timeout.or(file.lock_timeout).unwrap_or(300),
        github_user: file.github_user.unwrap_or_else(|| "Khan".to_string()),
        github_repo: file
            .github_repo
            .unwrap_or_else(|| "khan-exercises".to_string()),
        github_api_url: file
            .github_api_url
            .unwrap_or_else(|| "https://api.github.com".to_string()),
        project_name: file
            .project_name
            .unwrap_or_else(|| "khan-exercises".to_string()),
        upstream_remote: file
            .upstream_remote
            .unwrap_or_else(|| "origin".to_string()),
        primary_branch: cli
            .primary_branch
            .clone()
            .or(file.primary_branch)
            .unwrap_or_else(|| "master".to_string()),
        remote_url_template: file
            .remote_url_template
            .unwrap_or_else(|| "https://github.com/{user}/{repo}.git".to_string()),
        arc_binary: file.arc_binary.unwrap_or_else(|| "arc".to_string()),
        repo_dir,
    })
}
