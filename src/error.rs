use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git {args} exited with code {code}: {stderr}")]
    GitCommand {
        args: String,
        code: i32,
        stderr: String,
    },

    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("timed out after {waited:?} waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("state error: {0}")]
    State(String),

    #[error("render error: {0}")]
    Render(String),
}

impl Error {
    pub fn external(tool: &str, message: impl Into<String>) -> Self {
        Error::ExternalTool {
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    /// HTTP-equivalent status for a front end rendering this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::Forbidden(_) => 403,
            _ => 500,
        }
    }

    /// Process exit code used by the binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::NotFound(_) => 2,
            Error::Forbidden(_) => 3,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
