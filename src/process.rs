use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{Error, Result};

/// Output from a completed child process.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Abstraction over subprocess execution for testability.
///
/// Implementations run `program` with `args` in `cwd`, optionally feeding
/// `stdin`, and block until it exits. A non-zero exit is not an error here;
/// only failure to spawn or wait is.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput>;
}

/// Runs commands with `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput> {
        debug!(program, ?args, cwd = %cwd.display(), "running command");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::external(program, format!("failed to spawn: {e}")))?;

        if let Some(data) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(data)
                .map_err(|e| Error::external(program, format!("failed to write stdin: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| Error::external(program, format!("wait error: {e}")))?;

        Ok(CommandOutput {
            code: exit_code(&output.status),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

fn exit_code(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn test_captures_stdout_and_code() {
        let out = SystemRunner
            .run("sh", &["-c", "echo hello; exit 3"], Path::new("."), None)
            .unwrap();
        assert_eq!(out.code, 3);
        assert!(!out.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout), "hello\n");
    }

    #[test]
    #[cfg(unix)]
    fn test_feeds_stdin() {
        let out = SystemRunner
            .run("cat", &[], Path::new("."), Some(b"{\"a\": 1}"))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, b"{\"a\": 1}");
    }

    #[test]
    #[cfg(unix)]
    fn test_stderr_lossy_trims() {
        let out = SystemRunner
            .run("sh", &["-c", "echo oops >&2"], Path::new("."), None)
            .unwrap();
        assert_eq!(out.stderr_lossy(), "oops");
    }

    #[test]
    fn test_spawn_failure() {
        let err = SystemRunner
            .run("nonexistent_binary_xyz_123", &[], Path::new("."), None)
            .unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
