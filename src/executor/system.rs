//! Runner backed by real processes.

use super::{Invocation, ProcessOutput, Runner};
use crate::{PassError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Spawns invocations with `tokio::process`.
///
/// stdout and stderr are always captured. stdin is piped only when the
/// invocation carries input.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl Runner for SystemRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PassError::ProgramNotFound(invocation.program.clone())
            } else {
                PassError::Io(e)
            }
        })?;

        if let (Some(mut stdin), Some(input)) = (child.stdin.take(), invocation.stdin.as_ref()) {
            stdin.write_all(input.as_bytes()).await?;
            stdin.flush().await?;
        }

        let output = child.wait_with_output().await?;

        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Checks if a command-line tool is available in PATH.
///
/// # Example
///
/// ```no_run
/// use passmux::executor::check_command_exists;
///
/// #[tokio::main]
/// async fn main() -> passmux::Result<()> {
///     if !check_command_exists("gpg").await? {
///         println!("GnuPG is not installed");
///     }
///     Ok(())
/// }
/// ```
pub async fn check_command_exists(program: &str) -> Result<bool> {
    let status = Command::new("which")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(PassError::Io)?;

    Ok(status.success())
}
