//! Pre/post hook execution.

use std::process::Stdio;

use crate::error::HookError;
use crate::remote::Endpoint;

/// Runs operator hook commands, injectable for tests.
pub trait HookRunner {
    fn run(&self, endpoint: &Endpoint, command: &str, log_commands: bool)
    -> Result<(), HookError>;
}

/// Real hook runner: `sh -c` locally, the SSH command remotely.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellHooks;

impl HookRunner for ShellHooks {
    fn run(
        &self,
        endpoint: &Endpoint,
        command: &str,
        log_commands: bool,
    ) -> Result<(), HookError> {
        if log_commands {
            tracing::debug!(endpoint = %endpoint.describe(), command, "running hook");
        }
        let output = endpoint
            .shell_command(command)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| HookError::Spawn {
                command: command.to_string(),
                source,
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(HookError::Failed {
                command: command.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_hook() {
        assert!(ShellHooks.run(&Endpoint::local(), "true", false).is_ok());
    }

    #[test]
    fn failing_hook_reports_status_and_stderr() {
        let err = ShellHooks
            .run(&Endpoint::local(), "echo oops >&2; exit 5", false)
            .unwrap_err();
        match err {
            HookError::Failed { status, stderr, .. } => {
                assert_eq!(status, 5);
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
