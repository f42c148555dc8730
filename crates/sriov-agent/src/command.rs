//! Host command execution

use crate::error::AgentError;
use tracing::debug;

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, -1 when terminated by a signal
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs programs on the host.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, AgentError>;
}

/// Runs commands with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostCommandRunner;

#[async_trait::async_trait]
impl CommandRunner for HostCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, AgentError> {
        debug!(program, ?args, "running host command");
        let output = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| AgentError::Command {
                command: render(program, args),
                message: e.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Runs a command and turns a non-zero exit into an error.
pub async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
) -> Result<CommandOutput, AgentError> {
    let output = runner.run(program, args).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(AgentError::Command {
            command: render(program, args),
            message: format!("exit code {}: {}", output.code, output.stderr.trim()),
        })
    }
}

fn render(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_joins_program_and_args() {
        let args = vec!["/host".to_string(), "systemctl".to_string(), "reboot".to_string()];
        assert_eq!(render("chroot", &args), "chroot /host systemctl reboot");
    }

    #[tokio::test]
    async fn test_host_runner_reports_exit_code() {
        let ok = HostCommandRunner.run("true", &[]).await.unwrap();
        assert!(ok.success());

        let err = run_checked(&HostCommandRunner, "false", &[]).await;
        assert!(matches!(err, Err(AgentError::Command { .. })));
    }
}
