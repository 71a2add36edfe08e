use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

#[cfg(test)]
use mockall::automock;

/// A command that did not complete successfully. Carries whatever output the
/// command produced before failing so callers can still surface it.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("command '{command}' failed: {message}")]
pub struct CommandFailure {
    pub command: String,
    pub output: String,
    pub message: String,
}

/// Runs stage commands through a configured shell.
///
/// The engine never assumes a specific shell; implementations receive the
/// shell invocation via [`configure`](CommandExecutor::configure) and hand
/// each command to it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    fn configure(&mut self, shell: &str);
    async fn execute(&self, command: &str) -> Result<String, CommandFailure>;
}

/// Default executor: splits the configured shell into words and runs
/// `<shell words...> -c <command>`, capturing stdout.
///
/// No timeout is enforced; a hung command hangs the invocation.
#[derive(Debug, Default)]
pub struct ShellExecutor {
    shell: String,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    fn configure(&mut self, shell: &str) {
        self.shell = shell.to_string();
    }

    async fn execute(&self, command: &str) -> Result<String, CommandFailure> {
        let failure = |message: String, output: String| CommandFailure {
            command: command.to_string(),
            output,
            message,
        };

        let mut shell_words = self.shell.split_whitespace();
        let program = shell_words
            .next()
            .ok_or_else(|| failure("no shell configured".to_string(), String::new()))?;

        let output = Command::new(program)
            .args(shell_words)
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|err| failure(err.to_string(), String::new()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stdout = stdout.strip_suffix('\n').unwrap_or(&stdout).to_string();

        if !output.status.success() {
            return Err(failure(format!("exited with {}", output.status), stdout));
        }
        Ok(stdout)
    }
}
