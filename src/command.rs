use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("failed to run {program}: {source}")]
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} timed out after {timeout_ms}ms")]
    TimedOut { program: String, timeout_ms: u128 },
    #[error("{program} exited with {status}{}", format_output(.output))]
    Failed {
        program: String,
        status: std::process::ExitStatus,
        output: String,
    },
}

fn format_output(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!(": {output}")
    }
}

// ---------------------------------------------------------------------------
// Command line parsing
// ---------------------------------------------------------------------------

/// A program plus the leading arguments configured for it, e.g. `sudo chronyc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn parse(command: &str) -> Result<Self, CommandError> {
        let words = shell_words::split(command)
            .map_err(|e| CommandError::InvalidCommand(format!("failed to parse: {e}")))?;

        let Some((program, args)) = words.split_first() else {
            return Err(CommandError::InvalidCommand("command is empty".to_string()));
        };

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// Full argument list with `extra` appended after the configured arguments.
    pub fn args_with(&self, extra: &[&str]) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend(extra.iter().map(|s| s.to_string()));
        args
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Result of one external invocation. Exactly one of the two fields is
/// meaningful: `output` on success, `error` on failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub error: String,
}

impl CommandOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: String::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

impl From<Result<String, CommandError>> for CommandOutput {
    fn from(result: Result<String, CommandError>) -> Self {
        match result {
            Ok(output) => CommandOutput::success(output),
            Err(e) => CommandOutput::failure(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Runs the diagnostic tool. Implementations never fail outright: every
/// problem is reported through [`CommandOutput::error`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, args: &[&str]) -> CommandOutput;
}

/// Runs a real executable with a per-invocation timeout.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    command: CommandLine,
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(command: CommandLine, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub async fn run_checked(&self, extra: &[&str]) -> Result<String, CommandError> {
        let program = &self.command.program;
        let args = self.command.args_with(extra);
        tracing::debug!(program = %program, ?args, "running command");

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| CommandError::SpawnFailed {
            program: program.clone(),
            source,
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| CommandError::SpawnFailed {
                program: program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(CommandError::TimedOut {
                    program: program.clone(),
                    timeout_ms: self.timeout.as_millis(),
                });
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();

        if output.status.success() {
            Ok(combined)
        } else {
            Err(CommandError::Failed {
                program: program.clone(),
                status: output.status,
                output: combined,
            })
        }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, args: &[&str]) -> CommandOutput {
        let result = self.run_checked(args).await;
        if let Err(ref e) = result {
            tracing::debug!(args = ?args, error = %e, "command failed");
        }
        result.into()
    }
}
