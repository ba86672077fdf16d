//! Command Runner: external programs with a hard timeout
//!
//! Every subprocess the warden spawns goes through [`CommandRunner`]. The
//! contract is uniform: success yields trimmed stdout, every failure path
//! (non-zero exit, timeout, missing binary, spawn error) yields a
//! [`CommandError`]. Nothing here panics or leaks a child past its timeout;
//! children are spawned with `kill_on_drop` so an elapsed timeout reaps them.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Characters of stderr kept on a non-zero exit.
const STDERR_TAIL_CHARS: usize = 200;

/// Exit code POSIX shells use for "command not found".
const SHELL_NOT_FOUND: i32 = 127;

/// One external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Run `program` + `args` joined by spaces through `sh -c`
    pub use_shell: bool,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            use_shell: false,
        }
    }

    /// Build from an argv slice (`["openclaw", "gateway", "status"]`).
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.iter().cloned()))
    }

    /// Same command with extra trailing arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(extra.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn via_shell(mut self) -> Self {
        self.use_shell = true;
        self
    }

    /// Space-joined rendering for logs and shell execution.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Why a command did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("command failed: {stderr_tail}")]
    NonZeroExit { code: Option<i32>, stderr_tail: String },
    #[error("command timed out ({secs}s)")]
    Timeout { secs: u64 },
    #[error("command not found: {program}")]
    NotFound { program: String },
    #[error("execution error: {0}")]
    Spawn(String),
}

impl CommandError {
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Executes external commands.
///
/// Implemented by [`SystemRunner`] for real processes; tests substitute a
/// scripted runner.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec`, returning trimmed stdout on exit status 0.
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> Result<String, CommandError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec, timeout: Duration) -> Result<String, CommandError> {
        let mut cmd = if spec.use_shell {
            let mut c = Command::new("sh");
            c.arg("-c").arg(spec.command_line());
            c
        } else {
            let mut c = Command::new(&spec.program);
            c.args(&spec.args);
            c
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %spec, timeout_secs = timeout.as_secs(), "Running command");

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => {
                return Err(CommandError::Timeout {
                    secs: timeout.as_secs(),
                })
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CommandError::NotFound {
                    program: spec.program.clone(),
                })
            }
            Ok(Err(e)) => return Err(CommandError::Spawn(truncate_chars(&e.to_string(), STDERR_TAIL_CHARS))),
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let code = output.status.code();
        if spec.use_shell && code == Some(SHELL_NOT_FOUND) {
            return Err(CommandError::NotFound {
                program: spec.program.clone(),
            });
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(CommandError::NonZeroExit {
            code,
            stderr_tail: tail_chars(stderr.trim(), STDERR_TAIL_CHARS),
        })
    }
}

/// Last `max` characters of `s`, respecting char boundaries.
pub fn tail_chars(s: &str, max: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(max)).collect()
}

/// First `max` characters of `s`, respecting char boundaries.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
