//! Timeout-bounded execution of a single job attempt.
//!
//! The command line is opaque to the queue: it is handed to the platform
//! shell, stdout/stderr are captured as text, and the whole attempt is
//! bounded by the job's wall-clock timeout. On expiry the child is killed
//! rather than waited out.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

/// How one execution attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Exit code 0. `stdout` is captured with surrounding whitespace
    /// trimmed.
    Succeeded { stdout: String, elapsed: f64 },
    /// Non-zero exit code.
    Failed {
        exit_code: i32,
        stderr: String,
        elapsed: f64,
    },
    /// The wall-clock limit expired and the child was killed.
    TimedOut { timeout_secs: i64, elapsed: f64 },
    /// The subprocess could not be spawned or its output could not be read.
    SpawnFailed { message: String, elapsed: f64 },
}

impl AttemptOutcome {
    /// Wall-clock duration of the attempt, in seconds.
    pub fn elapsed(&self) -> f64 {
        match self {
            AttemptOutcome::Succeeded { elapsed, .. }
            | AttemptOutcome::Failed { elapsed, .. }
            | AttemptOutcome::TimedOut { elapsed, .. }
            | AttemptOutcome::SpawnFailed { elapsed, .. } => *elapsed,
        }
    }

    /// Diagnostic recorded against the job, or `None` for a success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            AttemptOutcome::Succeeded { .. } => None,
            AttemptOutcome::Failed {
                exit_code, stderr, ..
            } => Some(if stderr.is_empty() {
                format!("Exit code {exit_code}")
            } else {
                format!("Exit code {exit_code}: {stderr}")
            }),
            AttemptOutcome::TimedOut { timeout_secs, .. } => {
                Some(format!("Timeout exceeded ({timeout_secs}s)"))
            }
            AttemptOutcome::SpawnFailed { message, .. } => Some(format!("Exception: {message}")),
        }
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Run `command` through the shell, bounded by `timeout_secs` of wall-clock
/// time.
pub async fn run_attempt(command: &str, timeout_secs: i64) -> AttemptOutcome {
    let started = Instant::now();

    let mut cmd = shell_command(command);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Dropping the wait future on timeout must take the child with it.
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return AttemptOutcome::SpawnFailed {
                message: e.to_string(),
                elapsed: started.elapsed().as_secs_f64(),
            }
        }
    };

    let limit = Duration::from_secs(timeout_secs.max(0) as u64);
    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let elapsed = started.elapsed().as_secs_f64();
            if output.status.success() {
                AttemptOutcome::Succeeded {
                    stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                    elapsed,
                }
            } else {
                AttemptOutcome::Failed {
                    exit_code: output.status.code().unwrap_or(-1),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    elapsed,
                }
            }
        }
        Ok(Err(e)) => AttemptOutcome::SpawnFailed {
            message: e.to_string(),
            elapsed: started.elapsed().as_secs_f64(),
        },
        Err(_) => AttemptOutcome::TimedOut {
            timeout_secs,
            elapsed: started.elapsed().as_secs_f64(),
        },
    }
}
