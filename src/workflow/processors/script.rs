//! External script invocation.
//!
//! Detection and tagging are opaque programs. They run as child processes
//! with their output captured, relayed to the log, and returned to the caller
//! as a [`ScriptOutcome`].

use anyhow::{Context, Result, bail};
use log::{info, warn};
use serde::Serialize;
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// How long to keep reading a killed script's pipes.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScriptStep {
    Detection,
    Tagging,
}

impl fmt::Display for ScriptStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptStep::Detection => write!(f, "detection"),
            ScriptStep::Tagging => write!(f, "tagging"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptOutcome {
    pub step: ScriptStep,
    pub command: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ScriptOutcome {
    /// One-line reason for a failed run, `None` when the script succeeded.
    pub fn failure_reason(&self) -> Option<String> {
        if self.success {
            return None;
        }
        let reason = if self.timed_out {
            format!("{} step `{}` timed out", self.step, self.command)
        } else {
            match self.exit_code {
                Some(code) => format!("{} step `{}` exited with code {}", self.step, self.command, code),
                None => format!("{} step `{}` was terminated by a signal", self.step, self.command),
            }
        };
        Some(reason)
    }
}

/// A script invocation: the command line plus where and with what environment it runs.
pub struct ScriptInvocation<'a> {
    pub step: ScriptStep,
    pub command: &'a [String],
    pub working_dir: &'a Path,
    pub envs: Vec<(&'static str, OsString)>,
    pub timeout: Option<Duration>,
}

/// Runs the script to completion (or timeout) and captures its output.
///
/// Returns `Err` only when the process cannot be started at all; a non-zero
/// exit or a timeout is reported through the outcome.
pub async fn run_script(invocation: ScriptInvocation<'_>) -> Result<ScriptOutcome> {
    let Some((program, args)) = invocation.command.split_first() else {
        bail!("{} command is empty", invocation.step);
    };
    let command_line = invocation.command.join(" ");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(invocation.working_dir)
        .envs(invocation.envs)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    info!("Running {} step: {}", invocation.step, command_line);
    let start_time = Instant::now();
    let mut child = cmd.spawn().with_context(|| {
        format!("Failed to start {} step `{}`", invocation.step, command_line)
    })?;
    let stdout = CapturedPipe::spawn(child.stdout.take());
    let stderr = CapturedPipe::spawn(child.stderr.take());

    let wait_error = || format!("Failed to wait for {} step `{}`", invocation.step, command_line);
    let status = match invocation.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => Some(status.with_context(wait_error)?),
            Err(_) => {
                if let Err(err) = child.kill().await {
                    warn!("Failed to kill timed out {} step: {}", invocation.step, err);
                }
                None
            }
        },
        None => Some(child.wait().await.with_context(wait_error)?),
    };

    // A killed script may leave children holding its pipes open.
    let drain_limit = if status.is_some() { None } else { Some(PIPE_DRAIN_GRACE) };
    let stdout = stdout.finish(drain_limit).await;
    let stderr = stderr.finish(drain_limit).await;
    let duration = start_time.elapsed();

    let outcome = ScriptOutcome {
        step: invocation.step,
        command: command_line,
        exit_code: status.and_then(|status| status.code()),
        success: status.is_some_and(|status| status.success()),
        timed_out: status.is_none(),
        stdout,
        stderr,
        duration_ms: duration.as_millis() as u64,
    };

    relay_output(&outcome);
    match outcome.failure_reason() {
        None => info!(duration = &*format!("{:?}", duration);
            "{} step finished",
            outcome.step
        ),
        Some(reason) => warn!(duration = &*format!("{:?}", duration); "{}", reason),
    }

    Ok(outcome)
}

/// Collects a child's output stream in the background, so whatever was written
/// before a timeout is still available.
struct CapturedPipe {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl CapturedPipe {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = buffer.clone();
        let task = tokio::spawn(async move {
            let Some(mut pipe) = pipe else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(&chunk[..n]),
                }
            }
        });
        Self { buffer, task }
    }

    /// Waits for end of stream, or at most `limit`, and returns what was read.
    async fn finish(self, limit: Option<Duration>) -> String {
        let mut task = self.task;
        match limit {
            Some(limit) => {
                if tokio::time::timeout(limit, &mut task).await.is_err() {
                    task.abort();
                }
            }
            None => {
                let _ = (&mut task).await;
            }
        }
        let bytes = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn relay_output(outcome: &ScriptOutcome) {
    let stdout = outcome.stdout.trim_end();
    if !stdout.is_empty() {
        info!("[{} stdout]\n{}", outcome.step, stdout);
    }
    let stderr = outcome.stderr.trim_end();
    if !stderr.is_empty() {
        warn!("[{} stderr]\n{}", outcome.step, stderr);
    }
}
