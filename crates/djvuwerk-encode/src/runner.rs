// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// External tool runner.
//
// Every encoder is an opaque subprocess. The runner spawns it, follows its
// stdout for `[NN%]` progress markers, and kills it as soon as the run is
// cancelled. A non-zero exit is reported with the tail of stderr.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use djvuwerk_core::error::{PublishError, Result};

/// How much of stderr is kept for the error message.
const STDERR_TAIL_BYTES: usize = 2048;

/// One command line for an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Short tool name used in logs and errors (`c44`, `minidjvu`, ...).
    pub tool: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Working directory; the caller's when `None`.
    pub cwd: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Printable command line, for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Parse an encoder progress line of the form `[42%]` or `[42.5%]`.
pub fn parse_progress_marker(line: &str) -> Option<f32> {
    let value = line.trim().strip_prefix('[')?.strip_suffix("%]")?;
    value.trim().parse::<f32>().ok().filter(|v| v.is_finite())
}

/// Run `invocation` to completion.
pub async fn run(invocation: &ToolInvocation, cancel: &CancellationToken) -> Result<()> {
    run_with_progress(invocation, cancel, |_| {}).await
}

/// Run `invocation`, passing every progress marker found on stdout to
/// `on_progress`.
///
/// Returns `Cancelled` if `cancel` fires before the process exits; the
/// process is killed and reaped first.
pub async fn run_with_progress<F>(
    invocation: &ToolInvocation,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<()>
where
    F: FnMut(f32),
{
    if cancel.is_cancelled() {
        return Err(PublishError::Cancelled);
    }

    let tool = invocation.tool.as_str();
    debug!(tool, command = %invocation.command_line(), "starting tool");

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &invocation.cwd {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|e| {
        PublishError::tool(
            tool,
            format!("cannot launch {}: {e}", invocation.program.display()),
        )
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PublishError::tool(tool, "stdout was not captured"))?;
    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        })
    });

    let mut lines = BufReader::new(stdout).lines();
    let mut stdout_open = true;

    let status = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                warn!(tool, "cancelled, killing process");
                let _ = child.start_kill();
                let _ = child.wait().await;
                if let Some(task) = stderr_task {
                    task.abort();
                }
                return Err(PublishError::Cancelled);
            }
            line = lines.next_line(), if stdout_open => match line {
                Ok(Some(line)) => {
                    trace!(tool, line = %line, "tool output");
                    if let Some(progress) = parse_progress_marker(&line) {
                        on_progress(progress);
                    }
                }
                Ok(None) => stdout_open = false,
                Err(e) => {
                    debug!(tool, error = %e, "stdout no longer readable");
                    stdout_open = false;
                }
            },
            status = child.wait() => {
                break status.map_err(|e| PublishError::tool(tool, format!("wait failed: {e}")))?;
            }
        }
    };

    if status.success() {
        debug!(tool, "tool finished");
        return Ok(());
    }

    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };
    let detail = match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_owned(),
    };
    let tail = stderr_tail(&stderr);
    Err(PublishError::tool(
        tool,
        if tail.is_empty() {
            detail
        } else {
            format!("{detail}: {tail}")
        },
    ))
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_owned()
}
