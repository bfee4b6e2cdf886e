//! Script Executor contract types.
//!
//! The executor itself lives in `flowforge-executor`; this crate only
//! defines the shared contract so the engine and the executor can depend
//! on the same types without a circular crate dependency.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Which stream a captured line came from. Intra-stream order is strict;
/// inter-stream order is not guaranteed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// A single captured, line-buffered output line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

impl LogLine {
    pub fn new(stream: LogStream, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            content: content.into(),
        }
    }

    /// Render as `[YYYY-MM-DD HH:MM:SS] <text>`, the tag the Pipeline
    /// Engine's log fan-out applies before publishing to subscribers.
    pub fn tagged(&self) -> String {
        format!(
            "[{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.content
        )
    }
}

/// Interpreter kind a script body should be validated/executed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// POSIX shell (`.sh`, launched via `/bin/sh`).
    Shell,
    /// Windows PowerShell (`.ps1`).
    PowerShell,
}

impl ScriptKind {
    /// The kind appropriate to the host the process is running on.
    pub fn for_host() -> Self {
        if cfg!(windows) {
            ScriptKind::PowerShell
        } else {
            ScriptKind::Shell
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            ScriptKind::Shell => "sh",
            ScriptKind::PowerShell => "ps1",
        }
    }
}

/// Per-call options for `ScriptExecutor::execute`.
pub struct ExecuteOptions {
    pub work_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
    pub cancellation: CancellationToken,
    /// Invoked once per captured line, in source order per stream.
    pub on_line: Box<dyn Fn(LogLine) + Send + Sync>,
}

impl ExecuteOptions {
    pub fn new(timeout: Duration, cancellation: CancellationToken) -> Self {
        Self {
            work_dir: None,
            env: HashMap::new(),
            timeout,
            cancellation,
            on_line: Box::new(|_| {}),
        }
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_on_line(mut self, f: impl Fn(LogLine) + Send + Sync + 'static) -> Self {
        self.on_line = Box::new(f);
        self
    }
}

/// Outcome of `ScriptExecutor::execute`. A non-zero `exit_code` is a
/// normal outcome, not an `Err`; failure to *start* the process is what
/// surfaces as `Result::Err`.
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    pub exit_code: i32,
    pub stdout_blob: String,
    pub stderr_blob: String,
    pub duration: Duration,
    /// Set when the process was terminated by `timeout` rather than
    /// exiting on its own.
    pub timed_out: bool,
}

impl ExecuteResult {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Spawns and supervises one external script process per call. §4.2.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Materialize `script_body`, launch it, stream its output, and wait
    /// for it to terminate (by exit, cancellation, or timeout).
    async fn execute(&self, script_body: &str, opts: ExecuteOptions) -> Result<ExecuteResult>;

    /// Syntax-check `body` without running it.
    async fn validate(&self, body: &str, kind: ScriptKind) -> Result<()>;
}
