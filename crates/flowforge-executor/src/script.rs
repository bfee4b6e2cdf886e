//! Script Executor: spawns an external shell process with streamed
//! stdout/stderr capture, environment injection, and time-bounded
//! supervision. §4.2.

use async_trait::async_trait;
use flowforge_core::script::{ExecuteOptions, ExecuteResult, LogLine, LogStream, ScriptExecutor as ScriptExecutorTrait, ScriptKind};
use flowforge_core::{Error, Result};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info_span, Instrument};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Canonical builtin scripts keyed by name, §4.2. The engine resolves
/// `build`/`deploy` steps to one of these and runs it exactly like a
/// user-supplied `script` step.
pub fn builtin_recipe(name: &str) -> Option<&'static str> {
    match name {
        "node_build" => Some("set -e\nnpm ci\nnpm run build\n"),
        "go_build" => Some("set -e\ngo build -o app ./...\n"),
        "docker_build" => Some("set -e\ndocker build -t \"${PROJECT_NAME}:${BUILD_VERSION}\" .\n"),
        "deploy_script" => Some("set -e\necho \"deploying ${PROJECT_NAME} ${BUILD_VERSION}\"\n"),
        _ => None,
    }
}

/// Subprocess-based `ScriptExecutor`. Each call is independent; there is
/// no global mutex, matching §4.2's concurrency note.
pub struct LocalScriptExecutor {
    temp_dir: std::path::PathBuf,
}

impl LocalScriptExecutor {
    pub fn new(temp_dir: impl Into<std::path::PathBuf>) -> Self {
        Self { temp_dir: temp_dir.into() }
    }

    fn interpreter_for(kind: ScriptKind) -> (&'static str, Vec<&'static str>) {
        match kind {
            ScriptKind::Shell => ("/bin/sh", vec![]),
            ScriptKind::PowerShell => ("pwsh", vec!["-NoProfile", "-File"]),
        }
    }
}

#[async_trait]
impl ScriptExecutorTrait for LocalScriptExecutor {
    async fn execute(&self, script_body: &str, opts: ExecuteOptions) -> Result<ExecuteResult> {
        let kind = ScriptKind::for_host();
        let file_name = format!("flowforge-script-{}.{}", uuid::Uuid::now_v7(), kind.file_extension());
        let script_path = self.temp_dir.join(file_name);

        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(|e| Error::Internal(format!("creating script temp dir: {e}")))?;
        tokio::fs::write(&script_path, script_body)
            .await
            .map_err(|e| Error::Internal(format!("writing script file: {e}")))?;

        #[cfg(unix)]
        {
            let mut perms = tokio::fs::metadata(&script_path)
                .await
                .map_err(|e| Error::Internal(format!("stat script file: {e}")))?
                .permissions();
            perms.set_mode(0o755);
            tokio::fs::set_permissions(&script_path, perms)
                .await
                .map_err(|e| Error::Internal(format!("chmod script file: {e}")))?;
        }

        let result = self.run(&script_path, kind, opts).await;

        let _ = tokio::fs::remove_file(&script_path).await;
        result
    }

    async fn validate(&self, body: &str, kind: ScriptKind) -> Result<()> {
        let check = match kind {
            ScriptKind::Shell => {
                let mut cmd = Command::new("/bin/sh");
                cmd.arg("-n").arg("-c").arg(body);
                cmd
            }
            ScriptKind::PowerShell => {
                let mut cmd = Command::new("pwsh");
                cmd.arg("-NoProfile").arg("-Command").arg(format!(
                    "[System.Management.Automation.Language.Parser]::ParseInput(@'\n{body}\n'@, [ref]$null, [ref]$errors) | Out-Null; if ($errors) {{ exit 1 }}"
                ));
                cmd
            }
        };
        let mut cmd = check;
        let output = cmd
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::Internal(format!("invoking interpreter for validation: {e}")))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Validation(String::from_utf8_lossy(&output.stderr).into_owned()))
        }
    }
}

impl LocalScriptExecutor {
    async fn run(&self, script_path: &std::path::Path, kind: ScriptKind, opts: ExecuteOptions) -> Result<ExecuteResult> {
        let (interpreter, extra_args) = Self::interpreter_for(kind);
        let mut cmd = Command::new(interpreter);
        cmd.args(&extra_args).arg(script_path);
        if let Some(dir) = &opts.work_dir {
            cmd.current_dir(dir);
        }
        for (k, v) in &opts.env {
            cmd.env(k, v);
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

        let span = info_span!("script_executor.execute", script = %script_path.display());
        async move {
            let start = Instant::now();
            let mut child = cmd
                .spawn()
                .map_err(|e| Error::Internal(format!("failed to start process: {e}")))?;

            let stdout = child.stdout.take().expect("piped stdout");
            let stderr = child.stderr.take().expect("piped stderr");

            let on_line = &opts.on_line;
            let mut stdout_blob = String::new();
            let mut stderr_blob = String::new();

            let mut stdout_lines = BufReader::new(stdout).lines();
            let mut stderr_lines = BufReader::new(stderr).lines();

            let mut stdout_done = false;
            let mut stderr_done = false;
            let mut timed_out = false;

            loop {
                if stdout_done && stderr_done {
                    break;
                }
                tokio::select! {
                    biased;
                    _ = opts.cancellation.cancelled(), if !stdout_done || !stderr_done => {
                        let _ = child.start_kill();
                        timed_out = true;
                        break;
                    }
                    _ = tokio::time::sleep(opts.timeout.saturating_sub(start.elapsed())), if !stdout_done || !stderr_done => {
                        let _ = child.start_kill();
                        timed_out = true;
                        break;
                    }
                    line = stdout_lines.next_line(), if !stdout_done => {
                        match line {
                            Ok(Some(text)) => {
                                let log = LogLine::new(LogStream::Stdout, text);
                                stdout_blob.push_str(&log.tagged());
                                stdout_blob.push('\n');
                                on_line(log);
                            }
                            _ => stdout_done = true,
                        }
                    }
                    line = stderr_lines.next_line(), if !stderr_done => {
                        match line {
                            Ok(Some(text)) => {
                                let log = LogLine::new(LogStream::Stderr, text);
                                stderr_blob.push_str(&log.tagged());
                                stderr_blob.push('\n');
                                on_line(log);
                            }
                            _ => stderr_done = true,
                        }
                    }
                }
            }

            let exit_code = if timed_out {
                let _ = child.wait().await;
                -1
            } else {
                child
                    .wait()
                    .await
                    .map_err(|e| Error::Internal(format!("waiting for child: {e}")))?
                    .code()
                    .unwrap_or(-1)
            };

            let duration = start.elapsed();
            tracing::info!(exit_code, timed_out, elapsed_ms = duration.as_millis() as u64, "script execution finished");

            Ok(ExecuteResult {
                exit_code,
                stdout_blob,
                stderr_blob,
                duration,
                timed_out,
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn opts(timeout: Duration) -> ExecuteOptions {
        ExecuteOptions::new(timeout, CancellationToken::new())
    }

    #[tokio::test]
    async fn exit_zero_is_success() {
        let exec = LocalScriptExecutor::new(std::env::temp_dir().join("flowforge-test-1"));
        let result = exec.execute("echo hello; exit 0", opts(Duration::from_secs(5))).await.unwrap();
        assert!(result.succeeded());
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout_blob.contains("hello"));
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_code() {
        let exec = LocalScriptExecutor::new(std::env::temp_dir().join("flowforge-test-2"));
        let result = exec.execute("exit 7", opts(Duration::from_secs(5))).await.unwrap();
        assert!(!result.succeeded());
        assert_eq!(result.exit_code, 7);
    }

    #[tokio::test]
    async fn timeout_kills_long_running_script() {
        let exec = LocalScriptExecutor::new(std::env::temp_dir().join("flowforge-test-3"));
        let result = exec.execute("sleep 60", opts(Duration::from_millis(200))).await.unwrap();
        assert!(result.timed_out);
        assert!(!result.succeeded());
    }

    #[tokio::test]
    async fn env_vars_are_injected() {
        let exec = LocalScriptExecutor::new(std::env::temp_dir().join("flowforge-test-4"));
        let mut env = HashMap::new();
        env.insert("FOO".to_string(), "bar".to_string());
        let mut o = opts(Duration::from_secs(5));
        o.env = env;
        let result = exec.execute("echo \"$FOO\"", o).await.unwrap();
        assert!(result.stdout_blob.contains("bar"));
    }

    #[test]
    fn builtin_recipes_are_registered() {
        assert!(builtin_recipe("node_build").is_some());
        assert!(builtin_recipe("go_build").is_some());
        assert!(builtin_recipe("docker_build").is_some());
        assert!(builtin_recipe("deploy_script").is_some());
        assert!(builtin_recipe("unknown").is_none());
    }
}
