//! Pipeline Engine: the run lifecycle state machine. §4.5.
//!
//! `pending -> running -> {success | failed | cancelled}`. Stages execute
//! in spec order; steps within a stage execute in spec order. No
//! parallelism across stages or steps of the same run, a deliberate
//! simplification from the teacher's DAG/`needs`-based orchestrator (see
//! DESIGN.md).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use flowforge_config::FlowForgeConfig;
use flowforge_core::credential::Credential;
use flowforge_core::fetcher::{FetchRequest, SourceFetcher};
use flowforge_core::pipeline::{BuildKind, PipelineSpec, StepSpec, StepType, TriggerKind};
use flowforge_core::project::Project;
use flowforge_core::run::{Run, RunStatus};
use flowforge_core::script::{ExecuteOptions, LogLine, ScriptExecutor};
use flowforge_core::{Error, ResourceId, Result};
use flowforge_db::{CredentialRepo, PipelineRepo, ProjectRepo, RunRepo};
use flowforge_executor::fetcher::detect_build_kind;
use flowforge_executor::script::builtin_recipe;

use crate::dispatch_gate::DispatchGate;
use crate::registry::{RegistryHandle, RunHandle};

const LOG_CHANNEL_CAPACITY: usize = 100;

/// Live tail or historical record of a run's logs. §6.
pub enum LogTail {
    /// The run is live; logs arrive as they are produced.
    Live(mpsc::Receiver<String>),
    /// The run is terminal (or a live subscriber already attached); this
    /// is the final accumulated blob.
    Final(String),
}

/// Outcome of attempting a single step. Never an `Err` that escapes the
/// per-run driver: every failure mode the Script Executor, Source
/// Fetcher, or build-kind resolution can produce is captured here. §7:
/// "No error ever escapes the per-run task."
struct StepOutcome {
    success: bool,
    log: String,
    message: Option<String>,
}

impl StepOutcome {
    fn success(log: impl Into<String>) -> Self {
        Self { success: true, log: log.into(), message: None }
    }

    fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self { success: false, log: String::new(), message: Some(message) }
    }
}

/// The Pipeline Engine. Holds the Persistence Gateway accessors, the
/// Script Executor/Source Fetcher, the Dispatch Gate, and the live run
/// registry. §6's collaborator contract is exactly `run`, `cancel`,
/// `tail_logs`.
pub struct Engine {
    config: FlowForgeConfig,
    projects: Arc<dyn ProjectRepo>,
    credentials: Arc<dyn CredentialRepo>,
    pipelines: Arc<dyn PipelineRepo>,
    runs: Arc<dyn RunRepo>,
    fetcher: Arc<dyn SourceFetcher>,
    script_executor: Arc<dyn ScriptExecutor>,
    gate: Arc<DispatchGate>,
    registry: RegistryHandle,
    workspace_locks: Mutex<HashMap<ResourceId, Arc<Mutex<()>>>>,
}

impl Engine {
    pub fn new(
        config: FlowForgeConfig,
        projects: Arc<dyn ProjectRepo>,
        credentials: Arc<dyn CredentialRepo>,
        pipelines: Arc<dyn PipelineRepo>,
        runs: Arc<dyn RunRepo>,
        fetcher: Arc<dyn SourceFetcher>,
        script_executor: Arc<dyn ScriptExecutor>,
    ) -> Arc<Self> {
        let gate = Arc::new(DispatchGate::new(config.max_concurrent_deployments));
        let registry = crate::registry::spawn();
        Arc::new(Self {
            config,
            projects,
            credentials,
            pipelines,
            runs,
            fetcher,
            script_executor,
            gate,
            registry,
            workspace_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Creates a `pending` run and its step journal, then spawns the
    /// per-run driver task. Returns as soon as the row is persisted; the
    /// driver admits through the Dispatch Gate and executes in the
    /// background. §6: `run(pipeline_id, trigger, actor) -> run`.
    pub async fn run(self: &Arc<Self>, pipeline_id: ResourceId, trigger: TriggerKind, actor: &str) -> Result<Run> {
        let pipeline = self.pipelines.get_by_id(pipeline_id).await.map_err(Self::db_error)?;
        let spec: PipelineSpec = serde_json::from_value(pipeline.spec.clone())
            .map_err(|e| Error::Validation(format!("stored pipeline spec is not valid: {e}")))?;

        let project_record = self.projects.get_by_id(ResourceId::from(pipeline.project_id)).await.map_err(Self::db_error)?;
        let project = Project {
            id: ResourceId::from(project_record.id),
            name: project_record.name,
            owner: project_record.owner,
            repo_url: project_record.repo_url,
            branch: project_record.branch,
            credential_id: project_record.credential_id.map(ResourceId::from),
            created_at: project_record.created_at,
        };

        let trigger_kind_str = trigger_kind_str(trigger);
        let steps_descr = flatten_steps(&spec);
        let (run_record, _step_rows) = self
            .runs
            .create_run(pipeline_id, trigger_kind_str, actor, &steps_descr)
            .await
            .map_err(Self::db_error)?;

        let run = record_to_run(&run_record, trigger)?;

        let cancellation = CancellationToken::new();
        let engine = self.clone();
        let driver_run = run.clone();
        let driver_cancellation = cancellation.clone();
        tokio::spawn(async move {
            engine.drive(project, spec, driver_run, driver_cancellation).await;
        });

        Ok(run)
    }

    /// Cancels a live run. Returns `NotFound` if the run is not currently
    /// live (never admitted, or already terminal).
    pub async fn cancel(&self, run_id: ResourceId) -> Result<()> {
        if self.registry.cancel(run_id).await {
            Ok(())
        } else {
            Err(Error::NotFound(format!("run {run_id} is not live")))
        }
    }

    /// Live tail if the run is still executing and no subscriber has
    /// attached yet; otherwise the run's final accumulated log blob.
    pub async fn tail_logs(&self, run_id: ResourceId) -> Result<LogTail> {
        if let Some(rx) = self.registry.subscribe(run_id).await {
            return Ok(LogTail::Live(rx));
        }
        let record = self.runs.get_run(run_id).await.map_err(Self::db_error)?;
        Ok(LogTail::Final(record.log_blob))
    }

    /// Registers the well-known `cleanup` job against `scheduler`. Called
    /// once at process start (§4.6).
    pub async fn register_cleanup_job(self: &Arc<Self>, scheduler: &crate::scheduler::Scheduler) -> Result<()> {
        let engine = self.clone();
        let action: crate::scheduler::JobFn = Arc::new(move || {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run_cleanup().await });
        });
        scheduler
            .add_job(crate::scheduler::CLEANUP_JOB_ID, crate::scheduler::CLEANUP_JOB_SPEC, action)
            .await
    }

    /// Housekeeping sweep: clears log text on runs older than the
    /// configured retention window and removes project workspaces that
    /// have not been touched within it.
    async fn run_cleanup(&self) {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(self.config.retention_days as i64);

        match self.runs.prune_logs_older_than(cutoff).await {
            Ok(n) if n > 0 => info!(pruned = n, "cleanup: cleared log_blob on expired runs"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "cleanup: failed to prune run logs"),
        }

        let workspaces_root = self.config.workspaces_root();
        let mut entries = match tokio::fs::read_dir(&workspaces_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(error = %e, "cleanup: failed to list workspaces directory");
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "cleanup: failed to walk workspaces directory");
                    break;
                }
            };
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(_) => continue,
            };
            let age = match std::time::SystemTime::now().duration_since(modified) {
                Ok(age) => age,
                Err(_) => continue,
            };
            if age > Duration::from_secs(self.config.retention_days as u64 * 86_400) {
                let path = entry.path();
                let project_id = entry.file_name().to_str().and_then(|s| s.parse::<ResourceId>().ok());
                // Skip directories a run currently holds the workspace lock
                // for, even if their mtime looks stale (e.g. a long-running
                // step that hasn't written to the tree yet).
                let guard = match project_id {
                    Some(id) => self.workspace_lock_for(id).await.try_lock_owned().ok(),
                    None => None,
                };
                if project_id.is_some() && guard.is_none() {
                    continue;
                }
                if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                    warn!(path = %path.display(), error = %e, "cleanup: failed to remove stale workspace");
                } else {
                    info!(path = %path.display(), "cleanup: removed stale workspace");
                }
            }
        }
    }

    async fn workspace_lock_for(&self, project_id: ResourceId) -> Arc<Mutex<()>> {
        let mut locks = self.workspace_locks.lock().await;
        locks.entry(project_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        self: Arc<Self>,
        project: Project,
        spec: PipelineSpec,
        run: Run,
        cancellation: CancellationToken,
    ) {
        let run_id = run.id;
        let permit = match self.gate.admit_or_cancelled(&cancellation).await {
            Ok(Some(permit)) => permit,
            Ok(None) => {
                let _ = self.runs.mark_run_terminal(run_id, "cancelled", "", Some("cancelled before admission")).await;
                return;
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "dispatch gate admission failed");
                let _ = self.runs.mark_run_terminal(run_id, "failed", "", Some(&e.to_string())).await;
                return;
            }
        };

        let (log_tx, log_rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let handle = RunHandle { cancellation: cancellation.clone(), log_tx: log_tx.clone() };
        self.registry.register(run_id, handle, log_rx).await;

        if let Err(e) = self.runs.mark_run_started(run_id).await {
            error!(run_id = %run_id, error = %e, "failed to mark run started");
        }
        info!(run_id = %run_id, number = run.number, trigger = ?run.trigger_kind, actor = %run.actor, "run started");

        let workspace_lock = self.workspace_lock_for(project.id).await;
        let _workspace_guard = workspace_lock.lock().await;

        let step_specs = flatten_step_specs(&spec);
        let mut accumulated = String::new();
        let mut failed = false;
        let step_rows = match self.runs.list_steps(run_id).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "failed to load step records");
                let _ = self.runs.mark_run_terminal(run_id, "failed", "", Some("internal: step records missing")).await;
                self.registry.deregister(run_id).await;
                drop(permit);
                return;
            }
        };

        for (row, step) in step_rows.iter().zip(step_specs.iter()) {
            if failed || cancellation.is_cancelled() {
                let _ = self.runs.mark_step_terminal(ResourceId::from(row.id), "skipped", "", None).await;
                continue;
            }

            let _ = self.runs.mark_step_started(ResourceId::from(row.id)).await;

            let outcome = self.execute_step(&project, &run, step, &log_tx, &cancellation).await;
            accumulated.push_str(&outcome.log);

            // Step Record status has no "cancelled" variant (only pending,
            // running, success, failed, skipped, per §3): a step aborted by
            // operator cancellation is recorded as `failed`, same as any
            // other step-level failure. Only the *run* reaches `cancelled`.
            let status = if outcome.success { "success" } else { "failed" };
            let _ = self
                .runs
                .mark_step_terminal(ResourceId::from(row.id), status, &outcome.log, outcome.message.as_deref())
                .await;

            if !outcome.success {
                failed = true;
            }
        }

        let final_status = if cancellation.is_cancelled() {
            "cancelled"
        } else if failed {
            "failed"
        } else {
            "success"
        };
        let error_message = if failed || cancellation.is_cancelled() {
            Some("one or more steps did not succeed")
        } else {
            None
        };
        if let Err(e) = self.runs.mark_run_terminal(run_id, final_status, &accumulated, error_message).await {
            error!(run_id = %run_id, error = %e, "failed to write run terminal state");
        }
        info!(run_id = %run_id, status = final_status, "run finished");

        self.registry.deregister(run_id).await;
        drop(permit);
    }

    async fn execute_step(
        &self,
        project: &Project,
        run: &Run,
        step: &StepSpec,
        log_tx: &mpsc::Sender<String>,
        cancellation: &CancellationToken,
    ) -> StepOutcome {
        match step.kind {
            StepType::GitClone => self.execute_git_clone(project).await,
            StepType::Script => {
                let body = match &step.config.script {
                    Some(body) => body.clone(),
                    None => return StepOutcome::failure("script step has no script body"),
                };
                self.execute_script(project, run, &body, &step.config.env, log_tx, cancellation).await
            }
            StepType::Build => self.execute_build(project, run, step, log_tx, cancellation).await,
            StepType::Deploy => self.execute_deploy(project, run, log_tx, cancellation).await,
        }
    }

    async fn execute_git_clone(&self, project: &Project) -> StepOutcome {
        let credential = match project.credential_id {
            Some(credential_id) => match self.credentials.get_by_id(credential_id).await {
                Ok(record) => Some(Credential {
                    id: ResourceId::from(record.id),
                    name: record.name,
                    public_key: record.public_key,
                    private_key_pem: record.private_key_pem,
                    default_host: record.default_host,
                    default_port: record.default_port.map(|p| p as u16),
                    default_user: record.default_user,
                    created_at: record.created_at,
                }),
                Err(e) => return StepOutcome::failure(format!("loading credential: {e}")),
            },
            None => None,
        };

        let target_dir = project.workspace_path(&self.config.data_path);
        let request = FetchRequest {
            repo_url: &project.repo_url,
            branch: &project.branch,
            target_dir: target_dir.clone(),
            credential: credential.as_ref(),
            timeout: Duration::from_secs(self.config.fetch_timeout_secs),
        };

        match self.fetcher.clone_or_pull(request).await {
            Ok(()) => StepOutcome::success(format!("cloned/pulled {} @ {} into {}\n", project.repo_url, project.branch, target_dir.display())),
            Err(e) => StepOutcome::failure(e.to_string()),
        }
    }

    async fn execute_script(
        &self,
        project: &Project,
        run: &Run,
        body: &str,
        step_env: &HashMap<String, String>,
        log_tx: &mpsc::Sender<String>,
        cancellation: &CancellationToken,
    ) -> StepOutcome {
        let env = build_env(project, run, step_env);
        let workspace = project.workspace_path(&self.config.data_path);
        let log_tx = log_tx.clone();
        let opts = ExecuteOptions::new(Duration::from_secs(self.config.script_timeout_secs), cancellation.clone())
            .with_work_dir(workspace)
            .with_env(env)
            .with_on_line(move |line: LogLine| publish_line(&log_tx, line.tagged()));

        match self.script_executor.execute(body, opts).await {
            Ok(result) if result.succeeded() => {
                StepOutcome::success(format!("{}{}", result.stdout_blob, result.stderr_blob))
            }
            Ok(result) if result.timed_out && cancellation.is_cancelled() => {
                StepOutcome::failure("step aborted by cancellation")
            }
            Ok(result) if result.timed_out => StepOutcome::failure("step exceeded its timeout"),
            Ok(result) => StepOutcome::failure(format!("exit code {}", result.exit_code)),
            Err(e) => StepOutcome::failure(e.to_string()),
        }
    }

    async fn execute_build(
        &self,
        project: &Project,
        run: &Run,
        step: &StepSpec,
        log_tx: &mpsc::Sender<String>,
        cancellation: &CancellationToken,
    ) -> StepOutcome {
        let workspace = project.workspace_path(&self.config.data_path);
        let recipe_name = match step.config.build_kind.unwrap_or(BuildKind::Auto) {
            BuildKind::Node => "node_build",
            BuildKind::Go => "go_build",
            BuildKind::Docker => "docker_build",
            BuildKind::Auto => match detect_build_kind(&workspace).await {
                Some(name) => name,
                None => return StepOutcome::failure("cannot auto-detect build kind"),
            },
        };
        let body = match builtin_recipe(recipe_name) {
            Some(body) => body,
            None => return StepOutcome::failure(format!("no builtin recipe named {recipe_name}")),
        };
        self.execute_script(project, run, body, &step.config.env, log_tx, cancellation).await
    }

    async fn execute_deploy(
        &self,
        project: &Project,
        run: &Run,
        log_tx: &mpsc::Sender<String>,
        cancellation: &CancellationToken,
    ) -> StepOutcome {
        let body = match builtin_recipe("deploy_script") {
            Some(body) => body,
            None => return StepOutcome::failure("no builtin deploy recipe registered"),
        };
        self.execute_script(project, run, body, &HashMap::new(), log_tx, cancellation).await
    }

    fn db_error(e: flowforge_db::DbError) -> Error {
        match e {
            flowforge_db::DbError::NotFound(msg) => Error::NotFound(msg),
            flowforge_db::DbError::Invalid(msg) | flowforge_db::DbError::Duplicate(msg) => Error::Validation(msg),
            other => Error::TransientIo(other.to_string()),
        }
    }
}

/// Merges user-provided env with the §4.5 well-known variables. The
/// well-knowns are inserted last so they win on key collision.
fn build_env(project: &Project, run: &Run, user_env: &HashMap<String, String>) -> HashMap<String, String> {
    let mut env = user_env.clone();
    env.insert("PROJECT_NAME".to_string(), project.name.clone());
    env.insert("PROJECT_ID".to_string(), project.id.to_string());
    env.insert("PIPELINE_ID".to_string(), run.pipeline_id.to_string());
    env.insert("PIPELINE_RUN_ID".to_string(), run.id.to_string());
    env.insert("BUILD_VERSION".to_string(), run.build_version());
    env
}

fn publish_line(log_tx: &mpsc::Sender<String>, line: String) {
    if let Err(tokio::sync::mpsc::error::TrySendError::Full(_)) = log_tx.try_send(line) {
        warn!("live log channel full, dropping line (final blob remains authoritative)");
    }
}

fn trigger_kind_str(kind: TriggerKind) -> &'static str {
    match kind {
        TriggerKind::Manual => "manual",
        TriggerKind::Webhook => "webhook",
        TriggerKind::Schedule => "schedule",
    }
}

fn flatten_steps(spec: &PipelineSpec) -> Vec<(String, String, String)> {
    spec.stages
        .iter()
        .flat_map(|stage| {
            stage.steps.iter().map(move |step| {
                let command = match step.kind {
                    StepType::GitClone => "git_clone".to_string(),
                    StepType::Script => step.config.script.clone().unwrap_or_default(),
                    StepType::Build => format!("build:{:?}", step.config.build_kind.unwrap_or(BuildKind::Auto)),
                    StepType::Deploy => "deploy_script".to_string(),
                };
                (stage.name.clone(), step.name.clone(), command)
            })
        })
        .collect()
}

fn flatten_step_specs(spec: &PipelineSpec) -> Vec<StepSpec> {
    spec.stages.iter().flat_map(|stage| stage.steps.iter().cloned()).collect()
}

fn record_to_run(record: &flowforge_db::RunRecord, trigger: TriggerKind) -> Result<Run> {
    Ok(Run {
        id: ResourceId::from(record.id),
        pipeline_id: ResourceId::from(record.pipeline_id),
        number: record.number,
        status: parse_run_status(&record.status)?,
        trigger_kind: trigger,
        actor: record.actor.clone(),
        created_at: record.created_at,
        started_at: record.started_at,
        finished_at: record.finished_at,
        duration_seconds: record.duration_seconds,
        log_blob: record.log_blob.clone(),
        error_message: record.error_message.clone(),
    })
}

fn parse_run_status(s: &str) -> Result<RunStatus> {
    match s {
        "pending" => Ok(RunStatus::Pending),
        "running" => Ok(RunStatus::Running),
        "success" => Ok(RunStatus::Success),
        "failed" => Ok(RunStatus::Failed),
        "cancelled" => Ok(RunStatus::Cancelled),
        other => Err(Error::Internal(format!("unknown run status in storage: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_env_vars_win_over_user_overrides() {
        let project = Project {
            id: ResourceId::new(),
            name: "demo".into(),
            owner: "alice".into(),
            repo_url: "https://example.com/demo.git".into(),
            branch: "main".into(),
            credential_id: None,
            created_at: chrono::Utc::now(),
        };
        let run = Run::new(ResourceId::new(), 1, TriggerKind::Manual, "alice");
        let mut user_env = HashMap::new();
        user_env.insert("PROJECT_NAME".to_string(), "attacker-supplied".to_string());
        user_env.insert("CUSTOM".to_string(), "value".to_string());

        let env = build_env(&project, &run, &user_env);
        assert_eq!(env.get("PROJECT_NAME").unwrap(), "demo");
        assert_eq!(env.get("CUSTOM").unwrap(), "value");
        assert_eq!(env.get("BUILD_VERSION").unwrap(), &run.build_version());
    }

    #[test]
    fn flatten_steps_produces_one_entry_per_step_in_order() {
        let json = r#"{
            "stages": [
                { "name": "s1", "steps": [
                    { "name": "A", "type": "git_clone", "config": {} }
                ] },
                { "name": "s2", "steps": [
                    { "name": "B", "type": "script", "config": { "script": "echo hi" } },
                    { "name": "C", "type": "script", "config": { "script": "echo bye" } }
                ] }
            ]
        }"#;
        let spec = PipelineSpec::parse(json).unwrap();
        let flat = flatten_steps(&spec);
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[0], ("s1".to_string(), "A".to_string(), "git_clone".to_string()));
        assert_eq!(flat[1].2, "echo hi");
    }
}
