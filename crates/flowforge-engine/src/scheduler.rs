//! Cron Scheduler: second-precision cron dispatch. §4.6.
//!
//! Adapted from the teacher's poll-loop shape in `worker.rs` (tick, act,
//! sleep-on-idle); here the tick target is "soonest next occurrence
//! across all registered jobs" rather than a queue row.

use chrono::{DateTime, Utc};
use croner::Cron;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use flowforge_core::{Error, Result, ResourceId};

/// A function run when a job's schedule fires.
pub type JobFn = Arc<dyn Fn() + Send + Sync>;

struct Job {
    id: String,
    cron: Cron,
    spec: String,
    action: JobFn,
    last_run: Option<DateTime<Utc>>,
}

/// Introspection snapshot for one scheduled job.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub id: String,
    pub spec: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

/// Well-known job registered at startup: workspace/log housekeeping.
pub const CLEANUP_JOB_ID: &str = "cleanup";
pub const CLEANUP_JOB_SPEC: &str = "0 0 2 * * *";

enum Command {
    AddJob { id: String, spec: String, action: JobFn },
    RemoveJob { id: String },
    Jobs { reply: mpsc::Sender<Vec<JobInfo>> },
}

pub struct Scheduler {
    tx: mpsc::Sender<Command>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Builds an empty scheduler and starts its driver loop; no jobs are
    /// registered yet. The well-known `cleanup` job is added separately by
    /// `Engine::register_cleanup_job`.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(64);
        let scheduler = Self {
            tx,
            driver: Mutex::new(None),
        };
        scheduler.spawn_driver(rx);
        scheduler
    }

    fn spawn_driver(&self, mut rx: mpsc::Receiver<Command>) {
        let handle = tokio::spawn(async move {
            let mut jobs: HashMap<String, Job> = HashMap::new();

            loop {
                let sleep_for = Self::shortest_wait(&jobs);
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {
                        Self::fire_due(&mut jobs);
                    }
                    cmd = rx.recv() => {
                        match cmd {
                            Some(Command::AddJob { id, spec, action }) => {
                                match Cron::new(&spec).parse() {
                                    Ok(cron) => {
                                        jobs.insert(id.clone(), Job { id, cron, spec, action, last_run: None });
                                    }
                                    Err(e) => warn!(job_id = %id, error = %e, "rejecting job with unparseable cron spec"),
                                }
                            }
                            Some(Command::RemoveJob { id }) => {
                                jobs.remove(&id);
                            }
                            Some(Command::Jobs { reply }) => {
                                let now = Utc::now();
                                let snapshot = jobs.values().map(|j| JobInfo {
                                    id: j.id.clone(),
                                    spec: j.spec.clone(),
                                    last_run: j.last_run,
                                    next_run: j.cron.find_next_occurrence(&now, false).ok(),
                                }).collect();
                                let _ = reply.send(snapshot).await;
                            }
                            None => break,
                        }
                    }
                }
            }
        });
        // Only `start`/`stop` manage the handle slot; store lazily via try_lock
        // since `spawn_driver` runs inside `new`, before any other caller can
        // race it.
        if let Ok(mut guard) = self.driver.try_lock() {
            *guard = Some(handle);
        }
    }

    fn shortest_wait(jobs: &HashMap<String, Job>) -> std::time::Duration {
        let now = Utc::now();
        jobs.values()
            .filter_map(|j| j.cron.find_next_occurrence(&now, false).ok())
            .map(|next| (next - now).to_std().unwrap_or(std::time::Duration::from_secs(0)))
            .min()
            .unwrap_or(std::time::Duration::from_secs(60))
            .min(std::time::Duration::from_secs(60))
    }

    fn fire_due(jobs: &mut HashMap<String, Job>) {
        let now = Utc::now();
        for job in jobs.values_mut() {
            let due = job
                .last_run
                .map(|last| job.cron.find_next_occurrence(&last, false).map(|n| n <= now).unwrap_or(false))
                .unwrap_or_else(|| job.cron.is_time_matching(&now).unwrap_or(false));
            if due {
                info!(job_id = %job.id, "firing scheduled job");
                (job.action)();
                job.last_run = Some(now);
            }
        }
    }

    /// Registers (or idempotently replaces) a job under `id`.
    pub async fn add_job(&self, id: impl Into<String>, spec: impl Into<String>, action: JobFn) -> Result<()> {
        let id = id.into();
        let spec = spec.into();
        // Validate eagerly so callers get a Validation error synchronously
        // rather than a silently-dropped job.
        Cron::new(&spec)
            .parse()
            .map_err(|e| Error::Validation(format!("invalid cron spec '{spec}': {e}")))?;
        self.tx
            .send(Command::AddJob { id, spec, action })
            .await
            .map_err(|_| Error::Internal("scheduler driver task is gone".into()))
    }

    pub async fn remove_job(&self, id: impl Into<String>) -> Result<()> {
        self.tx
            .send(Command::RemoveJob { id: id.into() })
            .await
            .map_err(|_| Error::Internal("scheduler driver task is gone".into()))
    }

    /// Registers a pipeline's own schedule under the job id `pipeline:<id>`.
    pub async fn add_pipeline_job(&self, pipeline_id: ResourceId, cron_spec: &str, action: JobFn) -> Result<()> {
        self.add_job(format!("pipeline:{pipeline_id}"), cron_spec, action).await
    }

    pub async fn remove_pipeline_job(&self, pipeline_id: ResourceId) -> Result<()> {
        self.remove_job(format!("pipeline:{pipeline_id}")).await
    }

    pub async fn jobs(&self) -> Vec<JobInfo> {
        let (reply, mut rx) = mpsc::channel(1);
        if self.tx.send(Command::Jobs { reply }).await.is_err() {
            return Vec::new();
        }
        rx.recv().await.unwrap_or_default()
    }

    /// No-op placeholder for symmetry with `stop`: the driver task starts
    /// in `new` and runs until `stop` is called.
    pub async fn start(&self) {}

    /// Stops the driver task; subsequent `add_job`/`remove_job` calls fail.
    pub async fn stop(&self) {
        let mut guard = self.driver.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn add_job_rejects_an_unparseable_spec() {
        let scheduler = Scheduler::new();
        let result = scheduler.add_job("bad", "not a cron", Arc::new(|| {})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn add_job_is_idempotent_on_id() {
        let scheduler = Scheduler::new();
        scheduler.add_job("j1", "*/5 * * * * *", Arc::new(|| {})).await.unwrap();
        scheduler.add_job("j1", "0 0 2 * * *", Arc::new(|| {})).await.unwrap();
        let jobs = scheduler.jobs().await;
        assert_eq!(jobs.iter().filter(|j| j.id == "j1").count(), 1);
        assert_eq!(jobs.iter().find(|j| j.id == "j1").unwrap().spec, "0 0 2 * * *");
    }

    #[tokio::test]
    async fn remove_job_drops_it_from_introspection() {
        let scheduler = Scheduler::new();
        scheduler.add_job("j1", "0 0 2 * * *", Arc::new(|| {})).await.unwrap();
        scheduler.remove_job("j1").await.unwrap();
        assert!(scheduler.jobs().await.is_empty());
    }

    #[tokio::test]
    async fn a_job_firing_every_second_runs_within_two_seconds() {
        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        scheduler
            .add_job("every-second", "* * * * * *", Arc::new(move || { count_clone.fetch_add(1, Ordering::SeqCst); }))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2200)).await;
        assert!(count.load(Ordering::SeqCst) >= 1);
    }
}
