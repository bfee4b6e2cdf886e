//! Run and step-record definitions. §3, §4.5.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::TriggerKind;
use crate::ResourceId;

/// `pending -> running -> {success | failed | cancelled}`. Terminal
/// states are absorbing. §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed | RunStatus::Cancelled)
    }
}

/// One execution of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: ResourceId,
    pub pipeline_id: ResourceId,
    /// Monotonically increasing per pipeline, starting at 1.
    pub number: i64,
    pub status: RunStatus,
    pub trigger_kind: TriggerKind,
    pub actor: String,
    pub created_at: DateTime<Utc>,
    /// Present iff `status != Pending`.
    pub started_at: Option<DateTime<Utc>>,
    /// Present iff `status.is_terminal()`.
    pub finished_at: Option<DateTime<Utc>>,
    /// Whole seconds; present iff `finished_at.is_some()`.
    pub duration_seconds: Option<i64>,
    /// Final accumulated log blob, flushed on terminal state.
    pub log_blob: String,
    pub error_message: Option<String>,
}

impl Run {
    pub fn new(pipeline_id: ResourceId, number: i64, trigger_kind: TriggerKind, actor: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(),
            pipeline_id,
            number,
            status: RunStatus::Pending,
            trigger_kind,
            actor: actor.into(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            duration_seconds: None,
            log_blob: String::new(),
            error_message: None,
        }
    }

    /// `BUILD_VERSION` synthesized tag, §4.5 environment contract.
    pub fn build_version(&self) -> String {
        format!("v{}", self.id)
    }
}

/// Status of a single step journal entry under a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// Per-step journal entry. Invariant: a step may reach `Success` only if
/// every prior step in the same stage reached `Success`; a `Failed` step
/// marks every subsequent step `Skipped`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: ResourceId,
    pub run_id: ResourceId,
    pub stage_name: String,
    pub step_name: String,
    /// Zero-based index contiguous across the whole run (not reset per
    /// stage), so indices form a contiguous prefix starting at 0 (§8.3).
    pub index: i32,
    pub status: StepStatus,
    /// The command actually run, or a synthesized descriptor (e.g. for
    /// `git_clone`, which has no shell command).
    pub command: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub log_blob: String,
    pub error_message: Option<String>,
}

impl StepRecord {
    pub fn new(run_id: ResourceId, stage_name: impl Into<String>, step_name: impl Into<String>, index: i32, command: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(),
            run_id,
            stage_name: stage_name.into(),
            step_name: step_name.into(),
            index,
            status: StepStatus::Pending,
            command: command.into(),
            started_at: None,
            finished_at: None,
            log_blob: String::new(),
            error_message: None,
        }
    }
}
