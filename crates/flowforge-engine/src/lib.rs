//! Run orchestration for FlowForge: the Pipeline Engine, Dispatch Gate,
//! live run registry, and Cron Scheduler. §4.5, §4.6, §4.7, §9.

pub mod dispatch_gate;
pub mod engine;
pub mod registry;
pub mod scheduler;

pub use dispatch_gate::DispatchGate;
pub use engine::{Engine, LogTail};
pub use registry::{RegistryHandle, RunHandle};
pub use scheduler::{JobFn, JobInfo, Scheduler, CLEANUP_JOB_ID, CLEANUP_JOB_SPEC};
