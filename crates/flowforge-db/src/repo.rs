//! Repository traits and implementations.

pub mod credential;
pub mod pipeline;
pub mod project;
pub mod run;

pub use credential::{CredentialRecord, CredentialRepo, PgCredentialRepo};
pub use pipeline::{PgPipelineRepo, PipelineRecord, PipelineRepo};
pub use project::{PgProjectRepo, ProjectRecord, ProjectRepo};
pub use run::{PgRunRepo, RunRecord, RunRepo, StepRecordRow};
