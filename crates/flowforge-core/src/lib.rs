//! Core domain types and traits for the FlowForge CI/CD control plane.
//!
//! This crate contains:
//! - Resource identifiers and the error taxonomy (§7)
//! - The data model: projects, credentials, pipelines, runs, step records (§3)
//! - The `SourceFetcher` and `ScriptExecutor` contracts (§4.2, §4.3), kept
//!   here rather than in `flowforge-executor` so the engine and the
//!   executor can depend on the same types without a circular crate
//!   dependency.

pub mod credential;
pub mod error;
pub mod fetcher;
pub mod id;
pub mod pipeline;
pub mod project;
pub mod run;
pub mod script;

pub use error::{Error, Result};
pub use id::ResourceId;
