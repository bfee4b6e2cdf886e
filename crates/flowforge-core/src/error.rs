//! Error taxonomy for the FlowForge engine.
//!
//! Mirrors the kinds an implementation must distinguish: bad input is
//! rejected before a run exists, transient failures count as a step
//! failure with no automatic retry, and an `Internal` violation is logged
//! and turned into a failed run rather than a panic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad pipeline spec, unparseable cron, unknown step type. Rejected at
    /// the entry point; the run never reaches `running`.
    #[error("validation: {0}")]
    Validation(String),

    /// Pipeline, run, or credential absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network error cloning, SSH dial failure. Counted as a step
    /// failure; no automatic retry at step level.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Step wall-clock budget exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Operator-initiated cancellation.
    #[error("cancelled")]
    Cancelled,

    /// Engine invariant violation (e.g. a missing live-registry entry).
    /// Logged; turns the run into a failure rather than crashing the
    /// process.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
