//! Source Fetcher contract types. §4.3.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::credential::Credential;
use crate::Result;

/// Resolved location and auth material for a single `clone_or_pull` call.
pub struct FetchRequest<'a> {
    pub repo_url: &'a str,
    pub branch: &'a str,
    pub target_dir: PathBuf,
    pub credential: Option<&'a Credential>,
    pub timeout: Duration,
}

/// Clones or fast-forward-pulls a working copy. Implemented in
/// `flowforge-executor`; this crate only fixes the contract.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Idempotent: clones into `target_dir` if it does not already hold a
    /// working copy of `repo_url`, otherwise fast-forward pulls `branch`.
    /// "Already up to date" is success. On timeout the partial working
    /// directory is left in place.
    async fn clone_or_pull(&self, req: FetchRequest<'_>) -> Result<()>;

    /// Current HEAD commit hash and branch name (if resolvable) of an
    /// existing working copy.
    async fn head_commit(&self, repo_dir: &Path) -> Result<(String, Option<String>)>;
}
