//! Project entity. §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ResourceId;

/// A project: a source location plus optional deploy credential. A
/// project references at most one credential; one without a credential
/// must point at a public repository URL (enforced by `Project::validate`,
/// not by the type itself; the credential reference is resolved by the
/// caller against the credential store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ResourceId,
    pub name: String,
    pub owner: String,
    pub repo_url: String,
    pub branch: String,
    pub credential_id: Option<ResourceId>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// `<dataPath>/workspaces/<projectID>/`, the per-project clone root.
    /// §6 Workspace layout.
    pub fn workspace_path(&self, data_path: &std::path::Path) -> PathBuf {
        data_path.join("workspaces").join(self.id.to_string())
    }

    /// A repo URL starting with `git@` or `ssh://` is assumed private and
    /// requires a credential; anything else (https, git://) is usable
    /// unauthenticated.
    pub fn requires_credential(&self) -> bool {
        self.repo_url.starts_with("git@") || self.repo_url.starts_with("ssh://")
    }
}
