//! Source Fetcher: idempotent clone-or-pull of a working copy, using an
//! ephemeral private-key credential file for transport auth. §4.3.

use async_trait::async_trait;
use flowforge_core::credential::Credential;
use flowforge_core::fetcher::{FetchRequest, SourceFetcher};
use flowforge_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

pub struct GitSourceFetcher;

impl Default for GitSourceFetcher {
    fn default() -> Self {
        Self
    }
}

impl GitSourceFetcher {
    pub fn new() -> Self {
        Self
    }

    async fn write_ephemeral_key(credential: &Credential) -> Result<PathBuf> {
        let path = std::env::temp_dir().join(format!("flowforge-key-{}", uuid::Uuid::now_v7()));
        tokio::fs::write(&path, &credential.private_key_pem)
            .await
            .map_err(|e| Error::Internal(format!("writing ephemeral key: {e}")))?;
        #[cfg(unix)]
        {
            let mut perms = tokio::fs::metadata(&path)
                .await
                .map_err(|e| Error::Internal(format!("stat ephemeral key: {e}")))?
                .permissions();
            perms.set_mode(0o600);
            tokio::fs::set_permissions(&path, perms)
                .await
                .map_err(|e| Error::Internal(format!("chmod ephemeral key: {e}")))?;
        }
        Ok(path)
    }

    fn ssh_command_env(key_path: &Path) -> String {
        format!(
            "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
            key_path.display()
        )
    }

    async fn run_git(args: &[&str], cwd: Option<&Path>, ssh_command: Option<&str>) -> Result<std::process::Output> {
        let mut cmd = Command::new("git");
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        if let Some(ssh) = ssh_command {
            cmd.env("GIT_SSH_COMMAND", ssh);
        }
        cmd.output()
            .await
            .map_err(|e| Error::TransientIo(format!("invoking git: {e}")))
    }
}

#[async_trait]
impl SourceFetcher for GitSourceFetcher {
    async fn clone_or_pull(&self, req: FetchRequest<'_>) -> Result<()> {
        let ephemeral_key = match req.credential {
            Some(cred) => Some(Self::write_ephemeral_key(cred).await?),
            None => None,
        };
        let ssh_command = ephemeral_key.as_deref().map(Self::ssh_command_env);
        let repo_url = req.repo_url.to_string();
        let timeout = req.timeout;

        let result = tokio::time::timeout(timeout, async {
            if req.target_dir.join(".git").is_dir() {
                self.pull(&req, ssh_command.as_deref()).await
            } else {
                self.clone(&req, ssh_command.as_deref()).await
            }
        })
        .await;

        if let Some(key_path) = ephemeral_key {
            let _ = tokio::fs::remove_file(&key_path).await;
        }

        match result {
            Ok(inner) => inner,
            Err(_elapsed) => Err(Error::Timeout(format!(
                "clone_or_pull of {repo_url} exceeded {timeout:?}"
            ))),
        }
    }

    async fn head_commit(&self, repo_dir: &Path) -> Result<(String, Option<String>)> {
        let output = Self::run_git(&["rev-parse", "HEAD"], Some(repo_dir), None).await?;
        if !output.status.success() {
            return Err(Error::TransientIo(format!(
                "git rev-parse HEAD failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();

        let branch_output = Self::run_git(&["rev-parse", "--abbrev-ref", "HEAD"], Some(repo_dir), None).await?;
        let branch = if branch_output.status.success() {
            let name = String::from_utf8_lossy(&branch_output.stdout).trim().to_string();
            if name == "HEAD" { None } else { Some(name) }
        } else {
            None
        };

        Ok((commit, branch))
    }
}

impl GitSourceFetcher {
    async fn clone(&self, req: &FetchRequest<'_>, ssh_command: Option<&str>) -> Result<()> {
        if let Some(parent) = req.target_dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Internal(format!("creating workspace parent: {e}")))?;
        }
        info!(repo = %req.repo_url, branch = %req.branch, target = %req.target_dir.display(), "cloning repository");
        let output = Self::run_git(
            &[
                "clone",
                "--depth",
                "1",
                "--single-branch",
                "--branch",
                req.branch,
                req.repo_url,
                req.target_dir.to_str().ok_or_else(|| Error::Validation("non-utf8 target dir".into()))?,
            ],
            None,
            ssh_command,
        )
        .await?;
        if !output.status.success() {
            return Err(Error::TransientIo(format!(
                "git clone failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    async fn pull(&self, req: &FetchRequest<'_>, ssh_command: Option<&str>) -> Result<()> {
        info!(target = %req.target_dir.display(), branch = %req.branch, "pulling repository");
        let output = Self::run_git(
            &["pull", "--ff-only", "origin", req.branch],
            Some(&req.target_dir),
            ssh_command,
        )
        .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("up to date") || stderr.contains("up-to-date") {
                return Ok(());
            }
            warn!(error = %stderr, "git pull failed");
            return Err(Error::TransientIo(format!("git pull failed: {stderr}")));
        }
        Ok(())
    }
}

/// Build markers consulted for `build` steps with `config.type = auto`.
/// Checked in priority order; §4.5.
pub async fn detect_build_kind(workspace: &Path) -> Option<&'static str> {
    if workspace.join("package.json").is_file() {
        Some("node_build")
    } else if workspace.join("go.mod").is_file() {
        Some("go_build")
    } else if workspace.join("Dockerfile").is_file() {
        Some("docker_build")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_core::ResourceId;
    use std::time::Duration;

    fn base_credential() -> Credential {
        Credential {
            id: ResourceId::new(),
            name: "test".into(),
            public_key: "ssh-rsa AAAA test".into(),
            private_key_pem: "not-a-real-key".into(),
            default_host: None,
            default_port: None,
            default_user: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn clone_then_clone_again_is_idempotent_success() {
        let tmp = tempfile::tempdir().unwrap();
        let upstream = tmp.path().join("upstream");
        tokio::fs::create_dir_all(&upstream).await.unwrap();
        let status = Command::new("git").arg("init").arg("--initial-branch=main").arg(&upstream).status().await.unwrap();
        assert!(status.success());
        Command::new("git").args(["config", "user.email", "a@b.c"]).current_dir(&upstream).status().await.unwrap();
        Command::new("git").args(["config", "user.name", "a"]).current_dir(&upstream).status().await.unwrap();
        tokio::fs::write(upstream.join("f.txt"), "hi").await.unwrap();
        Command::new("git").args(["add", "."]).current_dir(&upstream).status().await.unwrap();
        Command::new("git").args(["commit", "-m", "init"]).current_dir(&upstream).status().await.unwrap();

        let target = tmp.path().join("clone");
        let fetcher = GitSourceFetcher::new();

        fetcher
            .clone_or_pull(FetchRequest {
                repo_url: upstream.to_str().unwrap(),
                branch: "main",
                target_dir: target.clone(),
                credential: None,
                timeout: Duration::from_secs(30),
            })
            .await
            .unwrap();
        assert!(target.join("f.txt").is_file());

        fetcher
            .clone_or_pull(FetchRequest {
                repo_url: upstream.to_str().unwrap(),
                branch: "main",
                target_dir: target.clone(),
                credential: None,
                timeout: Duration::from_secs(30),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ephemeral_key_is_removed_after_use() {
        let fetcher = GitSourceFetcher::new();
        let cred = base_credential();
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("no-such-repo-clone");
        let _ = fetcher
            .clone_or_pull(FetchRequest {
                repo_url: "git@example.invalid:nobody/nothing.git",
                branch: "main",
                target_dir: target,
                credential: Some(&cred),
                timeout: Duration::from_millis(500),
            })
            .await;
        let leftover = std::fs::read_dir(std::env::temp_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("flowforge-key-"));
        assert!(!leftover);
    }
}
