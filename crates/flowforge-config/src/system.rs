//! Ambient system configuration: data path, dispatch gate cap, SSH
//! timeout, scheduler retention. §1.1.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ConfigResult;

/// Process-wide configuration, loaded from environment variables (via
/// `clap`'s `env` attribute) and optionally overlaid with a TOML file.
/// Env vars take precedence since `clap::Parser::parse` reads them at
/// construction; `FlowForgeConfig::load` applies the TOML file's values
/// first, then lets explicit CLI/env args override them.
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "flowforge", about = "FlowForge CI/CD control plane")]
pub struct FlowForgeConfig {
    /// Postgres connection string.
    #[arg(long, env = "FLOWFORGE_DATABASE_URL")]
    #[serde(default)]
    pub database_url: Option<String>,

    /// Root directory holding `workspaces/<projectID>/` clones and
    /// ephemeral credential material.
    #[arg(long, env = "FLOWFORGE_DATA_PATH", default_value = "./data")]
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Dispatch Gate cap: `max_concurrent_deployments`. §4.7.
    #[arg(long, env = "FLOWFORGE_MAX_CONCURRENT_DEPLOYMENTS", default_value_t = 5)]
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_deployments: usize,

    /// Default per-step script timeout, seconds.
    #[arg(long, env = "FLOWFORGE_SCRIPT_TIMEOUT_SECS", default_value_t = 3600)]
    #[serde(default = "default_script_timeout")]
    pub script_timeout_secs: u64,

    /// SSH connect/handshake timeout, seconds. §4.4.
    #[arg(long, env = "FLOWFORGE_SSH_TIMEOUT_SECS", default_value_t = 30)]
    #[serde(default = "default_ssh_timeout")]
    pub ssh_timeout_secs: u64,

    /// Source Fetcher global operation timeout, seconds. §4.3.
    #[arg(long, env = "FLOWFORGE_FETCH_TIMEOUT_SECS", default_value_t = 300)]
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Retention window for the `cleanup` scheduler job, in days. §4.6.
    #[arg(long, env = "FLOWFORGE_RETENTION_DAYS", default_value_t = 30)]
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./data")
}
fn default_max_concurrent() -> usize {
    5
}
fn default_script_timeout() -> u64 {
    3600
}
fn default_ssh_timeout() -> u64 {
    30
}
fn default_fetch_timeout() -> u64 {
    300
}
fn default_retention_days() -> i64 {
    30
}

impl Default for FlowForgeConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            data_path: default_data_path(),
            max_concurrent_deployments: default_max_concurrent(),
            script_timeout_secs: default_script_timeout(),
            ssh_timeout_secs: default_ssh_timeout(),
            fetch_timeout_secs: default_fetch_timeout(),
            retention_days: default_retention_days(),
        }
    }
}

impl FlowForgeConfig {
    /// Load a TOML file, falling back to defaults for any field it omits.
    /// Env vars are applied separately by `clap::Parser::parse`/`try_parse_from`
    /// at the CLI entry point; this function exists for the sub-case of
    /// loading a config file path the CLI was pointed at explicitly.
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn workspaces_root(&self) -> PathBuf {
        self.data_path.join("workspaces")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overlay_fills_in_omitted_fields_with_defaults() {
        let config = FlowForgeConfig::from_toml_str("max_concurrent_deployments = 10\n").unwrap();
        assert_eq!(config.max_concurrent_deployments, 10);
        assert_eq!(config.script_timeout_secs, default_script_timeout());
    }

    #[test]
    fn workspaces_root_nests_under_data_path() {
        let config = FlowForgeConfig {
            data_path: PathBuf::from("/srv/flowforge"),
            ..Default::default()
        };
        assert_eq!(config.workspaces_root(), PathBuf::from("/srv/flowforge/workspaces"));
    }
}
