//! Pipeline and pipeline-spec definitions. §3, §6.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ResourceId;

/// How a pipeline may be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Manual,
    Webhook,
    Schedule,
}

/// A pipeline: belongs to a project, carries a declarative spec and a
/// trigger kind. Invariant: `trigger_kind == Schedule` implies `cron` is
/// `Some` and parseable (checked by the caller against the scheduler's
/// cron parser at creation time, not by this type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: ResourceId,
    pub project_id: ResourceId,
    pub name: String,
    pub spec: PipelineSpec,
    pub trigger_kind: TriggerKind,
    pub cron: Option<String>,
}

/// The declarative shape stored as the pipeline's `config` JSON document.
/// §6.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub stages: Vec<StageSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: StepType,
    #[serde(default)]
    pub config: StepConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    GitClone,
    Script,
    Build,
    Deploy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildKind {
    Node,
    Go,
    Docker,
    Auto,
}

/// `config` is a loosely-typed key-value map in the spec; modeled here as
/// the specific fields the engine consults rather than a raw
/// `HashMap<String, serde_json::Value>`, since every field the engine
/// reads is named in §3.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepConfig {
    /// Body text, for `type = script`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    /// Builder kind, for `type = build`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub build_kind: Option<BuildKind>,
    /// Extra environment variables merged into the step's environment.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl PipelineSpec {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Total step count across all stages, used to validate a run's step
    /// record count up front.
    pub fn total_steps(&self) -> usize {
        self.stages.iter().map(|s| s.steps.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let spec = PipelineSpec {
            stages: vec![StageSpec {
                name: "build".into(),
                steps: vec![StepSpec {
                    name: "compile".into(),
                    kind: StepType::Script,
                    config: StepConfig {
                        script: Some("echo hi".into()),
                        build_kind: None,
                        env: HashMap::new(),
                    },
                }],
            }],
        };
        let json = spec.to_json().unwrap();
        let back = PipelineSpec::parse(&json).unwrap();
        assert_eq!(back.stages.len(), 1);
        assert_eq!(back.stages[0].steps[0].name, "compile");
    }

    #[test]
    fn parses_the_spec_example_document() {
        let json = r#"{
            "stages": [
                { "name": "s1", "steps": [
                    { "name": "A", "type": "script", "config": { "script": "exit 0" } }
                ] },
                { "name": "s2", "steps": [
                    { "name": "B", "type": "script", "config": { "script": "exit 1" } },
                    { "name": "C", "type": "script", "config": { "script": "exit 0" } }
                ] }
            ]
        }"#;
        let spec = PipelineSpec::parse(json).unwrap();
        assert_eq!(spec.total_steps(), 3);
    }
}
