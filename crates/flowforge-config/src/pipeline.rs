//! Pipeline spec parsing. §6.
//!
//! The pipeline spec is stored as the `config` JSON string on a pipeline
//! row; this module is the thin validating wrapper the engine and CLI
//! both call rather than reaching for `serde_json` directly, so parse
//! errors always surface as `ConfigError` regardless of caller.

use flowforge_core::pipeline::PipelineSpec;

use crate::{ConfigError, ConfigResult};

/// Parse a pipeline spec from its JSON document form.
pub fn parse_pipeline_spec(json: &str) -> ConfigResult<PipelineSpec> {
    let spec: PipelineSpec = serde_json::from_str(json)?;
    validate(&spec)?;
    Ok(spec)
}

/// Validation a spec must pass before a pipeline is allowed to reference
/// it: every stage and step needs a non-empty name, every `script` step
/// needs a non-empty body, every `build` step needs a builder kind.
fn validate(spec: &PipelineSpec) -> ConfigResult<()> {
    use flowforge_core::pipeline::StepType;

    for stage in &spec.stages {
        if stage.name.trim().is_empty() {
            return Err(ConfigError::MissingField("stage.name".into()));
        }
        for step in &stage.steps {
            if step.name.trim().is_empty() {
                return Err(ConfigError::MissingField("step.name".into()));
            }
            match step.kind {
                StepType::Script => {
                    if step.config.script.as_deref().unwrap_or("").trim().is_empty() {
                        return Err(ConfigError::InvalidValue {
                            field: format!("{}.config.script", step.name),
                            message: "script step requires a non-empty script body".into(),
                        });
                    }
                }
                StepType::Build => {
                    if step.config.build_kind.is_none() {
                        return Err(ConfigError::InvalidValue {
                            field: format!("{}.config.type", step.name),
                            message: "build step requires config.type".into(),
                        });
                    }
                }
                StepType::GitClone | StepType::Deploy => {}
            }
        }
    }
    Ok(())
}

/// Re-emit a spec as its canonical JSON form. Parsing and re-emitting a
/// valid spec is the identity map modulo whitespace (§8).
pub fn emit_pipeline_spec(spec: &PipelineSpec) -> ConfigResult<String> {
    Ok(spec.to_json()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_script_step_with_empty_body() {
        let json = r#"{"stages":[{"name":"s","steps":[
            {"name":"a","type":"script","config":{"script":""}}
        ]}]}"#;
        assert!(parse_pipeline_spec(json).is_err());
    }

    #[test]
    fn rejects_build_step_without_type() {
        let json = r#"{"stages":[{"name":"s","steps":[
            {"name":"a","type":"build","config":{}}
        ]}]}"#;
        assert!(parse_pipeline_spec(json).is_err());
    }

    #[test]
    fn accepts_the_spec_example_document() {
        let json = r#"{
            "stages": [
                { "name": "build",
                  "steps": [
                    { "name": "clone", "type": "git_clone", "config": {} },
                    { "name": "run", "type": "script", "config": { "script": "echo hi" } }
                  ] } ] }"#;
        let spec = parse_pipeline_spec(json).unwrap();
        assert_eq!(spec.total_steps(), 2);
        let round_tripped = emit_pipeline_spec(&spec).unwrap();
        assert!(parse_pipeline_spec(&round_tripped).is_ok());
    }
}
