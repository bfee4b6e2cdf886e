//! CLI command implementations, each a thin wrapper around the
//! in-process `Engine`/repository accessors. §6.1.

pub mod pipelines;
pub mod runs;

use anyhow::{Context, Result};
use std::sync::Arc;

use flowforge_core::pipeline::{BuildKind, PipelineSpec, StepType};
use flowforge_core::script::{ScriptExecutor, ScriptKind};
use flowforge_db::PipelineRepo;
use flowforge_engine::{Engine, Scheduler};
use flowforge_executor::script::builtin_recipe;

/// Parses a pipeline spec document and syntax-checks every step script
/// body it can resolve without a workspace (explicit `script`/`build`/
/// `deploy` steps; `build` with `type = auto` is resolved at run time,
/// so validation skips it here).
pub async fn validate(executor: &dyn ScriptExecutor, path: &str) -> Result<()> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let spec = PipelineSpec::parse(&content).with_context(|| format!("parsing {path} as a pipeline spec"))?;
    println!(
        "pipeline spec is valid JSON: {} stage(s), {} step(s)",
        spec.stages.len(),
        spec.total_steps()
    );

    let kind = ScriptKind::for_host();
    let mut had_error = false;
    for stage in &spec.stages {
        for step in &stage.steps {
            let body = match step.kind {
                StepType::Script => step.config.script.clone(),
                StepType::Build => step
                    .config
                    .build_kind
                    .and_then(recipe_name)
                    .and_then(builtin_recipe)
                    .map(str::to_string),
                StepType::Deploy => builtin_recipe("deploy_script").map(str::to_string),
                StepType::GitClone => None,
            };
            let Some(body) = body else {
                println!("  skip {}/{} (nothing to syntax-check)", stage.name, step.name);
                continue;
            };
            match executor.validate(&body, kind).await {
                Ok(()) => println!("  ok   {}/{}", stage.name, step.name),
                Err(e) => {
                    had_error = true;
                    println!("  FAIL {}/{}: {e}", stage.name, step.name);
                }
            }
        }
    }

    if had_error {
        anyhow::bail!("one or more step scripts failed validation");
    }
    Ok(())
}

fn recipe_name(kind: BuildKind) -> Option<&'static str> {
    match kind {
        BuildKind::Node => Some("node_build"),
        BuildKind::Go => Some("go_build"),
        BuildKind::Docker => Some("docker_build"),
        BuildKind::Auto => None,
    }
}

/// Runs the Engine as a long-lived process: seeds the Scheduler with
/// every `schedule`-triggered pipeline and the well-known `cleanup` job,
/// then blocks until interrupted. §4.6.
pub async fn serve(engine: Arc<Engine>, pipelines: Arc<dyn PipelineRepo>) -> Result<()> {
    let scheduler = Scheduler::new();
    engine.register_cleanup_job(&scheduler).await?;

    let scheduled = pipelines.list_scheduled().await.context("loading scheduled pipelines")?;
    for record in scheduled {
        let Some(cron) = record.cron.clone() else { continue };
        let pipeline_id = flowforge_core::ResourceId::from(record.id);
        let engine = engine.clone();
        let action: flowforge_engine::JobFn = Arc::new(move || {
            let engine = engine.clone();
            tokio::spawn(async move {
                if let Err(e) = engine.run(pipeline_id, flowforge_core::pipeline::TriggerKind::Schedule, "scheduler").await {
                    tracing::error!(pipeline_id = %pipeline_id, error = %e, "scheduled run failed to start");
                }
            });
        });
        if let Err(e) = scheduler.add_pipeline_job(pipeline_id, &cron, action).await {
            tracing::warn!(pipeline_id = %pipeline_id, error = %e, "failed to register scheduled pipeline");
        }
    }

    println!("flowforge engine running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    scheduler.stop().await;
    Ok(())
}
