//! Pipeline commands. §6.1.

use anyhow::{Context, Result};
use std::sync::Arc;

use flowforge_core::pipeline::TriggerKind;
use flowforge_db::PipelineRepo;
use flowforge_engine::Engine;

pub async fn list(pipelines: &dyn PipelineRepo) -> Result<()> {
    let mut any = false;
    // No single "list all projects" accessor is exposed here; listing is
    // scoped per project, so print scheduled pipelines as the common case
    // plus a hint for project-scoped listing.
    for record in pipelines.list_scheduled().await.context("listing scheduled pipelines")? {
        any = true;
        println!(
            "{}  {:<24}  schedule={}",
            record.id,
            record.name,
            record.cron.as_deref().unwrap_or("-")
        );
    }
    if !any {
        println!("no scheduled pipelines registered");
    }
    Ok(())
}

pub async fn trigger(engine: &Arc<Engine>, pipeline: &str, actor: &str) -> Result<()> {
    let pipeline_id = pipeline.parse().with_context(|| format!("'{pipeline}' is not a valid pipeline id"))?;
    let run = engine.run(pipeline_id, TriggerKind::Manual, actor).await?;
    println!("triggered run {} (#{}) for pipeline {}", run.id, run.number, pipeline_id);
    Ok(())
}
