//! Run commands. §6.1.

use anyhow::{Context, Result};
use std::sync::Arc;

use flowforge_db::RunRepo;
use flowforge_engine::{Engine, LogTail};

pub async fn show(runs: &dyn RunRepo, id: &str) -> Result<()> {
    let run_id = id.parse().with_context(|| format!("'{id}' is not a valid run id"))?;
    let record = runs.get_run(run_id).await.context("loading run")?;
    println!("run {} (#{})", record.id, record.number);
    println!("  status:   {}", record.status);
    println!("  trigger:  {}", record.trigger_kind);
    println!("  actor:    {}", record.actor);
    println!("  created:  {}", record.created_at);
    if let Some(started) = record.started_at {
        println!("  started:  {started}");
    }
    if let Some(finished) = record.finished_at {
        println!("  finished: {finished}");
    }
    if let Some(duration) = record.duration_seconds {
        println!("  duration: {duration}s");
    }
    if let Some(error) = &record.error_message {
        println!("  error:    {error}");
    }
    Ok(())
}

pub async fn logs(engine: &Arc<Engine>, id: &str, follow: bool) -> Result<()> {
    let run_id = id.parse().with_context(|| format!("'{id}' is not a valid run id"))?;
    match engine.tail_logs(run_id).await? {
        LogTail::Final(blob) => print!("{blob}"),
        LogTail::Live(mut rx) => {
            if !follow {
                // Drain whatever has already arrived, without blocking on
                // further lines from a still-running step.
                while let Ok(line) = rx.try_recv() {
                    println!("{line}");
                }
                return Ok(());
            }
            while let Some(line) = rx.recv().await {
                println!("{line}");
            }
        }
    }
    Ok(())
}

pub async fn cancel(engine: &Arc<Engine>, id: &str) -> Result<()> {
    let run_id = id.parse().with_context(|| format!("'{id}' is not a valid run id"))?;
    engine.cancel(run_id).await?;
    println!("cancellation requested for run {run_id}");
    Ok(())
}
