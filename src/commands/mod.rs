//! Subcommand implementations.
//!
//! Each command takes fully validated options plus the remote API, prompt and
//! (for sync) runner it should use, so tests can drive them with fakes.

pub mod fork;
pub mod sync;
pub mod update;

use crate::api::TrackingApi;
use crate::model::{ProjectPath, Run};
use anyhow::Result;
use tracing::info;

/// How a command finished when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// The user declined a confirmation; nothing was mutated after it.
    Declined,
    NothingToDo,
}

async fn list_project_runs<A: TrackingApi>(api: &A, project: &ProjectPath) -> Result<Vec<Run>> {
    info!(entity = %project.entity, project = %project.project, "querying runs");
    let runs = api.list_runs(project).await?;
    info!(count = runs.len(), "found runs");
    Ok(runs)
}
