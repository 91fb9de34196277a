//! Fork a run at a step, then prepare the new run directory for resuming.

use super::{list_project_runs, Outcome};
use crate::api::TrackingApi;
use crate::confirm::{confirm_mutation, Prompt};
use crate::error::AdminError;
use crate::model::{ProjectPath, ReductionPolicy, Run, RunSelector, UpsertRun};
use crate::resolve::{needs_history, resolve_one, resolve_step, StepResolution};
use anyhow::{Context, Result};
use rand::Rng;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const RUN_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const RUN_ID_LEN: usize = 8;
pub const RESUME_FILE: &str = "wandb-resume.json";

/// How the forked run should be resumed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ResumeMode {
    /// Write `wandb/wandb-resume.json` so the next start in the directory resumes.
    Auto,
    /// Resume if the run exists.
    Allow,
    /// The run must exist.
    Must,
}

#[derive(Debug, Clone)]
pub struct ForkOptions {
    pub project: ProjectPath,
    /// `ById` or `ByName`.
    pub source: RunSelector,
    pub metric: String,
    pub value: i64,
    pub policy: Option<ReductionPolicy>,
    pub run_dir: PathBuf,
    pub run_name: Option<String>,
    pub create_run_dir: bool,
    /// `None` skips the resume step.
    pub resume: Option<ResumeMode>,
}

/// Random run id in the service's format.
pub fn generate_run_id() -> String {
    let mut rng = rand::thread_rng();
    (0..RUN_ID_LEN)
        .map(|_| RUN_ID_ALPHABET[rng.gen_range(0..RUN_ID_ALPHABET.len())] as char)
        .collect()
}

/// Expand `~` and make `path` absolute.
pub fn absolute_run_dir(path: &Path) -> Result<PathBuf> {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .context("cannot expand ~ without a home directory")?
            .join(rest),
        Err(_) => path.to_path_buf(),
    };
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(std::env::current_dir()
            .context("get current directory")?
            .join(expanded))
    }
}

/// `<run_id>?_step=<step>`
pub fn fork_point(run: &Run, step: i64) -> String {
    format!("{}?_step={}", run.id, step)
}

fn fork_plan(
    source: &Run,
    opts: &ForkOptions,
    run_dir: &Path,
    name: &str,
    resolution: &StepResolution,
) -> Vec<String> {
    let mut lines = vec![
        format!("Orig name: {} (id: {})", source.name, source.id),
        format!("New name: {name}"),
        format!("New dir: {}", run_dir.display()),
        format!("Forked metric name: {}", opts.metric),
        format!("Forked metric value: {}", opts.value),
    ];
    if let Some(policy) = resolution.reduced_by {
        lines.push(format!("Matching steps reduction func: {policy}"));
        lines.push(format!("Corresponding step: {}", resolution.step));
    }
    lines.push(format!("Fork from: {}", fork_point(source, resolution.step)));
    lines
}

fn write_resume_file(run_dir: &Path, run_id: &str) -> Result<PathBuf> {
    let tracking_dir = run_dir.join("wandb");
    std::fs::create_dir_all(&tracking_dir)
        .with_context(|| format!("failed to create {}", tracking_dir.display()))?;
    let path = tracking_dir.join(RESUME_FILE);
    let body = serde_json::to_string(&json!({ "run_id": run_id }))?;
    std::fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub async fn fork_run<A: TrackingApi, P: Prompt + ?Sized>(
    api: &A,
    prompt: &mut P,
    opts: &ForkOptions,
) -> Result<Outcome> {
    let runs = list_project_runs(api, &opts.project).await?;
    info!(selector = ?opts.source, "searching for run");
    let source = resolve_one(&runs, &opts.source).context(
        "verify entity and project are correct; run names may repeat, pass --run-id for a unique match",
    )?;

    let rows = if needs_history(&opts.metric) {
        api.scan_history(&opts.project, source).await?
    } else {
        Vec::new()
    };
    let resolution = resolve_step(&rows, &opts.metric, opts.value, opts.policy)?;
    if let Some(policy) = resolution.reduced_by {
        info!(
            matches = resolution.matches,
            step = resolution.step,
            "found several steps with {}={}, using {policy}(step)",
            opts.metric,
            opts.value
        );
    }

    let run_dir = absolute_run_dir(&opts.run_dir)?;
    let must_create = !run_dir.exists();
    if must_create && !opts.create_run_dir {
        return Err(AdminError::missing(format!(
            "forked run directory {} does not exist. Copy the previous run's files into it \
             before forking, or pass --create-forked-run-dir to start from an empty directory",
            run_dir.display()
        ))
        .into());
    }

    let name = match &opts.run_name {
        Some(n) => n.clone(),
        None => run_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                AdminError::config("cannot derive --forked-run-name from the run directory")
            })?,
    };

    let request = UpsertRun {
        project: opts.project.clone(),
        id: generate_run_id(),
        display_name: name.clone(),
        fork_from: Some(fork_point(source, resolution.step)),
    };

    let plan = fork_plan(source, opts, &run_dir, &name, &resolution);
    if !confirm_mutation(prompt, "Forking run:", &plan, "Continue? (y/N): ")? {
        return Ok(Outcome::Declined);
    }

    if must_create {
        std::fs::create_dir_all(&run_dir)
            .with_context(|| format!("failed to create {}", run_dir.display()))?;
        warn!(
            dir = %run_dir.display(),
            "created forked run directory with no files from the previous run; copy logs and checkpoints over manually"
        );
    }

    let forked = api.upsert_run(&request).await?;
    println!("Forked run info:\n  Name: {}\n  ID: {}", forked.name, forked.id);

    let Some(mode) = opts.resume else {
        return Ok(Outcome::Completed);
    };

    let resume_plan = vec![
        format!("Run id: {}", forked.id),
        format!("Resume mode: {mode:?}"),
        format!("Directory: {}", run_dir.display()),
    ];
    if !confirm_mutation(
        prompt,
        "Preparing forked run for resume:",
        &resume_plan,
        "Continue? (y/N): ",
    )? {
        return Ok(Outcome::Declined);
    }

    match api.fetch_run(&opts.project, &forked.id).await? {
        Some(_) => info!(run = %forked.id, "forked run is visible remotely"),
        None if mode == ResumeMode::Must => {
            return Err(AdminError::missing(format!(
                "forked run {} is not visible in {}",
                forked.id, opts.project
            ))
            .into());
        }
        None => warn!(run = %forked.id, "forked run is not visible remotely yet"),
    }

    if mode == ResumeMode::Auto {
        let path = write_resume_file(&run_dir, &forked.id)?;
        info!(path = %path.display(), "wrote resume file");
    }
    Ok(Outcome::Completed)
}
