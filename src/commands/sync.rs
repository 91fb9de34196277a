//! Move run files and checkpoints between a local results tree and the service.

use super::{list_project_runs, Outcome};
use crate::api::TrackingApi;
use crate::confirm::{confirm_mutation, Prompt};
use crate::error::AdminError;
use crate::local_tree::{self, LocalRun, Staging, SyncCommand, TrackingLayout};
use crate::model::{ProjectPath, Run, RunFile, RunSelector};
use crate::resolve::resolve_runs;
use crate::runner::SyncRunner;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    DownloadRuns,
    DownloadCheckpoints,
    UploadRuns,
    UploadCheckpoints,
}

impl SyncMode {
    pub fn is_download(self) -> bool {
        matches!(self, SyncMode::DownloadRuns | SyncMode::DownloadCheckpoints)
    }

    pub fn checkpoints_only(self) -> bool {
        matches!(self, SyncMode::DownloadCheckpoints | SyncMode::UploadCheckpoints)
    }
}

/// Where local run directories come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunDirs {
    /// Every immediate subdirectory.
    ResultsDir(PathBuf),
    Explicit(Vec<PathBuf>),
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub project: ProjectPath,
    pub mode: SyncMode,
    pub run_dirs: RunDirs,
    /// Regex keywords; `None` selects every run in the project.
    pub run_names: Option<Vec<String>>,
    pub force_run_name_match: bool,
    pub remove_missing_symlinks: bool,
    pub checkpoint_name: Option<String>,
    pub layout: TrackingLayout,
    pub dry_run: bool,
    pub overwrite_existing: bool,
}

/// Everything a sync did, or would have done in a dry run.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub downloaded: Vec<PathBuf>,
    pub skipped_existing: Vec<PathBuf>,
    /// Remote names that would land outside the run directory.
    pub rejected: Vec<String>,
    pub removed_symlinks: Vec<PathBuf>,
    pub staged: Vec<Staging>,
    pub commands: Vec<SyncCommand>,
    pub executed: usize,
}

async fn select_runs<A: TrackingApi>(api: &A, opts: &SyncOptions) -> Result<Vec<Run>> {
    let runs = list_project_runs(api, &opts.project).await?;
    match &opts.run_names {
        None => Ok(runs),
        Some(keywords) => {
            let selected = resolve_runs(&runs, &RunSelector::ByKeywords(keywords.clone()))?;
            Ok(selected.into_iter().cloned().collect())
        }
    }
}

pub async fn sync<A, P, R>(
    api: &A,
    prompt: &mut P,
    runner: &mut R,
    opts: &SyncOptions,
) -> Result<(Outcome, SyncReport)>
where
    A: TrackingApi,
    P: Prompt + ?Sized,
    R: SyncRunner,
{
    if opts.mode.checkpoints_only() && opts.checkpoint_name.is_none() {
        return Err(AdminError::config("--checkpoint-name is required for checkpoint sync").into());
    }
    let runs = select_runs(api, opts).await?;
    if opts.mode.is_download() {
        let RunDirs::ResultsDir(results_dir) = &opts.run_dirs else {
            return Err(AdminError::config("downloads require --results-dir").into());
        };
        download(api, &runs, results_dir, opts).await
    } else {
        upload(prompt, runner, &runs, opts).await
    }
}

/// True when `name` is a plain relative path with no root, prefix or `..`.
fn is_contained(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn download_one(
    file: &RunFile,
    run_dir: &Path,
    opts: &SyncOptions,
    report: &mut SyncReport,
) -> Option<PathBuf> {
    if !is_contained(&file.name) {
        warn!(file = %file.name, "remote file name escapes the run directory, skipping");
        report.rejected.push(file.name.clone());
        return None;
    }
    let dest = run_dir.join(&file.name);
    if dest.exists() && !opts.overwrite_existing {
        println!("Downloading {} File exists and not overwriting, skipping...", file.name);
        report.skipped_existing.push(dest);
        return None;
    }
    println!("Downloading {}", file.name);
    Some(dest)
}

async fn download<A: TrackingApi>(
    api: &A,
    runs: &[Run],
    results_dir: &Path,
    opts: &SyncOptions,
) -> Result<(Outcome, SyncReport)> {
    let mut report = SyncReport::default();
    for run in runs {
        let run_dir = results_dir.join(&run.name);
        let run_path = opts.project.run_path(&run.name);
        println!("Creating local directory for run {run_path}:\n  {}", run_dir.display());
        if !opts.dry_run {
            std::fs::create_dir_all(&run_dir)
                .with_context(|| format!("failed to create {}", run_dir.display()))?;
        }

        let files = match (&opts.mode, opts.checkpoint_name.as_deref()) {
            (SyncMode::DownloadCheckpoints, Some(name)) => {
                println!(
                    "Downloading {run_path}/{name} to:\n  {}",
                    run_dir.join(name).display()
                );
                let file = api.find_file(&opts.project, run, name).await?.ok_or_else(|| {
                    AdminError::missing(format!(
                        "failed to find checkpoint {name} in run {run_path}"
                    ))
                })?;
                vec![file]
            }
            _ => {
                let files = api.list_files(&opts.project, run).await?;
                println!("Syncing {} files (checkpoints_only=false)", files.len());
                files
            }
        };

        for file in &files {
            let Some(dest) = download_one(file, &run_dir, opts, &mut report) else {
                continue;
            };
            if !opts.dry_run {
                api.download_file(file, &dest)
                    .await
                    .with_context(|| format!("failed to download {} from {run_path}", file.name))?;
            }
            report.downloaded.push(dest);
        }
    }
    Ok((Outcome::Completed, report))
}

async fn upload<P, R>(
    prompt: &mut P,
    runner: &mut R,
    runs: &[Run],
    opts: &SyncOptions,
) -> Result<(Outcome, SyncReport)>
where
    P: Prompt + ?Sized,
    R: SyncRunner,
{
    let mut report = SyncReport::default();
    let run_dirs = match &opts.run_dirs {
        RunDirs::Explicit(dirs) => dirs.clone(),
        RunDirs::ResultsDir(dir) => local_tree::list_run_dirs(dir)?,
    };
    let run_ids: HashSet<String> = runs.iter().map(|r| r.id.clone()).collect();
    let required_names = if opts.force_run_name_match {
        opts.run_names.as_deref()
    } else {
        None
    };

    let local = local_tree::discover(&run_dirs, &opts.layout, &run_ids, required_names)?;
    local_tree::check_duplicates(&local)?;

    let dangling = local_tree::find_dangling_symlinks(&local)?;
    if !dangling.is_empty() {
        if !opts.remove_missing_symlinks {
            return Err(AdminError::config(format!(
                "found {} missing symlinks; syncing would fail. Pass --remove-missing-symlinks \
                 to remove them, or delete them manually",
                dangling.len()
            ))
            .into());
        }
        let listed: Vec<String> = dangling.iter().map(|p| p.display().to_string()).collect();
        if opts.dry_run {
            println!("Missing symlinks to be removed (dry-run only):");
            for line in &listed {
                println!("  {line}");
            }
        } else {
            if !confirm_mutation(
                prompt,
                "Missing symlinks to be removed:",
                &listed,
                &format!("Remove {} symlinks? (y/N): ", listed.len()),
            )? {
                return Ok((Outcome::Declined, report));
            }
            local_tree::remove_symlinks(&dangling)?;
        }
        report.removed_symlinks = dangling;
    }

    if opts.checkpoint_name.is_none() {
        warn!(
            "not linking any new checkpoint; runs sync with their existing file symlinks. \
             Pass --checkpoint-name to upload a new checkpoint during sync"
        );
    }
    let include_glob = if opts.mode == SyncMode::UploadCheckpoints {
        opts.checkpoint_name.as_deref()
    } else {
        None
    };

    for dir in &local {
        if let Some(name) = opts.checkpoint_name.as_deref() {
            let staged = plan_staging(dir, name, &run_ids)?;
            let skip = matches!(staged, Staging::Skipped { .. });
            report.staged.push(staged);
            if skip {
                continue;
            }
        }
        report
            .commands
            .extend(local_tree::sync_commands(dir, &opts.project, include_glob));
    }

    let links: Vec<String> = report
        .staged
        .iter()
        .filter_map(|s| match s {
            Staging::Planned { link, target } => {
                Some(format!("ln -s {} {}", target.display(), link.display()))
            }
            _ => None,
        })
        .collect();
    let mut lines = links.clone();
    lines.extend(report.commands.iter().map(ToString::to_string));
    if opts.dry_run {
        println!("Actions to be taken (dry-run only):");
        for line in &lines {
            println!("  {line}");
        }
        return Ok((Outcome::Completed, report));
    }
    if report.commands.is_empty() {
        println!("Found no run folders to sync");
        return Ok((Outcome::NothingToDo, report));
    }
    let question = if links.is_empty() {
        format!("Run {} sync commands? (y/N): ", report.commands.len())
    } else {
        format!(
            "Create {} checkpoint links and run {} sync commands? (y/N): ",
            links.len(),
            report.commands.len()
        )
    };
    if !confirm_mutation(prompt, "Actions to be taken:", &lines, &question)? {
        return Ok((Outcome::Declined, report));
    }

    let planned = std::mem::take(&mut report.staged);
    for staged in planned {
        let staged = local_tree::create_planned_link(staged)?;
        if let Staging::Created { link, target } = &staged {
            println!("Created symbolic link from:\n  {} to\n  {}", target.display(), link.display());
        }
        report.staged.push(staged);
    }
    for command in &report.commands {
        println!("Running: {command}");
        runner.run(command).await?;
        report.executed += 1;
    }
    Ok((Outcome::Completed, report))
}

fn plan_staging(dir: &LocalRun, name: &str, run_ids: &HashSet<String>) -> Result<Staging> {
    let staged = local_tree::plan_checkpoint(dir, name, run_ids)?;
    match &staged {
        Staging::Planned { link, target } => {
            debug!(link = %link.display(), target = %target.display(), "planned checkpoint link");
        }
        Staging::AlreadyPresent { link } => {
            info!(link = %link.display(), "symlink already exists, skipping symlink creation");
        }
        Staging::Skipped { reason } => {
            println!("{reason}. Skipping directory.");
        }
        Staging::Created { .. } => {}
    }
    Ok(staged)
}
