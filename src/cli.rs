use crate::api::WandbClient;
use crate::commands::fork::{fork_run, ForkOptions, ResumeMode};
use crate::commands::sync::{sync, RunDirs, SyncMode, SyncOptions};
use crate::commands::update::{delete_matching, UpdateOptions};
use crate::commands::Outcome;
use crate::config::{require_setting, ClientConfig, FileConfig};
use crate::confirm::StdinPrompt;
use crate::error::AdminError;
use crate::filter::RunFilter;
use crate::local_tree::TrackingLayout;
use crate::model::{ProjectPath, ReductionPolicy, RunSelector};
use crate::resolve::STEP_METRIC;
use crate::runner::ProcessRunner;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(
    name = "wandb-admin",
    version,
    about = "Fork, sync and clean up Weights & Biases runs"
)]
pub struct Cli {
    /// Log debug output (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Config file (defaults to <config dir>/wandb-admin/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fork a run at a step and prepare a directory to resume it in
    Fork(ForkArgs),
    /// Download runs or checkpoints, or upload local runs with `wandb sync`
    Sync(SyncArgs),
    /// Delete remote files and artifacts whose names match a pattern
    Update(UpdateArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ProjectArgs {
    /// Entity (user or team) owning the project
    #[arg(long, alias = "wandb_entity", env = "WANDB_ENTITY")]
    pub wandb_entity: Option<String>,

    /// Project name
    #[arg(long, alias = "wandb_project", env = "WANDB_PROJECT")]
    pub wandb_project: Option<String>,
}

impl ProjectArgs {
    fn resolve(&self, file: &FileConfig) -> Result<ProjectPath, AdminError> {
        let entity = require_setting(
            self.wandb_entity.clone(),
            file.entity.as_ref(),
            "--wandb-entity",
        )?;
        let project = require_setting(self.wandb_project.clone(), None, "--wandb-project")?;
        Ok(ProjectPath::new(entity, project))
    }
}

#[derive(Debug, Args, Clone)]
pub struct ForkArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Id of the run to fork
    #[arg(long, alias = "run_id")]
    pub run_id: Option<String>,

    /// Display name of the run to fork (must be unique)
    #[arg(long, alias = "run_name")]
    pub run_name: Option<String>,

    /// Value of the fork metric to fork at
    #[arg(long, alias = "forked_value", allow_negative_numbers = true)]
    pub forked_value: i64,

    /// Metric to look the value up in
    #[arg(long, alias = "forked_metric_name", default_value = STEP_METRIC)]
    pub forked_metric_name: String,

    /// How to pick a step when several match the value
    #[arg(long, alias = "matching_steps_reduction_func", value_enum)]
    pub matching_steps_reduction_func: Option<ReductionPolicy>,

    /// Local directory for the forked run
    #[arg(long, alias = "forked_run_dir")]
    pub forked_run_dir: PathBuf,

    /// Display name of the new run (defaults to the directory name)
    #[arg(long, alias = "forked_run_name")]
    pub forked_run_name: Option<String>,

    /// Create the run directory if it does not exist
    #[arg(long, alias = "create_forked_run_dir")]
    pub create_forked_run_dir: bool,

    /// How the new run will be resumed
    #[arg(long, value_enum, default_value_t = ResumeMode::Auto)]
    pub resume: ResumeMode,

    /// Skip the resume step entirely
    #[arg(long, alias = "no_resume")]
    pub no_resume: bool,
}

impl ForkArgs {
    pub fn into_options(self, file: &FileConfig) -> Result<ForkOptions, AdminError> {
        let project = self.project.resolve(file)?;
        let source = match (self.run_id, self.run_name) {
            (Some(id), None) => RunSelector::ById(id),
            (None, Some(name)) => RunSelector::ByName(name),
            _ => {
                return Err(AdminError::config(
                    "pass exactly one of --run-id or --run-name",
                ))
            }
        };
        Ok(ForkOptions {
            project,
            source,
            metric: self.forked_metric_name,
            value: self.forked_value,
            policy: self.matching_steps_reduction_func,
            run_dir: self.forked_run_dir,
            run_name: self.forked_run_name,
            create_run_dir: self.create_forked_run_dir,
            resume: (!self.no_resume).then_some(self.resume),
        })
    }
}

#[derive(Debug, Args, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Directory whose immediate subdirectories are run directories
    #[arg(long, alias = "results_dir")]
    pub results_dir: Option<PathBuf>,

    /// Explicit run directories
    #[arg(long, alias = "run_dirs", num_args = 1..)]
    pub run_dirs: Vec<PathBuf>,

    /// Regex keywords; each must match exactly one run name
    #[arg(long, alias = "run_names", num_args = 1..)]
    pub run_names: Option<Vec<String>>,

    /// Skip run directories whose name does not match their remote run name
    #[arg(long, alias = "force_run_name_match")]
    pub force_run_name_match: bool,

    /// Remove dangling symlinks in run folders before uploading
    #[arg(long, alias = "remove_missing_symlinks")]
    pub remove_missing_symlinks: bool,

    /// Download one checkpoint file per selected run into --results-dir
    #[arg(long, alias = "download_checkpoints")]
    pub download_checkpoints: bool,

    /// Download every file of each selected run into --results-dir
    #[arg(long, alias = "download_runs")]
    pub download_runs: bool,

    /// Link the checkpoint into the latest local run and sync only that file
    #[arg(long, alias = "upload_checkpoints")]
    pub upload_checkpoints: bool,

    /// Sync whole local run folders with `wandb sync`
    #[arg(long, alias = "upload_runs")]
    pub upload_runs: bool,

    /// Checkpoint file name inside each run directory
    #[arg(long, alias = "checkpoint_name")]
    pub checkpoint_name: Option<String>,

    /// Path from a run directory to its `wandb` folder, e.g. `outputs/logs`
    #[arg(long, alias = "wandb_local_prefix_path")]
    pub wandb_local_prefix_path: Option<String>,

    /// Print what would happen without touching anything
    #[arg(long, alias = "dry_run")]
    pub dry_run: bool,

    /// Replace local files that already exist
    #[arg(long, alias = "overwrite_existing")]
    pub overwrite_existing: bool,
}

impl SyncArgs {
    fn mode(&self) -> Result<SyncMode, AdminError> {
        let chosen: Vec<SyncMode> = [
            (self.download_checkpoints, SyncMode::DownloadCheckpoints),
            (self.download_runs, SyncMode::DownloadRuns),
            (self.upload_checkpoints, SyncMode::UploadCheckpoints),
            (self.upload_runs, SyncMode::UploadRuns),
        ]
        .into_iter()
        .filter_map(|(set, mode)| set.then_some(mode))
        .collect();
        match chosen.as_slice() {
            [mode] => Ok(*mode),
            _ => Err(AdminError::config(
                "pass exactly one of --download-checkpoints, --download-runs, \
                 --upload-checkpoints or --upload-runs",
            )),
        }
    }

    pub fn into_options(self, file: &FileConfig) -> Result<SyncOptions, AdminError> {
        let project = self.project.resolve(file)?;
        let mode = self.mode()?;
        if mode.checkpoints_only() && self.checkpoint_name.is_none() {
            return Err(AdminError::config(
                "--checkpoint-name is required for checkpoint sync",
            ));
        }
        let run_dirs = match (self.results_dir, self.run_dirs.is_empty()) {
            (Some(dir), true) => RunDirs::ResultsDir(dir),
            (None, false) if !mode.is_download() => RunDirs::Explicit(self.run_dirs),
            (None, false) => {
                return Err(AdminError::config("downloads require --results-dir"));
            }
            _ => {
                return Err(AdminError::config(
                    "pass exactly one of --results-dir or --run-dirs",
                ))
            }
        };
        Ok(SyncOptions {
            project,
            mode,
            run_dirs,
            run_names: self.run_names,
            force_run_name_match: self.force_run_name_match,
            remove_missing_symlinks: self.remove_missing_symlinks,
            checkpoint_name: self.checkpoint_name,
            layout: TrackingLayout::new(self.wandb_local_prefix_path.as_deref()),
            dry_run: self.dry_run,
            overwrite_existing: self.overwrite_existing,
        })
    }
}

#[derive(Debug, Args, Clone)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Delete run files whose name matches any of these patterns
    #[arg(long, alias = "delete_filename_regex", num_args = 1..)]
    pub delete_filename_regex: Vec<String>,

    /// Delete artifacts whose name matches any of these patterns
    #[arg(long, alias = "delete_artifact_regex", num_args = 1..)]
    pub delete_artifact_regex: Vec<String>,

    /// Run ids never touched
    #[arg(long, alias = "skip_run_ids", num_args = 1..)]
    pub skip_run_ids: Vec<String>,

    /// Only touch these run ids
    #[arg(long, alias = "select_run_ids", num_args = 1..)]
    pub select_run_ids: Vec<String>,

    /// Skip runs whose name matches any of these patterns
    #[arg(long, alias = "skip_run_names_regex", num_args = 1..)]
    pub skip_run_names_regex: Vec<String>,

    /// Only touch runs whose name matches one of these patterns
    #[arg(long, alias = "select_run_names_regex", num_args = 1..)]
    pub select_run_names_regex: Vec<String>,

    /// Keep the most recently updated match per run and pattern
    #[arg(long, alias = "keep_latest")]
    pub keep_latest: bool,

    /// List matches without deleting anything
    #[arg(long, alias = "dry_run")]
    pub dry_run: bool,
}

impl UpdateArgs {
    pub fn into_options(self, file: &FileConfig) -> Result<UpdateOptions, AdminError> {
        let project = self.project.resolve(file)?;
        if self.delete_filename_regex.is_empty() && self.delete_artifact_regex.is_empty() {
            return Err(AdminError::config(
                "pass --delete-filename-regex and/or --delete-artifact-regex",
            ));
        }
        let filter = RunFilter::new(
            &self.skip_run_ids,
            &self.select_run_ids,
            &self.skip_run_names_regex,
            &self.select_run_names_regex,
        )?;
        Ok(UpdateOptions {
            project,
            file_patterns: self.delete_filename_regex,
            artifact_patterns: self.delete_artifact_regex,
            filter,
            keep_latest: self.keep_latest,
            dry_run: self.dry_run,
        })
    }
}

fn load_file_config(path: Option<&PathBuf>) -> Result<FileConfig> {
    match path {
        Some(path) => FileConfig::load(path),
        None => match FileConfig::default_path() {
            Some(path) => FileConfig::load(&path),
            None => Ok(FileConfig::default()),
        },
    }
}

pub async fn run(args: Cli) -> Result<Outcome> {
    let file = load_file_config(args.config.as_ref())?;

    // Validate flags before touching credentials or the network.
    let command = args.command;
    let validated = match command {
        Commands::Fork(a) => Validated::Fork(a.into_options(&file)?),
        Commands::Sync(a) => Validated::Sync(a.into_options(&file)?),
        Commands::Update(a) => Validated::Update(a.into_options(&file)?),
    };

    let client_config = ClientConfig::resolve(&file)?;
    debug!(base_url = %client_config.base_url, "using tracking service");
    let api = WandbClient::new(&client_config).context("failed to build HTTP client")?;
    let mut prompt = StdinPrompt;

    match validated {
        Validated::Fork(opts) => fork_run(&api, &mut prompt, &opts).await,
        Validated::Sync(opts) => {
            let (outcome, report) = sync(&api, &mut prompt, &mut ProcessRunner, &opts).await?;
            debug!(
                downloaded = report.downloaded.len(),
                skipped = report.skipped_existing.len(),
                rejected = report.rejected.len(),
                removed_symlinks = report.removed_symlinks.len(),
                staged = report.staged.len(),
                commands = report.commands.len(),
                executed = report.executed,
                "sync finished"
            );
            Ok(outcome)
        }
        Validated::Update(opts) => delete_matching(&api, &mut prompt, &opts).await,
    }
}

enum Validated {
    Fork(ForkOptions),
    Sync(SyncOptions),
    Update(UpdateOptions),
}
