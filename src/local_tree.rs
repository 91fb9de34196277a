//! Local results tree: `<run_dir>/[prefix/]wandb/run-*` discovery, symlink
//! hygiene, checkpoint staging and `wandb sync` command lines.

use crate::error::AdminError;
use crate::model::ProjectPath;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const TRACKING_DIR_NAME: &str = "wandb";
const RUN_FOLDER_PREFIX: &str = "run-";
const LATEST_RUN_LINK: &str = "latest-run";

/// Where the tracking directory sits inside a run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingLayout {
    components: Vec<String>,
}

impl TrackingLayout {
    /// `prefix` may use `/` or `\` separators, e.g. `wandb_vis` or `logs/vis`.
    pub fn new(prefix: Option<&str>) -> Self {
        let mut components: Vec<String> = match prefix {
            Some(p) => p
                .split(['/', '\\'])
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        };
        components.push(TRACKING_DIR_NAME.to_string());
        Self { components }
    }

    pub fn tracking_dir(&self, run_dir: &Path) -> PathBuf {
        self.components
            .iter()
            .fold(run_dir.to_path_buf(), |p, c| p.join(c))
    }
}

/// Run id encoded in a `run-<timestamp>-<id>` folder name.
pub fn run_id_of_folder(name: &str) -> Option<&str> {
    if !name.starts_with(RUN_FOLDER_PREFIX) {
        return None;
    }
    name.rsplit('-').next().filter(|id| !id.is_empty())
}

/// Immediate subdirectories of `results_dir`, sorted by path.
pub fn list_run_dirs(results_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(results_dir)
        .with_context(|| format!("failed to read results dir {}", results_dir.display()))?
    {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// A run directory with tracking folders belonging to known remote runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRun {
    pub run_dir: PathBuf,
    pub tracking_dir: PathBuf,
    /// `run-*` folders, oldest first.
    pub run_folders: Vec<PathBuf>,
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Collect run directories that contain tracking folders for `run_ids`.
///
/// When `required_names` is set, directories whose folder name is not listed
/// are skipped.
pub fn discover(
    run_dirs: &[PathBuf],
    layout: &TrackingLayout,
    run_ids: &HashSet<String>,
    required_names: Option<&[String]>,
) -> Result<Vec<LocalRun>> {
    let mut found = Vec::new();
    for run_dir in run_dirs {
        let tracking_dir = layout.tracking_dir(run_dir);
        if !tracking_dir.is_dir() {
            warn!(
                dir = %run_dir.display(),
                "missing tracking folder, skipping directory; if this holds more runs, pass it as --results-dir"
            );
            continue;
        }

        let mut run_folders = Vec::new();
        for entry in std::fs::read_dir(&tracking_dir)
            .with_context(|| format!("failed to read {}", tracking_dir.display()))?
        {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let name = folder_name(&path);
            if run_id_of_folder(&name).is_some_and(|id| run_ids.contains(id)) {
                run_folders.push(path);
            }
        }
        if run_folders.is_empty() {
            continue;
        }

        if let Some(names) = required_names {
            let dir_name = folder_name(run_dir);
            if !names.iter().any(|n| n == &dir_name) {
                info!(
                    dir = %dir_name,
                    "skipping directory not listed in --run-names (--force-run-name-match)"
                );
                continue;
            }
        }

        run_folders.sort_by_key(|p| folder_name(p));
        found.push(LocalRun {
            run_dir: run_dir.clone(),
            tracking_dir,
            run_folders,
        });
    }
    Ok(found)
}

/// Fail when the same run folder name appears under more than one run directory.
pub fn check_duplicates(runs: &[LocalRun]) -> Result<(), AdminError> {
    let mut owners: BTreeMap<String, Vec<&Path>> = BTreeMap::new();
    for run in runs {
        for folder in &run.run_folders {
            owners.entry(folder_name(folder)).or_default().push(folder);
        }
    }
    let duplicates: BTreeSet<&String> = owners
        .iter()
        .filter(|(_, paths)| paths.len() > 1)
        .map(|(name, _)| name)
        .collect();
    if duplicates.is_empty() {
        return Ok(());
    }
    let paths: Vec<String> = owners
        .iter()
        .filter(|(name, _)| duplicates.contains(name))
        .flat_map(|(_, paths)| paths.iter().map(|p| p.display().to_string()))
        .collect();
    Err(AdminError::config(format!(
        "found duplicate run folder names {duplicates:?} at {paths:?}. The folder was copied at \
         some point and syncing duplicates may upload inconsistent data. Pass \
         --force-run-name-match to only use run directories named in --run-names, or use \
         --run-dirs to sync directories without duplicates"
    )))
}

fn is_dangling_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink()) && !path.exists()
}

/// Symlinks under `run-*/files/` whose targets no longer exist.
pub fn find_dangling_symlinks(runs: &[LocalRun]) -> Result<Vec<PathBuf>> {
    let mut dangling = Vec::new();
    for folder in runs.iter().flat_map(|r| &r.run_folders) {
        let files_dir = folder.join("files");
        if !files_dir.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&files_dir)
            .with_context(|| format!("failed to read {}", files_dir.display()))?
        {
            let path = entry?.path();
            if is_dangling_symlink(&path) {
                dangling.push(path);
            }
        }
    }
    dangling.sort();
    Ok(dangling)
}

pub fn remove_symlinks(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove symlink {}", path.display()))?;
    }
    Ok(())
}

/// What staging a checkpoint for upload did (or would do).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staging {
    Created { link: PathBuf, target: PathBuf },
    /// The link to create once the upload is confirmed.
    Planned { link: PathBuf, target: PathBuf },
    AlreadyPresent { link: PathBuf },
    Skipped { reason: String },
}

fn locate_checkpoint(local: &LocalRun, name: &str) -> Option<PathBuf> {
    [&local.run_dir, &local.tracking_dir]
        .into_iter()
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

/// Work out the `<latest-run>/files/<name>` link that makes the next sync of
/// the latest run upload the checkpoint. Nothing on disk changes; the link is
/// created later by [`create_planned_link`].
pub fn plan_checkpoint(
    local: &LocalRun,
    name: &str,
    run_ids: &HashSet<String>,
) -> Result<Staging> {
    let latest_link = local.tracking_dir.join(LATEST_RUN_LINK);
    let latest = std::fs::canonicalize(&latest_link).map_err(|_| {
        AdminError::missing(format!(
            "no resolvable {LATEST_RUN_LINK} in {}",
            local.tracking_dir.display()
        ))
    })?;
    let latest_name = folder_name(&latest);
    let latest_id = latest_name.rsplit('-').next().unwrap_or_default();
    if !run_ids.contains(latest_id) {
        return Err(AdminError::missing(format!(
            "latest run in {} has run id {latest_id}, which does not match any selected run",
            local.tracking_dir.display()
        ))
        .into());
    }

    let Some(checkpoint) = locate_checkpoint(local, name) else {
        return Ok(Staging::Skipped {
            reason: format!(
                "failed to find checkpoint {name} in {}",
                local.run_dir.display()
            ),
        });
    };
    let target = std::fs::canonicalize(&checkpoint)
        .with_context(|| format!("failed to resolve {}", checkpoint.display()))?;

    let files_dir = latest.join("files");
    if !files_dir.is_dir() {
        return Ok(Staging::Skipped {
            reason: format!("files directory does not exist: {}", files_dir.display()),
        });
    }
    let link = files_dir.join(name);
    if std::fs::symlink_metadata(&link).is_ok() {
        return Ok(Staging::AlreadyPresent { link });
    }
    Ok(Staging::Planned { link, target })
}

/// Turn a `Planned` staging into a real symlink; other variants pass through.
pub fn create_planned_link(staging: Staging) -> Result<Staging> {
    let Staging::Planned { link, target } = staging else {
        return Ok(staging);
    };
    if std::fs::symlink_metadata(&link).is_ok() {
        return Ok(Staging::AlreadyPresent { link });
    }
    make_symlink(&target, &link)
        .with_context(|| format!("failed to link {} -> {}", link.display(), target.display()))?;
    Ok(Staging::Created { link, target })
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// An external command line, e.g. `wandb sync --project p ... <folder>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for SyncCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// One `wandb sync` per run folder; `include_glob` limits the upload to
/// matching files.
pub fn sync_commands(
    local: &LocalRun,
    project: &ProjectPath,
    include_glob: Option<&str>,
) -> Vec<SyncCommand> {
    local
        .run_folders
        .iter()
        .map(|folder| {
            let mut args = vec![
                "sync".to_string(),
                "--project".to_string(),
                project.project.clone(),
                "--entity".to_string(),
                project.entity.clone(),
            ];
            if let Some(glob) = include_glob {
                args.push("--include-globs".to_string());
                args.push(glob.to_string());
            }
            args.push(folder.display().to_string());
            SyncCommand {
                program: "wandb".to_string(),
                args,
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::{Path, PathBuf};

    /// Create `<run_dir>/wandb/run-<stamp>-<id>/files` and return the folder.
    pub fn make_run_folder(run_dir: &Path, stamp: &str, id: &str) -> PathBuf {
        let folder = run_dir.join("wandb").join(format!("run-{stamp}-{id}"));
        std::fs::create_dir_all(folder.join("files")).unwrap();
        folder
    }

    #[cfg(unix)]
    pub fn point_latest_run(run_dir: &Path, folder: &Path) {
        std::os::unix::fs::symlink(folder, run_dir.join("wandb").join("latest-run")).unwrap();
    }
}
