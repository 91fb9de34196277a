//! Bulk deletion of remote files and artifacts matching name patterns.

use super::{list_project_runs, Outcome};
use crate::api::TrackingApi;
use crate::confirm::{confirm_mutation, keep_latest, Prompt};
use crate::error::AdminError;
use crate::filter::RunFilter;
use crate::model::{Artifact, ProjectPath, Run, RunFile};
use crate::resolve::compile_patterns;
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;
use tracing::info;

#[derive(Debug)]
pub struct UpdateOptions {
    pub project: ProjectPath,
    pub file_patterns: Vec<String>,
    pub artifact_patterns: Vec<String>,
    pub filter: RunFilter,
    /// Spare the most recently updated match per run and pattern.
    pub keep_latest: bool,
    pub dry_run: bool,
}

/// Deletion candidates for one run.
#[derive(Debug, Clone)]
pub struct RunDeletions {
    pub run: Run,
    pub files: Vec<RunFile>,
    pub artifacts: Vec<Artifact>,
}

impl RunDeletions {
    fn is_empty(&self) -> bool {
        self.files.is_empty() && self.artifacts.is_empty()
    }

    fn len(&self) -> usize {
        self.files.len() + self.artifacts.len()
    }
}

/// Items that have a name, a storage id and can be kept-latest.
trait Candidate: crate::model::Timestamped + Clone {
    fn name(&self) -> &str;
    fn storage_id(&self) -> &str;
}

impl Candidate for RunFile {
    fn name(&self) -> &str {
        &self.name
    }
    fn storage_id(&self) -> &str {
        &self.storage_id
    }
}

impl Candidate for Artifact {
    fn name(&self) -> &str {
        &self.name
    }
    fn storage_id(&self) -> &str {
        &self.storage_id
    }
}

/// Match `items` against each pattern in turn; an item is collected once and
/// an item spared by keep-latest is never collected by a later pattern.
fn select<T: Candidate>(items: &[T], patterns: &[Regex], keep: bool, run: &Run, kind: &str) -> Vec<T> {
    let mut collected: Vec<T> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut spared: HashSet<String> = HashSet::new();
    for re in patterns {
        let mut matching: Vec<T> = items
            .iter()
            .filter(|item| re.is_match(item.name()))
            .filter(|item| !spared.contains(item.storage_id()))
            .cloned()
            .collect();
        if keep {
            if let Some(latest) = keep_latest(&mut matching) {
                info!(run = %run.name, pattern = %re, "keeping latest {kind} {}", latest.name());
                spared.insert(latest.storage_id().to_string());
                collected.retain(|c| c.storage_id() != latest.storage_id());
                seen.remove(latest.storage_id());
            }
        }
        for item in matching {
            if seen.insert(item.storage_id().to_string()) {
                collected.push(item);
            }
        }
    }
    collected
}

/// Walk admitted runs and gather everything the patterns select.
pub async fn collect_deletions<A: TrackingApi>(
    api: &A,
    opts: &UpdateOptions,
) -> Result<Vec<RunDeletions>> {
    let file_patterns = compile_patterns(&opts.file_patterns)?;
    let artifact_patterns = compile_patterns(&opts.artifact_patterns)?;

    let runs = list_project_runs(api, &opts.project).await?;
    if !file_patterns.is_empty() {
        info!(runs = runs.len(), patterns = ?opts.file_patterns, "searching runs for matching files");
    }
    if !artifact_patterns.is_empty() {
        info!(runs = runs.len(), patterns = ?opts.artifact_patterns, "searching runs for matching artifacts");
    }

    let mut plan = Vec::new();
    for run in runs.iter().filter(|r| opts.filter.admits(r)) {
        let files = if file_patterns.is_empty() {
            Vec::new()
        } else {
            let all = api.list_files(&opts.project, run).await?;
            select(&all, &file_patterns, opts.keep_latest, run, "file")
        };
        let artifacts = if artifact_patterns.is_empty() {
            Vec::new()
        } else {
            let all = api.list_artifacts(&opts.project, run).await?;
            select(&all, &artifact_patterns, opts.keep_latest, run, "artifact")
        };
        let entry = RunDeletions {
            run: run.clone(),
            files,
            artifacts,
        };
        if !entry.is_empty() {
            plan.push(entry);
        }
    }
    Ok(plan)
}

fn listing(plan: &[RunDeletions]) -> Vec<String> {
    let mut lines = Vec::new();
    for entry in plan {
        if !entry.files.is_empty() {
            lines.push(format!(
                "{} matching files from {}:",
                entry.files.len(),
                entry.run.name
            ));
            lines.extend(entry.files.iter().map(|f| format!("  {}", f.name)));
        }
        if !entry.artifacts.is_empty() {
            lines.push(format!(
                "{} matching artifacts from {}:",
                entry.artifacts.len(),
                entry.run.name
            ));
            lines.extend(entry.artifacts.iter().map(|a| format!("  {}", a.name)));
        }
    }
    lines
}

pub async fn delete_matching<A: TrackingApi, P: Prompt + ?Sized>(
    api: &A,
    prompt: &mut P,
    opts: &UpdateOptions,
) -> Result<Outcome> {
    if opts.file_patterns.is_empty() && opts.artifact_patterns.is_empty() {
        return Err(AdminError::config(
            "nothing to delete: pass --delete-filename-regex and/or --delete-artifact-regex",
        )
        .into());
    }

    let plan = collect_deletions(api, opts).await?;
    let total: usize = plan.iter().map(RunDeletions::len).sum();
    if total == 0 {
        println!("Found no matching files to delete");
        return Ok(Outcome::NothingToDo);
    }

    let lines = listing(&plan);
    if opts.dry_run {
        println!("Files to be deleted (dry-run only):");
        for line in &lines {
            println!("  {line}");
        }
        return Ok(Outcome::Completed);
    }
    if !confirm_mutation(
        prompt,
        "Found matching files:",
        &lines,
        &format!("Delete {total} files? (y/N): "),
    )? {
        return Ok(Outcome::Declined);
    }

    for entry in &plan {
        if !entry.files.is_empty() {
            info!(run = %entry.run.name, count = entry.files.len(), "deleting files");
            api.delete_files(&opts.project, &entry.run, &entry.files)
                .await
                .with_context(|| format!("failed to delete files from {}", entry.run.name))?;
        }
        for artifact in &entry.artifacts {
            info!(run = %entry.run.name, artifact = %artifact.name, "deleting artifact");
            api.delete_artifact(artifact)
                .await
                .with_context(|| format!("failed to delete artifact {}", artifact.name))?;
        }
    }
    Ok(Outcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{file, run, FakeApi};
    use crate::confirm::testing::ScriptedPrompt;
    use time::macros::datetime;
    use time::OffsetDateTime;

    fn dated(name: &str, at: OffsetDateTime) -> RunFile {
        RunFile {
            updated_at: Some(at),
            ..file(name)
        }
    }

    fn artifact(name: &str) -> Artifact {
        Artifact {
            storage_id: format!("art-{name}"),
            name: name.into(),
            aliases: vec!["latest".into()],
            updated_at: None,
        }
    }

    fn api() -> FakeApi {
        let mut api = FakeApi::with_runs(vec![
            run("a1", "m2f_r50_city"),
            run("b2", "m2f_r50_ade"),
        ]);
        api.add_file("a1", dated("epoch_1_segm.pth", datetime!(2024-01-01 0:00 UTC)), b"");
        api.add_file("a1", dated("epoch_2_segm.pth", datetime!(2024-01-02 0:00 UTC)), b"");
        api.add_file("a1", dated("epoch_2_bbox.pth", datetime!(2024-01-03 0:00 UTC)), b"");
        api.add_file("a1", file("config.yaml"), b"");
        api.add_file("b2", file("epoch_9_segm.pth"), b"");
        api.artifacts.insert(
            "a1".into(),
            vec![artifact("run-a1-pred_final:v0"), artifact("run-a1-model:v3")],
        );
        api
    }

    fn options(files: &[&str], artifacts: &[&str]) -> UpdateOptions {
        UpdateOptions {
            project: ProjectPath::new("team", "proj"),
            file_patterns: files.iter().map(|s| s.to_string()).collect(),
            artifact_patterns: artifacts.iter().map(|s| s.to_string()).collect(),
            filter: RunFilter::default(),
            keep_latest: false,
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn confirmed_deletion_removes_matches() {
        let api = api();
        let opts = options(&[r".*\.pth"], &["pred_final"]);
        let mut prompt = ScriptedPrompt::answering(&["y"]);
        let outcome = delete_matching(&api, &mut prompt, &opts).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(prompt.questions, vec!["Delete 5 files? (y/N): "]);
        let mut deleted = api.deleted_files.borrow().clone();
        deleted.sort();
        assert_eq!(
            deleted,
            vec![
                "epoch_1_segm.pth",
                "epoch_2_bbox.pth",
                "epoch_2_segm.pth",
                "epoch_9_segm.pth"
            ]
        );
        assert_eq!(*api.deleted_artifacts.borrow(), vec!["run-a1-pred_final:v0"]);
    }

    #[tokio::test]
    async fn declined_deletion_deletes_nothing() {
        let api = api();
        let opts = options(&[r"\.pth$"], &[]);
        let mut prompt = ScriptedPrompt::answering(&["N"]);
        let outcome = delete_matching(&api, &mut prompt, &opts).await.unwrap();
        assert_eq!(outcome, Outcome::Declined);
        assert!(api.deleted_files.borrow().is_empty());
    }

    #[tokio::test]
    async fn overlapping_patterns_collect_once() {
        let api = api();
        let opts = options(&["_segm_", r"epoch_2_.*\.pth", "segm"], &[]);
        let plan = collect_deletions(&api, &opts).await.unwrap();
        let a1 = plan.iter().find(|e| e.run.id == "a1").unwrap();
        assert_eq!(a1.files.len(), 3);
    }

    #[tokio::test]
    async fn keep_latest_spares_newest_per_run() {
        let api = api();
        let mut opts = options(&[r"\.pth$"], &[]);
        opts.keep_latest = true;
        let plan = collect_deletions(&api, &opts).await.unwrap();
        let a1 = plan.iter().find(|e| e.run.id == "a1").unwrap();
        let names: Vec<&str> = a1.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["epoch_1_segm.pth", "epoch_2_segm.pth"]);
        // A single match is its own latest, so nothing is left for b2.
        assert!(plan.iter().all(|e| e.run.id != "b2"));
    }

    #[tokio::test]
    async fn run_filter_limits_scope() {
        let api = api();
        let mut opts = options(&[r"\.pth$"], &[]);
        opts.filter = RunFilter::new(&[], &[], &["_ade".to_string()], &[]).unwrap();
        let plan = collect_deletions(&api, &opts).await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].run.id, "a1");
    }

    #[tokio::test]
    async fn dry_run_never_prompts_or_deletes() {
        let api = api();
        let mut opts = options(&[r"\.pth$"], &[".*"]);
        opts.dry_run = true;
        let mut prompt = ScriptedPrompt::default();
        let outcome = delete_matching(&api, &mut prompt, &opts).await.unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert!(prompt.questions.is_empty());
        assert!(api.deleted_files.borrow().is_empty());
        assert!(api.deleted_artifacts.borrow().is_empty());
    }

    #[tokio::test]
    async fn no_matches_is_nothing_to_do() {
        let api = api();
        let mut prompt = ScriptedPrompt::default();
        let outcome = delete_matching(&api, &mut prompt, &options(&["\\.ckpt$"], &[]))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::NothingToDo);
        assert!(prompt.questions.is_empty());
    }

    #[tokio::test]
    async fn patterns_are_required() {
        let api = api();
        let err = delete_matching(&api, &mut ScriptedPrompt::default(), &options(&[], &[]))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AdminError>(),
            Some(AdminError::Config(_))
        ));
    }
}
