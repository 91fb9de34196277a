//! Remote tracking service access.
//!
//! Commands are generic over [`TrackingApi`]; the binary uses the GraphQL
//! client in [`wandb`], tests use the in-memory fake in [`testing`].

mod models;
mod queries;
mod wandb;

pub use wandb::WandbClient;

use crate::model::{Artifact, MetricRow, ProjectPath, Run, RunFile, UpsertRun};
use anyhow::Result;
use std::path::Path;

/// Remote operations the admin commands rely on. Every call is awaited
/// before the next one is issued.
#[allow(async_fn_in_trait)]
pub trait TrackingApi {
    /// Every run in the project, across all pages.
    async fn list_runs(&self, project: &ProjectPath) -> Result<Vec<Run>>;

    async fn fetch_run(&self, project: &ProjectPath, run_id: &str) -> Result<Option<Run>>;

    /// Full logged history of `run`, in step order.
    async fn scan_history(&self, project: &ProjectPath, run: &Run) -> Result<Vec<MetricRow>>;

    async fn list_files(&self, project: &ProjectPath, run: &Run) -> Result<Vec<RunFile>>;

    async fn find_file(
        &self,
        project: &ProjectPath,
        run: &Run,
        name: &str,
    ) -> Result<Option<RunFile>>;

    /// Write the contents of `file` to `dest`, replacing it if present.
    async fn download_file(&self, file: &RunFile, dest: &Path) -> Result<()>;

    async fn delete_files(&self, project: &ProjectPath, run: &Run, files: &[RunFile])
        -> Result<()>;

    async fn list_artifacts(&self, project: &ProjectPath, run: &Run) -> Result<Vec<Artifact>>;

    /// Delete an artifact version together with its aliases.
    async fn delete_artifact(&self, artifact: &Artifact) -> Result<()>;

    async fn upsert_run(&self, request: &UpsertRun) -> Result<Run>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::TrackingApi;
    use crate::model::{Artifact, MetricRow, ProjectPath, Run, RunFile, UpsertRun};
    use anyhow::{Context, Result};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    /// In-memory project that records every mutation.
    #[derive(Default)]
    pub struct FakeApi {
        pub runs: RefCell<Vec<Run>>,
        pub history: HashMap<String, Vec<MetricRow>>,
        pub files: HashMap<String, Vec<(RunFile, Vec<u8>)>>,
        pub artifacts: HashMap<String, Vec<Artifact>>,
        pub deleted_files: RefCell<Vec<String>>,
        pub deleted_artifacts: RefCell<Vec<String>>,
        pub downloads: RefCell<Vec<PathBuf>>,
        pub upserts: RefCell<Vec<UpsertRun>>,
        pub history_scans: RefCell<usize>,
        /// Created runs are not listed afterwards, like a lagging backend.
        pub hide_upserts: bool,
    }

    pub fn run(id: &str, name: &str) -> Run {
        Run {
            id: id.into(),
            name: name.into(),
            storage_id: format!("storage-{id}"),
            updated_at: None,
        }
    }

    pub fn file(name: &str) -> RunFile {
        RunFile {
            storage_id: format!("file-{name}"),
            name: name.into(),
            url: None,
            size_bytes: None,
            updated_at: None,
        }
    }

    impl FakeApi {
        pub fn with_runs(runs: Vec<Run>) -> Self {
            Self {
                runs: RefCell::new(runs),
                ..Default::default()
            }
        }

        pub fn add_file(&mut self, run_id: &str, file: RunFile, contents: &[u8]) {
            self.files
                .entry(run_id.to_string())
                .or_default()
                .push((file, contents.to_vec()));
        }
    }

    impl TrackingApi for FakeApi {
        async fn list_runs(&self, _project: &ProjectPath) -> Result<Vec<Run>> {
            Ok(self.runs.borrow().clone())
        }

        async fn fetch_run(&self, _project: &ProjectPath, run_id: &str) -> Result<Option<Run>> {
            Ok(self.runs.borrow().iter().find(|r| r.id == run_id).cloned())
        }

        async fn scan_history(&self, _project: &ProjectPath, run: &Run) -> Result<Vec<MetricRow>> {
            *self.history_scans.borrow_mut() += 1;
            Ok(self.history.get(&run.id).cloned().unwrap_or_default())
        }

        async fn list_files(&self, _project: &ProjectPath, run: &Run) -> Result<Vec<RunFile>> {
            Ok(self
                .files
                .get(&run.id)
                .map(|fs| fs.iter().map(|(f, _)| f.clone()).collect())
                .unwrap_or_default())
        }

        async fn find_file(
            &self,
            project: &ProjectPath,
            run: &Run,
            name: &str,
        ) -> Result<Option<RunFile>> {
            let files = self.list_files(project, run).await?;
            Ok(files.into_iter().find(|f| f.name == name))
        }

        async fn download_file(&self, file: &RunFile, dest: &Path) -> Result<()> {
            let contents = self
                .files
                .values()
                .flatten()
                .find(|(f, _)| f.storage_id == file.storage_id)
                .map(|(_, c)| c.clone())
                .context("unknown file")?;
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(dest, contents)?;
            self.downloads.borrow_mut().push(dest.to_path_buf());
            Ok(())
        }

        async fn delete_files(
            &self,
            _project: &ProjectPath,
            _run: &Run,
            files: &[RunFile],
        ) -> Result<()> {
            self.deleted_files
                .borrow_mut()
                .extend(files.iter().map(|f| f.name.clone()));
            Ok(())
        }

        async fn list_artifacts(&self, _project: &ProjectPath, run: &Run) -> Result<Vec<Artifact>> {
            Ok(self.artifacts.get(&run.id).cloned().unwrap_or_default())
        }

        async fn delete_artifact(&self, artifact: &Artifact) -> Result<()> {
            self.deleted_artifacts.borrow_mut().push(artifact.name.clone());
            Ok(())
        }

        async fn upsert_run(&self, request: &UpsertRun) -> Result<Run> {
            self.upserts.borrow_mut().push(request.clone());
            let created = Run {
                id: request.id.clone(),
                name: request.display_name.clone(),
                storage_id: format!("storage-{}", request.id),
                updated_at: None,
            };
            if !self.hide_upserts {
                self.runs.borrow_mut().push(created.clone());
            }
            Ok(created)
        }
    }
}
