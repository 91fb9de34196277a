//! GraphQL client for the Weights & Biases API.

use super::models::{
    ArtifactsField, Connection, FilesField, GraphQlResponse, HistoryField, HistoryKeysField,
    ProjectData, RunNode, RunScope, RunsField, UpsertData,
};
use super::queries;
use super::TrackingApi;
use crate::config::ClientConfig;
use crate::error::AdminError;
use crate::model::{Artifact, MetricRow, ProjectPath, Run, RunFile, UpsertRun};
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const PAGE_SIZE: u64 = 50;
const HISTORY_PAGE_SIZE: i64 = 1000;

pub struct WandbClient {
    http: Client,
    graphql_url: String,
    api_key: String,
}

impl WandbClient {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            http,
            graphql_url: format!("{}/graphql", cfg.base_url),
            api_key: cfg.api_key.clone(),
        })
    }

    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        let response = self
            .http
            .post(&self.graphql_url)
            .basic_auth("api", Some(&self.api_key))
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .context("failed to send GraphQL request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdminError::Api {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let parsed: GraphQlResponse<T> = response
            .json()
            .await
            .context("failed to decode GraphQL response")?;
        if !parsed.errors.is_empty() {
            return Err(
                AdminError::GraphQl(parsed.errors.into_iter().map(|e| e.message).collect()).into(),
            );
        }
        parsed
            .data
            .ok_or_else(|| anyhow::anyhow!("GraphQL response carried no data"))
    }

    /// Query a field under `project { run(name:) { ... } }`.
    async fn run_scoped<T: DeserializeOwned>(
        &self,
        query: &str,
        project: &ProjectPath,
        run_id: &str,
        extra: Value,
    ) -> Result<Option<T>> {
        let mut variables = json!({
            "project": project.project,
            "entity": project.entity,
            "name": run_id,
        });
        if let (Some(vars), Value::Object(extra)) = (variables.as_object_mut(), extra) {
            vars.extend(extra);
        }
        let data: ProjectData<RunScope<T>> = self.graphql(query, variables).await?;
        Ok(data.project.and_then(|p| p.run))
    }

    async fn run_files(
        &self,
        project: &ProjectPath,
        run: &Run,
        names: &[&str],
    ) -> Result<Vec<RunFile>> {
        let mut files = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page: Option<FilesField> = self
                .run_scoped(
                    queries::RUN_FILES,
                    project,
                    &run.id,
                    json!({ "fileCursor": cursor, "fileLimit": PAGE_SIZE, "fileNames": names }),
                )
                .await?;
            let Some(page) = page else {
                return Err(missing_run(project, run).into());
            };
            let (nodes, next) = drain(page.files);
            files.extend(nodes.into_iter().map(RunFile::from));
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        Ok(files)
    }
}

fn missing_run(project: &ProjectPath, run: &Run) -> AdminError {
    AdminError::missing(format!(
        "run {} ({}) not found in {}",
        run.name, run.id, project
    ))
}

/// `JSONString` fields arrive as embedded JSON text.
fn json_string(value: Value) -> Result<Value> {
    match value {
        Value::String(raw) => serde_json::from_str(&raw).context("failed to decode JSON string field"),
        other => Ok(other),
    }
}

/// Split a page into its nodes and the cursor of the next page, if any.
fn drain<N>(conn: Connection<N>) -> (Vec<N>, Option<String>) {
    let next = if conn.page_info.has_next_page {
        conn.page_info.end_cursor
    } else {
        None
    };
    (conn.edges.into_iter().map(|e| e.node).collect(), next)
}

impl TrackingApi for WandbClient {
    async fn list_runs(&self, project: &ProjectPath) -> Result<Vec<Run>> {
        let mut runs = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let data: ProjectData<RunsField> = self
                .graphql(
                    queries::PROJECT_RUNS,
                    json!({
                        "project": project.project,
                        "entity": project.entity,
                        "cursor": cursor,
                        "perPage": PAGE_SIZE,
                    }),
                )
                .await?;
            let page = data.project.ok_or_else(|| {
                AdminError::missing(format!(
                    "project {project} not found; verify entity and project are correct"
                ))
            })?;
            let (nodes, next) = drain(page.runs);
            runs.extend(nodes.into_iter().map(Run::from));
            debug!(count = runs.len(), "fetched runs page");
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        Ok(runs)
    }

    async fn fetch_run(&self, project: &ProjectPath, run_id: &str) -> Result<Option<Run>> {
        let node: Option<RunNode> = self
            .run_scoped(queries::RUN, project, run_id, json!({}))
            .await?;
        Ok(node.map(Run::from))
    }

    async fn scan_history(&self, project: &ProjectPath, run: &Run) -> Result<Vec<MetricRow>> {
        let keys: Option<HistoryKeysField> = self
            .run_scoped(queries::HISTORY_KEYS, project, &run.id, json!({}))
            .await?;
        let keys = keys.ok_or_else(|| missing_run(project, run))?;
        let last_step = match keys.history_keys {
            Some(raw) => json_string(raw)?.get("lastStep").and_then(Value::as_i64),
            None => None,
        };
        let Some(last_step) = last_step else {
            return Ok(Vec::new());
        };

        let mut rows = Vec::new();
        let mut min_step = 0i64;
        while min_step <= last_step {
            let max_step = min_step + HISTORY_PAGE_SIZE;
            let page: Option<HistoryField> = self
                .run_scoped(
                    queries::HISTORY_PAGE,
                    project,
                    &run.id,
                    json!({ "minStep": min_step, "maxStep": max_step, "pageSize": HISTORY_PAGE_SIZE }),
                )
                .await?;
            let page = page.ok_or_else(|| missing_run(project, run))?;
            for raw in page.history {
                let entry: serde_json::Map<String, Value> =
                    serde_json::from_str(&raw).context("failed to decode history row")?;
                if let Some(row) = MetricRow::from_history(entry) {
                    rows.push(row);
                }
            }
            debug!(min_step, max_step, rows = rows.len(), "fetched history page");
            min_step = max_step;
        }
        Ok(rows)
    }

    async fn list_files(&self, project: &ProjectPath, run: &Run) -> Result<Vec<RunFile>> {
        self.run_files(project, run, &[]).await
    }

    async fn find_file(
        &self,
        project: &ProjectPath,
        run: &Run,
        name: &str,
    ) -> Result<Option<RunFile>> {
        let files = self.run_files(project, run, &[name]).await?;
        Ok(files.into_iter().find(|f| f.name == name))
    }

    async fn download_file(&self, file: &RunFile, dest: &Path) -> Result<()> {
        let url = file
            .url
            .as_deref()
            .ok_or_else(|| AdminError::missing(format!("file {} has no download URL", file.name)))?;

        let response = self
            .http
            .get(url)
            .basic_auth("api", Some(&self.api_key))
            .send()
            .await
            .with_context(|| format!("failed to request {}", file.name))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdminError::Api {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut out = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk.with_context(|| format!("failed to read {}", file.name))?;
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        Ok(())
    }

    async fn delete_files(
        &self,
        _project: &ProjectPath,
        _run: &Run,
        files: &[RunFile],
    ) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = files.iter().map(|f| f.storage_id.as_str()).collect();
        let _: Value = self
            .graphql(queries::DELETE_FILES, json!({ "files": ids }))
            .await?;
        Ok(())
    }

    async fn list_artifacts(&self, project: &ProjectPath, run: &Run) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page: Option<ArtifactsField> = self
                .run_scoped(
                    queries::RUN_OUTPUT_ARTIFACTS,
                    project,
                    &run.id,
                    json!({ "cursor": cursor, "perPage": PAGE_SIZE }),
                )
                .await?;
            let page = page.ok_or_else(|| missing_run(project, run))?;
            let (nodes, next) = drain(page.output_artifacts);
            artifacts.extend(nodes.into_iter().map(Artifact::from));
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }
        Ok(artifacts)
    }

    async fn delete_artifact(&self, artifact: &Artifact) -> Result<()> {
        let _: Value = self
            .graphql(
                queries::DELETE_ARTIFACT,
                json!({ "artifactID": artifact.storage_id, "deleteAliases": true }),
            )
            .await?;
        Ok(())
    }

    async fn upsert_run(&self, request: &UpsertRun) -> Result<Run> {
        let data: UpsertData = self
            .graphql(
                queries::UPSERT_RUN,
                json!({
                    "name": request.id,
                    "project": request.project.project,
                    "entity": request.project.entity,
                    "displayName": request.display_name,
                    "forkFrom": request.fork_from,
                }),
            )
            .await?;
        let payload = data
            .upsert_bucket
            .ok_or_else(|| anyhow::anyhow!("upsert of run {} returned no run", request.id))?;
        Ok(Run::from(payload.bucket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::PageInfo;

    #[test]
    fn history_keys_decode_from_text_or_object() {
        let text = Value::String(r#"{"lastStep": 41, "keys": {}}"#.into());
        assert_eq!(json_string(text).unwrap()["lastStep"], 41);
        let object = json!({ "lastStep": 7 });
        assert_eq!(json_string(object).unwrap()["lastStep"], 7);
        assert!(json_string(Value::String("{".into())).is_err());
    }

    #[test]
    fn drain_stops_on_last_page() {
        let conn = Connection {
            edges: vec![],
            page_info: PageInfo {
                end_cursor: Some("abc".into()),
                has_next_page: false,
            },
        };
        let (nodes, next): (Vec<u8>, _) = drain(conn);
        assert!(nodes.is_empty());
        assert_eq!(next, None);
    }

    #[test]
    fn graphql_url_drops_nothing_from_base() {
        let cfg = ClientConfig {
            base_url: "https://wandb.example.com".into(),
            api_key: "key".into(),
            request_timeout: std::time::Duration::from_secs(5),
            user_agent: "test".into(),
        };
        let client = WandbClient::new(&cfg).unwrap();
        assert_eq!(client.graphql_url, "https://wandb.example.com/graphql");
    }
}
