//! Response shapes for the GraphQL documents in `queries`.

use crate::model::{Artifact, Run, RunFile};
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

#[derive(Debug, Deserialize)]
pub(super) struct GraphQlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GraphQlError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ProjectData<T> {
    pub project: Option<T>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RunScope<T> {
    pub run: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Connection<N> {
    pub edges: Vec<Edge<N>>,
    pub page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
pub(super) struct Edge<N> {
    pub node: N,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PageInfo {
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct RunsField {
    pub runs: Connection<RunNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RunNode {
    pub id: String,
    pub name: String,
    pub display_name: Option<String>,
    pub updated_at: Option<String>,
}

impl From<RunNode> for Run {
    fn from(node: RunNode) -> Self {
        // `name` is the run id; `displayName` is what users see and select by.
        let name = node.display_name.unwrap_or_else(|| node.name.clone());
        Run {
            id: node.name,
            name,
            storage_id: node.id,
            updated_at: node.updated_at.as_deref().and_then(parse_timestamp),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct HistoryKeysField {
    /// JSON blob; only `lastStep` is read.
    pub history_keys: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct HistoryField {
    #[serde(default)]
    pub history: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct FilesField {
    pub files: Connection<FileNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct FileNode {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub direct_url: Option<String>,
    pub size_bytes: Option<u64>,
    pub updated_at: Option<String>,
}

impl From<FileNode> for RunFile {
    fn from(node: FileNode) -> Self {
        RunFile {
            storage_id: node.id,
            name: node.name,
            // The API url accepts basic auth; the direct url is a fallback.
            url: node.url.or(node.direct_url),
            size_bytes: node.size_bytes,
            updated_at: node.updated_at.as_deref().and_then(parse_timestamp),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ArtifactsField {
    pub output_artifacts: Connection<ArtifactNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ArtifactNode {
    pub id: String,
    pub version_index: Option<u64>,
    pub updated_at: Option<String>,
    pub created_at: Option<String>,
    #[serde(default)]
    pub aliases: Vec<AliasNode>,
    pub artifact_sequence: SequenceNode,
}

#[derive(Debug, Deserialize)]
pub(super) struct AliasNode {
    pub alias: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct SequenceNode {
    pub name: String,
}

impl From<ArtifactNode> for Artifact {
    fn from(node: ArtifactNode) -> Self {
        let name = match node.version_index {
            Some(v) => format!("{}:v{}", node.artifact_sequence.name, v),
            None => node.artifact_sequence.name,
        };
        let updated_at = node
            .updated_at
            .as_deref()
            .or(node.created_at.as_deref())
            .and_then(parse_timestamp);
        Artifact {
            storage_id: node.id,
            name,
            aliases: node.aliases.into_iter().map(|a| a.alias).collect(),
            updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UpsertData {
    pub upsert_bucket: Option<UpsertPayload>,
}

#[derive(Debug, Deserialize)]
pub(super) struct UpsertPayload {
    pub bucket: RunNode,
}

/// Parse the service's timestamps, which may omit the UTC offset.
pub(crate) fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(t) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(t);
    }
    let naive = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    PrimitiveDateTime::parse(raw, naive)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn timestamps_with_and_without_offset() {
        assert_eq!(
            parse_timestamp("2024-05-01T12:30:00Z"),
            Some(datetime!(2024-05-01 12:30 UTC))
        );
        assert_eq!(
            parse_timestamp("2024-05-01T12:30:00"),
            Some(datetime!(2024-05-01 12:30 UTC))
        );
        assert_eq!(
            parse_timestamp("2024-05-01T12:30:00.250"),
            Some(datetime!(2024-05-01 12:30:00.25 UTC))
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn artifact_name_includes_version() {
        let node: ArtifactNode = serde_json::from_value(serde_json::json!({
            "id": "QXJ0aWZhY3Q6MQ==",
            "versionIndex": 3,
            "updatedAt": null,
            "createdAt": "2024-01-02T00:00:00",
            "aliases": [{"alias": "latest"}],
            "artifactSequence": {"name": "run-abc-pred_final"}
        }))
        .unwrap();
        let artifact = Artifact::from(node);
        assert_eq!(artifact.name, "run-abc-pred_final:v3");
        assert_eq!(artifact.aliases, vec!["latest"]);
        assert_eq!(artifact.updated_at, Some(datetime!(2024-01-02 00:00 UTC)));
    }

    #[test]
    fn run_node_prefers_display_name() {
        let node: RunNode = serde_json::from_value(serde_json::json!({
            "id": "UnVuOnYx",
            "name": "1a2b3c4d",
            "displayName": "m2f_r50_city",
            "updatedAt": "2024-01-02T00:00:00"
        }))
        .unwrap();
        let run = Run::from(node);
        assert_eq!(run.id, "1a2b3c4d");
        assert_eq!(run.name, "m2f_r50_city");
        assert_eq!(run.storage_id, "UnVuOnYx");
    }
}
