//! GraphQL documents sent to the tracking service.

pub(super) const PROJECT_RUNS: &str = r#"
query ProjectRuns($project: String!, $entity: String!, $cursor: String, $perPage: Int = 50) {
    project(name: $project, entityName: $entity) {
        runs(first: $perPage, after: $cursor) {
            edges { node { id name displayName updatedAt } cursor }
            pageInfo { endCursor hasNextPage }
        }
    }
}
"#;

pub(super) const RUN: &str = r#"
query Run($project: String!, $entity: String!, $name: String!) {
    project(name: $project, entityName: $entity) {
        run(name: $name) { id name displayName updatedAt }
    }
}
"#;

pub(super) const HISTORY_KEYS: &str = r#"
query HistoryKeys($project: String!, $entity: String!, $name: String!) {
    project(name: $project, entityName: $entity) {
        run(name: $name) { historyKeys }
    }
}
"#;

pub(super) const HISTORY_PAGE: &str = r#"
query HistoryPage($project: String!, $entity: String!, $name: String!, $minStep: Int64!, $maxStep: Int64!, $pageSize: Int!) {
    project(name: $project, entityName: $entity) {
        run(name: $name) {
            history(minStep: $minStep, maxStep: $maxStep, samples: $pageSize)
        }
    }
}
"#;

pub(super) const RUN_FILES: &str = r#"
query RunFiles($project: String!, $entity: String!, $name: String!, $fileCursor: String, $fileLimit: Int = 50, $fileNames: [String] = []) {
    project(name: $project, entityName: $entity) {
        run(name: $name) {
            files(names: $fileNames, after: $fileCursor, first: $fileLimit) {
                edges { node { id name url directUrl sizeBytes updatedAt } cursor }
                pageInfo { endCursor hasNextPage }
            }
        }
    }
}
"#;

pub(super) const DELETE_FILES: &str = r#"
mutation DeleteFiles($files: [ID!]!) {
    deleteFiles(input: { files: $files }) { success }
}
"#;

pub(super) const RUN_OUTPUT_ARTIFACTS: &str = r#"
query RunOutputArtifacts($project: String!, $entity: String!, $name: String!, $cursor: String, $perPage: Int = 50) {
    project(name: $project, entityName: $entity) {
        run(name: $name) {
            outputArtifacts(after: $cursor, first: $perPage) {
                edges {
                    node { id versionIndex updatedAt createdAt aliases { alias } artifactSequence { name } }
                    cursor
                }
                pageInfo { endCursor hasNextPage }
            }
        }
    }
}
"#;

pub(super) const DELETE_ARTIFACT: &str = r#"
mutation DeleteArtifact($artifactID: ID!, $deleteAliases: Boolean) {
    deleteArtifact(input: { artifactID: $artifactID, deleteAliases: $deleteAliases }) {
        artifact { id }
    }
}
"#;

pub(super) const UPSERT_RUN: &str = r#"
mutation UpsertRun($name: String, $project: String, $entity: String, $displayName: String, $forkFrom: String) {
    upsertBucket(input: {
        name: $name,
        modelName: $project,
        entityName: $entity,
        displayName: $displayName,
        forkFrom: $forkFrom
    }) {
        bucket { id name displayName updatedAt }
        inserted
    }
}
"#;
