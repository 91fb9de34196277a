//! Error taxonomy shared by every subcommand.
//!
//! Call sites propagate with `anyhow`; these variants stay downcastable so the
//! entry point and tests can tell a bad flag combination from an ambiguous
//! selector or a failing remote call.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdminError {
    /// Invalid CLI combination, bad regex, missing credentials.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("found {count} {what}, expected one. Candidates: {}", format_candidates(.candidates))]
    Ambiguous {
        what: String,
        count: usize,
        candidates: Vec<String>,
    },

    #[error("found no {what}. Candidates: {}", format_candidates(.candidates))]
    NotFound {
        what: String,
        candidates: Vec<String>,
    },

    /// Expected file, checkpoint, metric or directory is missing.
    #[error("{0}")]
    MissingResource(String),

    #[error("API request failed with status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("GraphQL errors: {}", .0.join("; "))]
    GraphQl(Vec<String>),

    #[error("`{command}` exited with {status}")]
    Subprocess { command: String, status: String },
}

fn format_candidates(candidates: &[String]) -> String {
    if candidates.is_empty() {
        "<none>".to_string()
    } else {
        candidates.join(", ")
    }
}

impl AdminError {
    pub fn config(msg: impl Into<String>) -> Self {
        AdminError::Config(msg.into())
    }

    pub fn missing(msg: impl Into<String>) -> Self {
        AdminError::MissingResource(msg.into())
    }
}
