//! Error taxonomy (§7). Mirrors the teacher's split between
//! `thiserror` for structured, match-on-me errors and `anyhow` at the
//! orchestration boundary (`other_examples/.../hybrid.rs`'s
//! `SearchError` enum is the closest structural precedent for a
//! multi-stage retrieval pipeline's error type).

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Vector,
    Graph,
    Search,
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            View::Vector => write!(f, "vector"),
            View::Graph => write!(f, "graph"),
            View::Search => write!(f, "search"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed for field '{field}': {message} (value: {value})")]
    Validation {
        field: String,
        message: String,
        value: String,
    },

    #[error("storage error in {view} view during '{op}': {cause}")]
    Storage {
        view: View,
        op: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("operation timed out: {where_}")]
    Timeout { where_: String },

    #[error("integrity violation for provenance record '{provenance_id}'")]
    IntegrityViolation { provenance_id: String },

    #[error("require_evidence was set but no supporting chunk could be linked")]
    EvidenceMissing,

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>, value: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.into(),
            message: message.into(),
            value: value.into(),
        }
    }

    pub fn storage(
        view: View,
        op: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        EngineError::Storage {
            view,
            op: op.into(),
            cause: Box::new(cause),
        }
    }

    pub fn timeout(where_: impl Into<String>) -> Self {
        EngineError::Timeout {
            where_: where_.into(),
        }
    }

    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Aggregates `StorageError`s from multiple views into one message.
    /// Per §4.1/§7, the write path never rolls back — it reports the
    /// union of per-view failures instead.
    pub fn multi_storage(failures: Vec<(View, String, String)>) -> Self {
        let message = failures
            .iter()
            .map(|(view, op, cause)| format!("{view}/{op}: {cause}"))
            .collect::<Vec<_>>()
            .join("; ");
        EngineError::Other(anyhow::anyhow!("multiple storage failures: {message}"))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
