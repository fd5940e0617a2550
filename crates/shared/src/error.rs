use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryParamsError {
    #[error("expected key=value, got '{0}'")]
    MissingSeparator(String),
    #[error("empty parameter key in '{0}'")]
    EmptyKey(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    FetchFailed,
}

/// Serializable view of a failed page fetch, suitable for a diagnostics
/// channel. The original error chain is flattened into `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailureReport {
    pub code: ErrorCode,
    pub epoch: crate::domain::Epoch,
    pub page: crate::domain::PageIndex,
    pub kind: crate::protocol::FetchKind,
    pub message: String,
}
