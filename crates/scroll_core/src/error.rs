use shared::{
    domain::{Epoch, PageIndex},
    error::{ErrorCode, FetchFailureReport},
    protocol::FetchKind,
};
use thiserror::Error;

/// Any failure raised by a page source, tagged with the fetch it belonged to.
#[derive(Debug, Error)]
#[error("{kind} fetch of page {page} failed in epoch {epoch}: {source}")]
pub struct FetchFailure {
    pub epoch: Epoch,
    pub page: PageIndex,
    pub kind: FetchKind,
    pub source: anyhow::Error,
}

impl FetchFailure {
    pub fn report(&self) -> FetchFailureReport {
        FetchFailureReport {
            code: ErrorCode::FetchFailed,
            epoch: self.epoch,
            page: self.page,
            kind: self.kind,
            message: format!("{:#}", self.source),
        }
    }
}
