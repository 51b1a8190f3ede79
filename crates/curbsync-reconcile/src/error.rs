use curbsync_api::ApiError;
use curbsync_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("status intent storage error: {0}")]
    Storage(#[from] CoreError),
    #[error("fleet api error: {0}")]
    Api(#[from] ApiError),
    #[error("status monitor error: {0}")]
    Monitor(String),
}
