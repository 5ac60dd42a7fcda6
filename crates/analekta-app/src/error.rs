//! Application-level error type shared across the binary's command paths.

use std::path::PathBuf;

use inquire::InquireError;
use thiserror::Error;

use crate::config::AppConfigError;
use crate::paths::PathError;
use crate::server::ServerError;
use crate::services::context::{AnalysisError, PipelineError};
use crate::services::documents::DocumentStoreError;
use crate::services::export::ExportError;
use crate::services::jobs::JobStoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    ConfigLoad(#[from] AppConfigError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Paths(#[from] PathError),
    #[error(transparent)]
    Jobs(#[from] Box<JobStoreError>),
    #[error(transparent)]
    Documents(#[from] DocumentStoreError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to read input file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("recovery cancelled")]
    RecoveryCancelled,
    #[error("failed to read confirmation input: {source}")]
    PromptFailed {
        #[source]
        source: InquireError,
    },
}

impl From<JobStoreError> for AppError {
    fn from(e: JobStoreError) -> Self {
        AppError::Jobs(Box::new(e))
    }
}
