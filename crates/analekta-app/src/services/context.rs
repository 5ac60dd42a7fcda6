use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use thiserror::Error;

use crate::config::AppConfig;
use crate::paths::{AppPaths, PathError};
use crate::pipeline::Block;
use crate::services::analysis::HttpAnalysisClient;
use crate::services::documents::{DocumentStore, DocumentStoreError, FsDocumentStore};
use crate::services::jobs::{JobStore, JobStoreError};

pub type GenericRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Where an input document lives in the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLocation {
    pub bucket: String,
    pub key: String,
}

/// Analysis features requested at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureType {
    Forms,
    Tables,
}

impl FeatureType {
    pub fn as_wire(self) -> &'static str {
        match self {
            FeatureType::Forms => "FORMS",
            FeatureType::Tables => "TABLES",
        }
    }
}

/// Completion-notification channel registered with the analysis service at
/// submission, plus the identity the service assumes to publish into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTarget {
    pub channel: String,
    pub role: String,
}

/// One page of a job's block output.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPage {
    pub blocks: Vec<Block>,
    pub next_token: Option<String>,
    pub job_status: ServiceJobStatus,
}

/// Authoritative job status as reported by the analysis service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceJobStatus {
    InProgress,
    Succeeded,
    Failed,
    PartialSuccess,
    Other(String),
}

impl ServiceJobStatus {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "IN_PROGRESS" => ServiceJobStatus::InProgress,
            "SUCCEEDED" => ServiceJobStatus::Succeeded,
            "FAILED" => ServiceJobStatus::Failed,
            "PARTIAL_SUCCESS" => ServiceJobStatus::PartialSuccess,
            other => ServiceJobStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ServiceJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceJobStatus::InProgress => write!(f, "IN_PROGRESS"),
            ServiceJobStatus::Succeeded => write!(f, "SUCCEEDED"),
            ServiceJobStatus::Failed => write!(f, "FAILED"),
            ServiceJobStatus::PartialSuccess => write!(f, "PARTIAL_SUCCESS"),
            ServiceJobStatus::Other(raw) => write!(f, "{raw}"),
        }
    }
}

/// Errors emitted by analysis-service clients.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The job id is unknown to the service — it either never existed or
    /// aged past the retention window.
    #[error("job `{0}` is unknown or expired")]
    UnknownJob(String),
    #[error("analysis service rejected the request: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response shape: {0}")]
    Malformed(String),
}

/// Client seam for the asynchronous document-analysis service. Injectable so
/// orchestrators can run against test doubles.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Submit one document for analysis; returns the service-assigned job id.
    async fn start_analysis(
        &self,
        location: &DocumentLocation,
        features: &[FeatureType],
        notification: &NotificationTarget,
    ) -> Result<String, AnalysisError>;

    /// Fetch one page of a job's blocks, following `next_token` pagination.
    async fn get_analysis(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<AnalysisPage, AnalysisError>;
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Documents(#[from] DocumentStoreError),
    #[error(transparent)]
    Jobs(#[from] JobStoreError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn message(msg: impl Into<String>) -> Self {
        PipelineError::Message(msg.into())
    }
}

/// Explicitly constructed handles shared by every orchestrator. All fields
/// are injectable; `build_pipeline_context` wires the production set.
pub struct PipelineContext {
    pub paths: AppPaths,
    pub analysis: Arc<dyn AnalysisClient>,
    pub documents: Arc<dyn DocumentStore>,
    pub jobs: Arc<JobStore>,
    pub source_bucket: String,
    pub output_bucket: String,
    pub output_prefix: String,
}

pub fn build_pipeline_context(config: &AppConfig) -> PipelineResult<PipelineContext> {
    let paths = AppPaths::new(&config.storage.data_dir)?;
    let documents_root = paths.documents_dir()?;

    let quota = Quota::per_second(NonZeroU32::new(8).expect("quota must be non-zero"));
    let limiter = Arc::new(RateLimiter::direct(quota));
    let analysis = HttpAnalysisClient::new(
        config.analysis.endpoint.clone(),
        config.analysis.api_key.clone(),
        Some(limiter),
    )?;

    let documents = FsDocumentStore::new(documents_root);
    let jobs = JobStore::open(&paths)?;

    Ok(PipelineContext {
        paths,
        analysis: Arc::new(analysis),
        documents: Arc::new(documents),
        jobs: Arc::new(jobs),
        source_bucket: config.storage.source_bucket.clone(),
        output_bucket: config.storage.output_bucket.clone(),
        output_prefix: config.storage.output_prefix.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_status_wire_round_trip() {
        for raw in ["IN_PROGRESS", "SUCCEEDED", "FAILED", "PARTIAL_SUCCESS"] {
            assert_eq!(ServiceJobStatus::from_wire(raw).to_string(), raw);
        }
        let other = ServiceJobStatus::from_wire("THROTTLED");
        assert_eq!(other, ServiceJobStatus::Other("THROTTLED".to_string()));
        assert_eq!(other.to_string(), "THROTTLED");
    }

    #[test]
    fn feature_types_use_the_wire_names() {
        assert_eq!(FeatureType::Forms.as_wire(), "FORMS");
        assert_eq!(FeatureType::Tables.as_wire(), "TABLES");
    }
}
