//! Orchestration layer for IO-bound pipeline services.
//!
//! Modules exposed here coordinate external systems (document storage, the
//! analysis service, the job store) and must avoid embedding pure transforms.
//! Keep stateless extraction logic in `crate::pipeline` so concurrency and
//! resource accounting stay localized.

pub mod analysis;
pub mod context;
pub mod documents;
pub mod export;
pub mod jobs;
pub mod launcher;
pub mod notifications;
pub mod organizer;
pub mod recovery;
pub mod retriever;

pub use analysis::HttpAnalysisClient;
pub use context::{
    build_pipeline_context, AnalysisClient, AnalysisError, AnalysisPage, DocumentLocation,
    FeatureType, GenericRateLimiter, NotificationTarget, PipelineContext, PipelineError,
    PipelineResult, ServiceJobStatus,
};
pub use documents::{DocumentStore, DocumentStoreError, FsDocumentStore};
pub use export::{
    export_batch_summary, ExportError, ExportSummary, FailedExport, SummaryRow, SummaryWriter,
};
pub use jobs::{FailureReason, JobRecord, JobStatus, JobStore, JobStoreError, Transition};
pub use launcher::{
    launch_batch, FailedLaunch, LaunchSummary, StartedJob, ANALYSIS_FEATURES,
};
pub use notifications::{
    handle_batch, output_key_for, parse_envelope, process_succeeded_job, AnalysisOutput,
    CompletionPayload, EnvelopeError, NotificationBatch, NotificationEnvelope,
    NotificationFailure, NotificationSummary, OutputMetadata,
};
pub use organizer::{organize_batches, FailedCopy, OrganizeSummary};
pub use recovery::{recover_stalled_jobs, stalled_job_count, RecoveryReport};
pub use retriever::retrieve_all_blocks;
