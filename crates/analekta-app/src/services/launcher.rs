//! Batch submission: one analysis job per input document.

use serde::Serialize;

use crate::services::context::{
    DocumentLocation, FeatureType, NotificationTarget, PipelineContext, PipelineError,
};
use crate::services::jobs::JobRecord;

/// Feature set requested for every submission.
pub const ANALYSIS_FEATURES: [FeatureType; 2] = [FeatureType::Forms, FeatureType::Tables];

#[derive(Debug, Clone, Serialize)]
pub struct StartedJob {
    pub source_key: String,
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedLaunch {
    pub source_key: String,
    pub error: String,
}

/// Aggregate result of one batch launch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LaunchSummary {
    pub batch_prefix: String,
    pub started: Vec<StartedJob>,
    pub failed: Vec<FailedLaunch>,
}

/// Submit every `.pdf` under `batch_prefix` for analysis, recording an
/// `IN_PROGRESS` job record per successful submission. Per-document failures
/// are tallied and never abort the remaining documents.
pub async fn launch_batch(
    ctx: &PipelineContext,
    batch_prefix: &str,
    notification: &NotificationTarget,
) -> Result<LaunchSummary, PipelineError> {
    if notification.channel.trim().is_empty() || notification.role.trim().is_empty() {
        return Err(PipelineError::message(
            "notification channel and role must be configured before launching",
        ));
    }

    let keys = ctx.documents.list(&ctx.source_bucket, batch_prefix).await?;
    let documents: Vec<String> = keys
        .into_iter()
        .filter(|key| key.ends_with(".pdf"))
        .collect();
    tracing::info!(
        batch = batch_prefix,
        documents = documents.len(),
        "starting batch submission"
    );

    let mut summary = LaunchSummary {
        batch_prefix: batch_prefix.to_string(),
        ..LaunchSummary::default()
    };

    for source_key in documents {
        match launch_document(ctx, &source_key, batch_prefix, notification).await {
            Ok(job_id) => {
                tracing::info!(
                    source_key = source_key.as_str(),
                    job_id = job_id.as_str(),
                    "started analysis job"
                );
                summary.started.push(StartedJob { source_key, job_id });
            }
            Err(err) => {
                tracing::warn!(
                    source_key = source_key.as_str(),
                    error = %err,
                    "failed to start analysis job"
                );
                summary.failed.push(FailedLaunch {
                    source_key,
                    error: err.to_string(),
                });
            }
        }
    }

    Ok(summary)
}

async fn launch_document(
    ctx: &PipelineContext,
    source_key: &str,
    batch_prefix: &str,
    notification: &NotificationTarget,
) -> Result<String, PipelineError> {
    let location = DocumentLocation {
        bucket: ctx.source_bucket.clone(),
        key: source_key.to_string(),
    };
    let job_id = ctx
        .analysis
        .start_analysis(&location, &ANALYSIS_FEATURES, notification)
        .await?;

    let record = JobRecord::new(&job_id, source_key, &ctx.source_bucket, batch_prefix);
    ctx.jobs.insert(&record)?;
    Ok(job_id)
}
