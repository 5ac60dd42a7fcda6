//! Out-of-band reconciliation for jobs whose completion notification was
//! never delivered.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::constants::RECOVERY_SCAN_LIMIT;
use crate::services::context::{AnalysisError, PipelineContext, PipelineError, ServiceJobStatus};
use crate::services::jobs::FailureReason;
use crate::services::notifications::process_succeeded_job;

/// Report of one recovery pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Jobs whose output was produced by this pass.
    pub recovered: Vec<String>,
    /// Jobs that expired out of the service's retention window, or errored
    /// while being reconciled.
    pub failed: Vec<String>,
    /// Jobs still running (or in a state this pass does not touch).
    pub skipped: usize,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.recovered.is_empty() && self.failed.is_empty() && self.skipped == 0
    }

    pub fn total(&self) -> usize {
        self.recovered.len() + self.failed.len() + self.skipped
    }
}

/// Number of records a recovery pass would examine, for confirmation prompts.
pub fn stalled_job_count(ctx: &PipelineContext) -> Result<usize, PipelineError> {
    Ok(ctx.jobs.list_in_progress(RECOVERY_SCAN_LIMIT)?.len())
}

/// Walk every `IN_PROGRESS` record and reconcile it against the analysis
/// service's authoritative status. Records are processed sequentially;
/// per-record errors are tallied and never halt the scan.
pub async fn recover_stalled_jobs(
    ctx: &PipelineContext,
) -> Result<RecoveryReport, PipelineError> {
    let stalled = ctx.jobs.list_in_progress(RECOVERY_SCAN_LIMIT)?;
    tracing::info!(stalled = stalled.len(), "recovery scan started");

    let mut report = RecoveryReport::default();

    for record in stalled {
        let job_id = record.job_id.clone();
        match ctx.analysis.get_analysis(&job_id, None).await {
            Ok(page) => match page.job_status {
                ServiceJobStatus::Succeeded => {
                    match process_succeeded_job(ctx, &record, true).await {
                        Ok(output_key) => {
                            tracing::info!(
                                job_id = job_id.as_str(),
                                output_key = output_key.as_str(),
                                "recovered job"
                            );
                            report.recovered.push(job_id);
                        }
                        Err(err) => {
                            tracing::warn!(job_id = job_id.as_str(), error = %err, "recovery failed");
                            report.failed.push(job_id);
                        }
                    }
                }
                status => {
                    // Still running, or a failure state the notification path
                    // owns; this pass leaves the record alone.
                    tracing::debug!(job_id = job_id.as_str(), status = %status, "skipping job");
                    report.skipped += 1;
                }
            },
            Err(AnalysisError::UnknownJob(_)) => {
                tracing::warn!(
                    job_id = job_id.as_str(),
                    "job aged out of the service's retention window"
                );
                if let Err(err) =
                    ctx.jobs
                        .fail_if_in_progress(&job_id, FailureReason::Expired, Utc::now())
                {
                    tracing::warn!(job_id = job_id.as_str(), error = %err, "unable to persist expiry");
                }
                report.failed.push(job_id);
            }
            Err(err) => {
                tracing::warn!(job_id = job_id.as_str(), error = %err, "status query failed");
                report.failed.push(job_id);
            }
        }
    }

    tracing::info!(
        recovered = report.recovered.len(),
        failed = report.failed.len(),
        skipped = report.skipped,
        "recovery scan finished"
    );
    Ok(report)
}
