//! Copy-based batching of loose input documents.

use serde::Serialize;

use crate::services::context::{PipelineError, PipelineResult};
use crate::services::documents::DocumentStore;

#[derive(Debug, Clone, Serialize)]
pub struct FailedCopy {
    pub key: String,
    pub error: String,
}

/// Aggregate result of one organization pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrganizeSummary {
    pub total_files: usize,
    pub total_batches: usize,
    pub copied: usize,
    pub failed: Vec<FailedCopy>,
}

/// Copy every loose `.pdf` in `bucket` into `batch-N/` prefixes holding at
/// most `batch_size` documents each. Documents already under a `batch-`
/// prefix are left where they are, so re-running after new uploads only
/// creates batches for the new files. Copy failures are isolated per file.
pub async fn organize_batches(
    documents: &dyn DocumentStore,
    bucket: &str,
    batch_size: usize,
) -> PipelineResult<OrganizeSummary> {
    if batch_size == 0 {
        return Err(PipelineError::message("batch size must be greater than zero"));
    }

    let keys = documents.list(bucket, "").await?;
    let loose: Vec<String> = keys
        .into_iter()
        .filter(|key| key.ends_with(".pdf") && !key.starts_with("batch-"))
        .collect();

    let total_files = loose.len();
    let total_batches = total_files.div_ceil(batch_size);
    tracing::info!(bucket, total_files, total_batches, "organizing documents");

    let mut summary = OrganizeSummary {
        total_files,
        total_batches,
        ..OrganizeSummary::default()
    };

    for (ordinal, key) in loose.iter().enumerate() {
        let batch_number = ordinal / batch_size + 1;
        let filename = key.rsplit('/').next().unwrap_or(key);
        let target = format!("batch-{batch_number}/{filename}");

        match documents.copy(bucket, key, &target).await {
            Ok(()) => {
                summary.copied += 1;
                if summary.copied % 100 == 0 {
                    tracing::info!(copied = summary.copied, total_files, "organization progress");
                }
            }
            Err(err) => {
                tracing::warn!(key = key.as_str(), error = %err, "failed to copy document");
                summary.failed.push(FailedCopy {
                    key: key.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    Ok(summary)
}
