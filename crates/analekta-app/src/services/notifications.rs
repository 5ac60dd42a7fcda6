//! Completion-notification handling.
//!
//! Notifications arrive as a batch of transport envelopes; each envelope body
//! is a JSON transport message whose `Message` field is itself a JSON string
//! carrying `{"JobId", "Status"}`. Delivery is at-least-once: duplicates are
//! normal, and re-processing a job that already reached a terminal state is a
//! no-op success, not an error.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::{extract_content, ExtractedContent};
use crate::services::context::{PipelineContext, PipelineError, ServiceJobStatus};
use crate::services::jobs::{FailureReason, JobRecord, JobStoreError, Transition};
use crate::services::retriever::retrieve_all_blocks;

/// A pushed delivery: the transport's record batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationBatch {
    #[serde(rename = "Records")]
    pub records: Vec<NotificationEnvelope>,
}

/// One transport envelope wrapping a JSON string body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub body: String,
}

#[derive(Debug, Deserialize)]
struct TransportMessage {
    #[serde(rename = "Message")]
    message: String,
}

/// The innermost payload of a completion signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionPayload {
    #[serde(rename = "JobId")]
    pub job_id: String,
    #[serde(rename = "Status")]
    pub status: String,
}

/// Unwrap envelope → transport message → payload.
pub fn parse_envelope(envelope: &NotificationEnvelope) -> Result<CompletionPayload, EnvelopeError> {
    let transport: TransportMessage = serde_json::from_str(&envelope.body)
        .map_err(|err| EnvelopeError::Malformed(format!("transport wrapper: {err}")))?;
    let payload: CompletionPayload = serde_json::from_str(&transport.message)
        .map_err(|err| EnvelopeError::Malformed(format!("completion payload: {err}")))?;
    if payload.job_id.is_empty() {
        return Err(EnvelopeError::Malformed(
            "completion payload carried an empty job id".to_string(),
        ));
    }
    Ok(payload)
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed notification envelope: {0}")]
    Malformed(String),
    #[error("notification for unknown job `{0}`")]
    Orphaned(String),
    #[error("analysis service reported terminal status `{0}`")]
    JobFailed(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Metadata attached to every written output object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMetadata {
    pub source_file: String,
    pub bucket: String,
    pub batch: String,
    pub job_id: String,
    pub processed_time: DateTime<Utc>,
    pub total_blocks: usize,
    /// Present only when the recovery path produced the object.
    #[serde(default, skip_serializing_if = "is_false")]
    pub recovered: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// The output object written once per successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    #[serde(flatten)]
    pub content: ExtractedContent,
    pub metadata: OutputMetadata,
}

/// Aggregate result of one notification batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NotificationSummary {
    pub processed: usize,
    pub failed: usize,
    pub failures: Vec<NotificationFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationFailure {
    pub job_id: Option<String>,
    pub error: String,
}

/// Compute the output key for a source document:
/// `<output_prefix>/<batch_prefix><stem>.json`.
pub fn output_key_for(output_prefix: &str, batch_prefix: &str, source_key: &str) -> String {
    let filename = source_key.rsplit('/').next().unwrap_or(source_key);
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);

    let mut key = String::new();
    let prefix = output_prefix.trim_end_matches('/');
    if !prefix.is_empty() {
        key.push_str(prefix);
        key.push('/');
    }
    let batch = batch_prefix.trim_end_matches('/');
    if !batch.is_empty() {
        key.push_str(batch);
        key.push('/');
    }
    key.push_str(stem);
    key.push_str(".json");
    key
}

/// Shared completion path: retrieve every block, extract, write the output
/// object, and flip the record to `COMPLETED`. Used identically by the
/// notification and recovery orchestrators; recovery sets `recovered`.
///
/// The write happens before the state update. A crash in between leaves the
/// record `IN_PROGRESS` with the output already present; the next recovery
/// pass rewrites the same deterministic key, which is a harmless overwrite.
pub async fn process_succeeded_job(
    ctx: &PipelineContext,
    record: &JobRecord,
    recovered: bool,
) -> Result<String, PipelineError> {
    let blocks = retrieve_all_blocks(ctx.analysis.as_ref(), &record.job_id).await?;
    tracing::debug!(
        job_id = record.job_id.as_str(),
        total_blocks = blocks.len(),
        "retrieved analysis blocks"
    );

    let content = extract_content(&blocks);
    let output = AnalysisOutput {
        content,
        metadata: OutputMetadata {
            source_file: record.source_key.clone(),
            bucket: record.bucket.clone(),
            batch: record.batch_prefix.clone(),
            job_id: record.job_id.clone(),
            processed_time: Utc::now(),
            total_blocks: blocks.len(),
            recovered,
        },
    };

    let output_key = output_key_for(&ctx.output_prefix, &record.batch_prefix, &record.source_key);
    let body = serde_json::to_vec_pretty(&output)?;
    ctx.documents
        .put(
            &ctx.output_bucket,
            &output_key,
            Bytes::from(body),
            "application/json",
        )
        .await?;

    // A concurrent handler may have completed the record between our lookup
    // and this point; the store's compare-and-set settles the race.
    ctx.jobs
        .complete_if_in_progress(&record.job_id, &output_key, Utc::now())?;

    Ok(output_key)
}

enum EnvelopeOutcome {
    Completed { job_id: String, output_key: String },
    AlreadyHandled { job_id: String },
}

/// Process one batch of envelopes. Each envelope is isolated: a failure in
/// one never prevents processing of its siblings.
pub async fn handle_batch(
    ctx: &PipelineContext,
    batch: &NotificationBatch,
) -> NotificationSummary {
    let mut summary = NotificationSummary::default();

    for envelope in &batch.records {
        match handle_envelope(ctx, envelope).await {
            Ok(EnvelopeOutcome::Completed { job_id, output_key }) => {
                summary.processed += 1;
                tracing::info!(
                    job_id = job_id.as_str(),
                    output_key = output_key.as_str(),
                    "job completed"
                );
            }
            Ok(EnvelopeOutcome::AlreadyHandled { job_id }) => {
                summary.processed += 1;
                tracing::info!(
                    job_id = job_id.as_str(),
                    "job already in a terminal state; duplicate delivery ignored"
                );
            }
            Err((job_id, err)) => {
                summary.failed += 1;
                tracing::warn!(
                    job_id = job_id.as_deref().unwrap_or("unknown"),
                    error = %err,
                    "failed to process notification envelope"
                );
                summary.failures.push(NotificationFailure {
                    job_id,
                    error: err.to_string(),
                });
            }
        }
    }

    summary
}

async fn handle_envelope(
    ctx: &PipelineContext,
    envelope: &NotificationEnvelope,
) -> Result<EnvelopeOutcome, (Option<String>, EnvelopeError)> {
    let payload = parse_envelope(envelope).map_err(|err| (None, err))?;
    let job_id = payload.job_id.clone();
    let with_id = |err: EnvelopeError| (Some(job_id.clone()), err);

    if ServiceJobStatus::from_wire(&payload.status) != ServiceJobStatus::Succeeded {
        let transition = ctx
            .jobs
            .fail_if_in_progress(
                &payload.job_id,
                FailureReason::Service(payload.status.clone()),
                Utc::now(),
            )
            .map_err(|err| match err {
                JobStoreError::NotFound(id) => with_id(EnvelopeError::Orphaned(id)),
                other => with_id(EnvelopeError::Pipeline(other.into())),
            })?;
        if matches!(transition, Transition::AlreadyTerminal(_)) {
            return Ok(EnvelopeOutcome::AlreadyHandled { job_id });
        }
        return Err(with_id(EnvelopeError::JobFailed(payload.status.clone())));
    }

    let record = ctx
        .jobs
        .get(&payload.job_id)
        .map_err(|err| with_id(EnvelopeError::Pipeline(err.into())))?
        .ok_or_else(|| with_id(EnvelopeError::Orphaned(payload.job_id.clone())))?;

    if record.status.is_terminal() {
        return Ok(EnvelopeOutcome::AlreadyHandled { job_id });
    }

    let output_key = process_succeeded_job(ctx, &record, false)
        .await
        .map_err(|err| with_id(EnvelopeError::Pipeline(err)))?;

    Ok(EnvelopeOutcome::Completed { job_id, output_key })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::AppPaths;
    use crate::pipeline::{Block, BlockType};
    use crate::services::context::{
        AnalysisClient, AnalysisError, AnalysisPage, DocumentLocation, FeatureType,
        NotificationTarget,
    };
    use crate::services::documents::{DocumentStore, FsDocumentStore};
    use crate::services::jobs::{JobStatus, JobStore};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Serves one single-page succeeded result per scripted job id and counts
    /// retrieval calls.
    struct ScriptedClient {
        results: HashMap<String, Vec<Block>>,
        retrievals: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(results: Vec<(&str, Vec<Block>)>) -> Self {
            Self {
                results: results
                    .into_iter()
                    .map(|(id, blocks)| (id.to_string(), blocks))
                    .collect(),
                retrievals: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl AnalysisClient for ScriptedClient {
        async fn start_analysis(
            &self,
            _location: &DocumentLocation,
            _features: &[FeatureType],
            _notification: &NotificationTarget,
        ) -> Result<String, AnalysisError> {
            unimplemented!("not exercised here")
        }

        async fn get_analysis(
            &self,
            job_id: &str,
            _next_token: Option<&str>,
        ) -> Result<AnalysisPage, AnalysisError> {
            self.retrievals.fetch_add(1, Ordering::SeqCst);
            let blocks = self
                .results
                .get(job_id)
                .cloned()
                .ok_or_else(|| AnalysisError::UnknownJob(job_id.to_string()))?;
            Ok(AnalysisPage {
                blocks,
                next_token: None,
                job_status: ServiceJobStatus::Succeeded,
            })
        }
    }

    fn test_context(temp: &TempDir, client: Arc<ScriptedClient>) -> PipelineContext {
        let paths = AppPaths::new(temp.path().join("data")).expect("app paths");
        let jobs = JobStore::open(&paths).expect("open store");
        let documents = FsDocumentStore::new(temp.path().join("objects"));
        PipelineContext {
            paths,
            analysis: client,
            documents: Arc::new(documents),
            jobs: Arc::new(jobs),
            source_bucket: "source".to_string(),
            output_bucket: "outputs".to_string(),
            output_prefix: "processed/".to_string(),
        }
    }

    fn envelope_for(job_id: &str, status: &str) -> NotificationEnvelope {
        let payload = serde_json::json!({"JobId": job_id, "Status": status}).to_string();
        let body = serde_json::json!({"Message": payload}).to_string();
        NotificationEnvelope { body }
    }

    fn line_blocks(texts: &[&str]) -> Vec<Block> {
        texts
            .iter()
            .enumerate()
            .map(|(ordinal, text)| Block {
                text: Some((*text).to_string()),
                confidence: Some(99.0),
                ..Block::new(format!("line-{ordinal}"), BlockType::Line)
            })
            .collect()
    }

    #[test]
    fn envelope_unwraps_both_json_layers() {
        let payload = parse_envelope(&envelope_for("job-9", "SUCCEEDED")).expect("parse");
        assert_eq!(payload.job_id, "job-9");
        assert_eq!(payload.status, "SUCCEEDED");
    }

    #[test]
    fn garbage_envelope_is_malformed() {
        let err = parse_envelope(&NotificationEnvelope {
            body: "not json".to_string(),
        })
        .expect_err("garbage");
        assert!(matches!(err, EnvelopeError::Malformed(_)));
    }

    #[test]
    fn output_keys_follow_prefix_batch_and_stem() {
        assert_eq!(
            output_key_for("processed/", "batch-1/", "batch-1/doc.pdf"),
            "processed/batch-1/doc.json"
        );
        assert_eq!(
            output_key_for("", "batch-1/", "batch-1/doc.pdf"),
            "batch-1/doc.json"
        );
        assert_eq!(
            output_key_for("processed", "batch-2", "batch-2/scan.v2.pdf"),
            "processed/batch-2/scan.v2.json"
        );
    }

    #[tokio::test]
    async fn successful_notification_writes_output_and_completes_record() {
        let temp = TempDir::new().expect("temp dir");
        let client = Arc::new(ScriptedClient::new(vec![(
            "job-1",
            line_blocks(&["hello", "world"]),
        )]));
        let ctx = test_context(&temp, client);

        ctx.jobs
            .insert(&JobRecord::new("job-1", "batch-1/doc.pdf", "source", "batch-1/"))
            .expect("insert record");

        let batch = NotificationBatch {
            records: vec![envelope_for("job-1", "SUCCEEDED")],
        };
        let summary = handle_batch(&ctx, &batch).await;
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 0);

        let record = ctx.jobs.get("job-1").expect("get").expect("present");
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(
            record.output_key.as_deref(),
            Some("processed/batch-1/doc.json")
        );

        let body = ctx
            .documents
            .get("outputs", "processed/batch-1/doc.json")
            .await
            .expect("output written");
        let output: AnalysisOutput = serde_json::from_slice(&body).expect("valid output json");
        assert_eq!(output.content.raw_text.len(), 2);
        assert_eq!(output.content.raw_text[0].text, "hello");
        assert_eq!(output.metadata.job_id, "job-1");
        assert_eq!(output.metadata.total_blocks, 2);
        assert!(!output.metadata.recovered);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_a_noop_success() {
        let temp = TempDir::new().expect("temp dir");
        let client = Arc::new(ScriptedClient::new(vec![("job-1", line_blocks(&["once"]))]));
        let ctx = test_context(&temp, client.clone());

        ctx.jobs
            .insert(&JobRecord::new("job-1", "batch-1/doc.pdf", "source", "batch-1/"))
            .expect("insert record");

        let batch = NotificationBatch {
            records: vec![envelope_for("job-1", "SUCCEEDED")],
        };
        let first = handle_batch(&ctx, &batch).await;
        assert_eq!(first.processed, 1);
        let retrievals_after_first = client.retrievals.load(Ordering::SeqCst);
        let record_after_first = ctx.jobs.get("job-1").expect("get").expect("present");

        let second = handle_batch(&ctx, &batch).await;
        assert_eq!(second.processed, 1);
        assert_eq!(second.failed, 0);

        // No re-derivation: the analysis service was not consulted again and
        // the record is unchanged.
        assert_eq!(client.retrievals.load(Ordering::SeqCst), retrievals_after_first);
        let record_after_second = ctx.jobs.get("job-1").expect("get").expect("present");
        assert_eq!(record_after_second, record_after_first);
    }

    #[tokio::test]
    async fn malformed_envelope_does_not_block_its_siblings() {
        let temp = TempDir::new().expect("temp dir");
        let client = Arc::new(ScriptedClient::new(vec![("job-ok", line_blocks(&["fine"]))]));
        let ctx = test_context(&temp, client);

        ctx.jobs
            .insert(&JobRecord::new("job-ok", "batch-1/ok.pdf", "source", "batch-1/"))
            .expect("insert record");

        let batch = NotificationBatch {
            records: vec![
                NotificationEnvelope {
                    body: "{broken".to_string(),
                },
                envelope_for("job-ok", "SUCCEEDED"),
            ],
        };
        let summary = handle_batch(&ctx, &batch).await;
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures.len(), 1);
        assert!(summary.failures[0].job_id.is_none());

        let record = ctx.jobs.get("job-ok").expect("get").expect("present");
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn orphaned_notification_is_a_failure_outcome() {
        let temp = TempDir::new().expect("temp dir");
        let client = Arc::new(ScriptedClient::new(vec![]));
        let ctx = test_context(&temp, client);

        let batch = NotificationBatch {
            records: vec![envelope_for("never-launched", "SUCCEEDED")],
        };
        let summary = handle_batch(&ctx, &batch).await;
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.failures[0].job_id.as_deref(),
            Some("never-launched")
        );
    }

    #[tokio::test]
    async fn service_failure_status_marks_the_record_failed() {
        let temp = TempDir::new().expect("temp dir");
        let client = Arc::new(ScriptedClient::new(vec![]));
        let ctx = test_context(&temp, client.clone());

        ctx.jobs
            .insert(&JobRecord::new("job-bad", "batch-1/bad.pdf", "source", "batch-1/"))
            .expect("insert record");

        let batch = NotificationBatch {
            records: vec![envelope_for("job-bad", "FAILED")],
        };
        let summary = handle_batch(&ctx, &batch).await;
        assert_eq!(summary.failed, 1);

        let record = ctx.jobs.get("job-bad").expect("get").expect("present");
        assert_eq!(record.status.to_string(), "FAILED_FAILED");
        assert!(record.output_key.is_none());
        // No extraction was attempted.
        assert_eq!(client.retrievals.load(Ordering::SeqCst), 0);
    }
}
