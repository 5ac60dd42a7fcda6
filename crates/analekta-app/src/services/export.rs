//! Summary export over written output objects.
//!
//! Aggregates a batch's per-document extraction results into an append-only
//! NDJSON ledger, one self-contained row per document, suitable for loading
//! into a spreadsheet or downstream reporting job.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::services::context::{PipelineError, PipelineResult};
use crate::services::documents::DocumentStore;
use crate::services::notifications::{output_key_for, AnalysisOutput};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One summary row per processed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub source_file: String,
    pub batch: String,
    pub job_id: String,
    pub processed_time: DateTime<Utc>,
    pub text_blocks: usize,
    pub key_value_pairs: usize,
    pub tables: usize,
    pub total_blocks: usize,
}

impl SummaryRow {
    pub fn from_output(output: &AnalysisOutput) -> Self {
        Self {
            source_file: output.metadata.source_file.clone(),
            batch: output.metadata.batch.clone(),
            job_id: output.metadata.job_id.clone(),
            processed_time: output.metadata.processed_time,
            text_blocks: output.content.raw_text.len(),
            key_value_pairs: output.content.key_value_pairs.len(),
            tables: output.content.tables.len(),
            total_blocks: output.metadata.total_blocks,
        }
    }
}

/// Append-only NDJSON writer for summary rows. Opened in append mode so
/// successive export runs extend the same ledger.
pub struct SummaryWriter {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl SummaryWriter {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, ExportError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub async fn write(&mut self, row: &SummaryRow) -> Result<(), ExportError> {
        let json = serde_json::to_string(row)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered rows and fsync to stable storage.
    pub async fn close(mut self) -> Result<(), ExportError> {
        self.writer.flush().await?;
        self.writer.get_ref().sync_all().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedExport {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportSummary {
    pub exported: usize,
    pub failed: Vec<FailedExport>,
}

/// Read every output object of a batch and append one summary row each.
/// Unreadable or unparsable objects are tallied and skipped.
pub async fn export_batch_summary(
    documents: &dyn DocumentStore,
    output_bucket: &str,
    output_prefix: &str,
    batch_prefix: &str,
    writer: &mut SummaryWriter,
) -> PipelineResult<ExportSummary> {
    // The listing prefix is the directory part of any output key in the batch.
    let probe = output_key_for(output_prefix, batch_prefix, "probe.pdf");
    let listing_prefix = probe
        .rsplit_once('/')
        .map(|(dir, _)| format!("{dir}/"))
        .unwrap_or_default();

    let keys = documents.list(output_bucket, &listing_prefix).await?;
    let mut summary = ExportSummary::default();

    for key in keys.into_iter().filter(|key| key.ends_with(".json")) {
        let row = match read_output(documents, output_bucket, &key).await {
            Ok(output) => SummaryRow::from_output(&output),
            Err(err) => {
                tracing::warn!(key = key.as_str(), error = %err, "skipping unreadable output");
                summary.failed.push(FailedExport { key, error: err });
                continue;
            }
        };
        writer
            .write(&row)
            .await
            .map_err(|err| PipelineError::message(err.to_string()))?;
        summary.exported += 1;
    }

    tracing::info!(
        exported = summary.exported,
        failed = summary.failed.len(),
        path = %writer.path().display(),
        "summary export finished"
    );
    Ok(summary)
}

async fn read_output(
    documents: &dyn DocumentStore,
    bucket: &str,
    key: &str,
) -> Result<AnalysisOutput, String> {
    let body = documents
        .get(bucket, key)
        .await
        .map_err(|err| err.to_string())?;
    serde_json::from_slice(&body).map_err(|err| err.to_string())
}
