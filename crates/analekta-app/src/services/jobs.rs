use std::collections::BTreeMap;
use std::fmt;

use bincode::config;
use bincode::error::{DecodeError, EncodeError};
use bincode::serde::{decode_from_slice, encode_to_vec};
use chrono::{DateTime, Utc};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::{AppPaths, PathError};

const JOB_ENV_MAP_SIZE_BYTES: usize = 1 << 28; // 256 MiB

/// Lifecycle state of one analysis job. `Completed` and `Failed` are
/// terminal; nothing transitions out of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    InProgress,
    Completed,
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Terminal non-success status reported by the analysis service.
    Service(String),
    /// The job id aged past the service's retention window before it could
    /// be reconciled.
    Expired,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::InProgress)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::InProgress => write!(f, "IN_PROGRESS"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed(FailureReason::Service(status)) => write!(f, "FAILED_{status}"),
            JobStatus::Failed(FailureReason::Expired) => write!(f, "FAILED_EXPIRED"),
        }
    }
}

/// Persisted state of one analysis job, keyed by the service-assigned job id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub source_key: String,
    pub bucket: String,
    pub batch_prefix: String,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub completed_time: Option<DateTime<Utc>>,
    /// Set only on successful completion.
    pub output_key: Option<String>,
}

impl JobRecord {
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        source_key: impl Into<String>,
        bucket: impl Into<String>,
        batch_prefix: impl Into<String>,
    ) -> Self {
        let job_id = job_id.into();
        debug_assert!(!job_id.is_empty());
        Self {
            job_id,
            source_key: source_key.into(),
            bucket: bucket.into(),
            batch_prefix: batch_prefix.into(),
            status: JobStatus::InProgress,
            start_time: Utc::now(),
            completed_time: None,
            output_key: None,
        }
    }
}

/// Result of a conditional state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The record was `IN_PROGRESS` and is now in the requested state.
    Applied(JobRecord),
    /// The record was already terminal; nothing changed. Callers treat this
    /// as a no-op success, never as an error.
    AlreadyTerminal(JobRecord),
}

impl Transition {
    pub fn record(&self) -> &JobRecord {
        match self {
            Transition::Applied(record) | Transition::AlreadyTerminal(record) => record,
        }
    }
}

/// Errors emitted by the job store.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Heed(#[from] heed::Error),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("job `{0}` already exists")]
    Duplicate(String),
    #[error("job `{0}` not found")]
    NotFound(String),
}

/// LMDB-backed persistence for job records.
///
/// Transitions out of `IN_PROGRESS` are compare-and-set: the current status
/// is read and checked inside the same write transaction that persists the
/// new state, so a notification delivery and a recovery pass racing on the
/// same job id cannot both apply.
#[derive(Debug)]
pub struct JobStore {
    env: Env,
    jobs: Database<Str, Bytes>,
}

impl JobStore {
    pub fn open(paths: &AppPaths) -> Result<Self, JobStoreError> {
        let path = paths.jobs_lmdb_dir()?;
        debug_assert!(path.exists());

        let mut options = EnvOpenOptions::new();
        options.max_dbs(4);
        options.map_size(JOB_ENV_MAP_SIZE_BYTES);
        let env = unsafe {
            // SAFETY: LMDB requires callers to uphold environment lifetime invariants.
            options.open(&path)?
        };
        let jobs = {
            let rtxn = env.read_txn()?;
            let opened = env.open_database::<Str, Bytes>(&rtxn, Some("jobs"))?;
            drop(rtxn);
            match opened {
                Some(existing) => existing,
                None => {
                    let mut wtxn = env.write_txn()?;
                    let db = env.create_database::<Str, Bytes>(&mut wtxn, Some("jobs"))?;
                    wtxn.commit()?;
                    db
                }
            }
        };
        Ok(Self { env, jobs })
    }

    /// Insert a freshly launched record. A duplicate job id is an error: the
    /// service assigns ids, so a collision means something upstream replayed
    /// a submission.
    pub fn insert(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        debug_assert!(!record.job_id.is_empty());
        debug_assert!(record.status == JobStatus::InProgress);

        let mut wtxn = self.env.write_txn()?;
        if self.jobs.get(&wtxn, record.job_id.as_str())?.is_some() {
            return Err(JobStoreError::Duplicate(record.job_id.clone()));
        }
        let encoded = encode_to_vec(record, config::standard())?;
        self.jobs
            .put(&mut wtxn, record.job_id.as_str(), encoded.as_slice())?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Result<Option<JobRecord>, JobStoreError> {
        debug_assert!(!job_id.is_empty());
        let rtxn = self.env.read_txn()?;
        let value = self.jobs.get(&rtxn, job_id)?;
        if let Some(raw) = value {
            let (record, _) = decode_from_slice::<JobRecord, _>(raw, config::standard())?;
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    /// Transition to `COMPLETED` if and only if the record is still
    /// `IN_PROGRESS`.
    pub fn complete_if_in_progress(
        &self,
        job_id: &str,
        output_key: &str,
        completed_time: DateTime<Utc>,
    ) -> Result<Transition, JobStoreError> {
        self.transition(job_id, |record| {
            record.status = JobStatus::Completed;
            record.output_key = Some(output_key.to_string());
            record.completed_time = Some(completed_time);
        })
    }

    /// Transition to `FAILED_<reason>` if and only if the record is still
    /// `IN_PROGRESS`.
    pub fn fail_if_in_progress(
        &self,
        job_id: &str,
        reason: FailureReason,
        completed_time: DateTime<Utc>,
    ) -> Result<Transition, JobStoreError> {
        self.transition(job_id, |record| {
            record.status = JobStatus::Failed(reason);
            record.completed_time = Some(completed_time);
        })
    }

    fn transition<F>(&self, job_id: &str, apply: F) -> Result<Transition, JobStoreError>
    where
        F: FnOnce(&mut JobRecord),
    {
        debug_assert!(!job_id.is_empty());
        let mut wtxn = self.env.write_txn()?;
        let existing = self.jobs.get(&wtxn, job_id)?;
        let Some(raw) = existing else {
            return Err(JobStoreError::NotFound(job_id.to_string()));
        };
        let (mut record, _) = decode_from_slice::<JobRecord, _>(raw, config::standard())?;
        if record.status.is_terminal() {
            return Ok(Transition::AlreadyTerminal(record));
        }
        apply(&mut record);
        let encoded = encode_to_vec(&record, config::standard())?;
        self.jobs.put(&mut wtxn, job_id, encoded.as_slice())?;
        wtxn.commit()?;
        Ok(Transition::Applied(record))
    }

    /// Records still awaiting a completion signal, in key order.
    pub fn list_in_progress(&self, limit: usize) -> Result<Vec<JobRecord>, JobStoreError> {
        debug_assert!(limit > 0);
        let rtxn = self.env.read_txn()?;
        let iter = self.jobs.iter(&rtxn)?;
        let mut out = Vec::new();
        for entry in iter {
            let (_, raw) = entry?;
            let (record, _) = decode_from_slice::<JobRecord, _>(raw, config::standard())?;
            if record.status == JobStatus::InProgress {
                out.push(record);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Count every record grouped by its status string.
    pub fn status_counts(&self) -> Result<BTreeMap<String, usize>, JobStoreError> {
        let rtxn = self.env.read_txn()?;
        let iter = self.jobs.iter(&rtxn)?;
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for entry in iter {
            let (_, raw) = entry?;
            let (record, _) = decode_from_slice::<JobRecord, _>(raw, config::standard())?;
            *counts.entry(record.status.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(temp: &TempDir) -> JobStore {
        let paths = AppPaths::new(temp.path()).expect("app paths");
        JobStore::open(&paths).expect("open store")
    }

    #[test]
    fn status_strings_match_the_store_contract() {
        assert_eq!(JobStatus::InProgress.to_string(), "IN_PROGRESS");
        assert_eq!(JobStatus::Completed.to_string(), "COMPLETED");
        assert_eq!(
            JobStatus::Failed(FailureReason::Service("PARTIAL_SUCCESS".into())).to_string(),
            "FAILED_PARTIAL_SUCCESS"
        );
        assert_eq!(
            JobStatus::Failed(FailureReason::Expired).to_string(),
            "FAILED_EXPIRED"
        );
    }

    #[test]
    fn insert_then_get_round_trips() {
        let temp = TempDir::new().expect("temp dir");
        let store = open_store(&temp);

        let record = JobRecord::new("job-1", "batch-1/doc.pdf", "source", "batch-1/");
        store.insert(&record).expect("insert");

        let fetched = store.get("job-1").expect("get").expect("present");
        assert_eq!(fetched, record);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let temp = TempDir::new().expect("temp dir");
        let store = open_store(&temp);

        let record = JobRecord::new("job-dup", "doc.pdf", "source", "batch-1/");
        store.insert(&record).expect("first insert");
        let err = store.insert(&record).expect_err("second insert fails");
        assert!(matches!(err, JobStoreError::Duplicate(id) if id == "job-dup"));
    }

    #[test]
    fn completion_applies_once_and_is_sticky() {
        let temp = TempDir::new().expect("temp dir");
        let store = open_store(&temp);

        let record = JobRecord::new("job-c", "doc.pdf", "source", "batch-1/");
        store.insert(&record).expect("insert");

        let now = Utc::now();
        let first = store
            .complete_if_in_progress("job-c", "processed/batch-1/doc.json", now)
            .expect("first transition");
        let Transition::Applied(applied) = first else {
            panic!("expected the first completion to apply");
        };
        assert_eq!(applied.status, JobStatus::Completed);
        assert_eq!(
            applied.output_key.as_deref(),
            Some("processed/batch-1/doc.json")
        );
        assert_eq!(applied.completed_time, Some(now));

        let second = store
            .complete_if_in_progress("job-c", "processed/other.json", Utc::now())
            .expect("second transition");
        let Transition::AlreadyTerminal(untouched) = second else {
            panic!("terminal records must not transition again");
        };
        assert_eq!(
            untouched.output_key.as_deref(),
            Some("processed/batch-1/doc.json")
        );
    }

    #[test]
    fn failure_does_not_overwrite_completion() {
        let temp = TempDir::new().expect("temp dir");
        let store = open_store(&temp);

        store
            .insert(&JobRecord::new("job-f", "doc.pdf", "source", "batch-1/"))
            .expect("insert");
        store
            .complete_if_in_progress("job-f", "processed/doc.json", Utc::now())
            .expect("complete");

        let result = store
            .fail_if_in_progress("job-f", FailureReason::Expired, Utc::now())
            .expect("transition call succeeds");
        assert!(matches!(result, Transition::AlreadyTerminal(_)));

        let fetched = store.get("job-f").expect("get").expect("present");
        assert_eq!(fetched.status, JobStatus::Completed);
    }

    #[test]
    fn transition_on_unknown_job_is_not_found() {
        let temp = TempDir::new().expect("temp dir");
        let store = open_store(&temp);

        let err = store
            .complete_if_in_progress("ghost", "out.json", Utc::now())
            .expect_err("missing record");
        assert!(matches!(err, JobStoreError::NotFound(id) if id == "ghost"));
    }

    #[test]
    fn list_in_progress_skips_terminal_records() {
        let temp = TempDir::new().expect("temp dir");
        let store = open_store(&temp);

        store
            .insert(&JobRecord::new("job-a", "a.pdf", "source", "batch-1/"))
            .expect("insert a");
        store
            .insert(&JobRecord::new("job-b", "b.pdf", "source", "batch-1/"))
            .expect("insert b");
        store
            .fail_if_in_progress(
                "job-a",
                FailureReason::Service("FAILED".into()),
                Utc::now(),
            )
            .expect("fail a");

        let stalled = store.list_in_progress(10).expect("list");
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].job_id, "job-b");
    }

    #[test]
    fn status_counts_group_by_status_string() {
        let temp = TempDir::new().expect("temp dir");
        let store = open_store(&temp);

        store
            .insert(&JobRecord::new("j1", "a.pdf", "source", "batch-1/"))
            .expect("insert");
        store
            .insert(&JobRecord::new("j2", "b.pdf", "source", "batch-1/"))
            .expect("insert");
        store
            .complete_if_in_progress("j2", "out.json", Utc::now())
            .expect("complete");

        let counts = store.status_counts().expect("counts");
        assert_eq!(counts.get("IN_PROGRESS"), Some(&1));
        assert_eq!(counts.get("COMPLETED"), Some(&1));
    }
}
