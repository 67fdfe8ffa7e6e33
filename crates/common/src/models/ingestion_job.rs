//! Ingestion job outcome tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job status enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Chunking,
    Embedding,
    Indexing,
    Completed,
    /// Some chunks were indexed, some failed
    PartiallyCompleted,
    Failed,
    Cancelled,
}

/// Pipeline stage where an item failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Chunking,
    Describe,
    Embedding,
    Indexing,
}

/// One failed item in a job
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub stage: FailureStage,

    /// Source document, when known
    pub document_id: Option<Uuid>,

    /// Failed chunk, when the failure is chunk-level
    pub chunk_id: Option<Uuid>,

    /// Document name or image name
    pub source_name: String,

    pub message: String,
}

/// Set of chunks submitted as one batch-processing unit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: Uuid,

    pub status: JobStatus,

    pub documents_total: usize,

    pub chunks_total: usize,

    /// Chunk ids upserted into the index, in input order
    pub indexed: Vec<Uuid>,

    pub failures: Vec<ItemFailure>,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestionJob {
    pub fn new(documents_total: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            documents_total,
            chunks_total: 0,
            indexed: Vec::new(),
            failures: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Record a failure
    pub fn record_failure(&mut self, failure: ItemFailure) {
        self.failures.push(failure);
    }

    /// Failures recorded at one stage
    pub fn failures_at(&self, stage: FailureStage) -> impl Iterator<Item = &ItemFailure> {
        self.failures.iter().filter(move |f| f.stage == stage)
    }

    /// Close the job, deriving the terminal status from the outcome counts
    pub fn finish(&mut self, cancelled: bool) {
        self.status = if cancelled {
            JobStatus::Cancelled
        } else if self.failures.is_empty() {
            JobStatus::Completed
        } else if self.indexed.is_empty() {
            JobStatus::Failed
        } else {
            JobStatus::PartiallyCompleted
        };
        self.completed_at = Some(Utc::now());
    }

    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Completed
                | JobStatus::PartiallyCompleted
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }

    /// Calculate progress percentage
    pub fn progress_percent(&self) -> f64 {
        if self.chunks_total == 0 {
            0.0
        } else {
            (self.indexed.len() as f64 / self.chunks_total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(stage: FailureStage) -> ItemFailure {
        ItemFailure {
            stage,
            document_id: None,
            chunk_id: None,
            source_name: "a.txt".into(),
            message: "boom".into(),
        }
    }

    #[test]
    fn test_finish_status() {
        let mut job = IngestionJob::new(1);
        job.chunks_total = 2;
        job.indexed.push(Uuid::new_v4());
        job.record_failure(failure(FailureStage::Embedding));
        job.finish(false);
        assert_eq!(job.status, JobStatus::PartiallyCompleted);
        assert!(job.is_terminal());
        assert_eq!(job.progress_percent(), 50.0);
        assert_eq!(job.failures_at(FailureStage::Embedding).count(), 1);
        assert_eq!(job.failures_at(FailureStage::Indexing).count(), 0);
    }

    #[test]
    fn test_all_failed() {
        let mut job = IngestionJob::new(1);
        job.record_failure(failure(FailureStage::Indexing));
        job.finish(false);
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_cancelled_wins() {
        let mut job = IngestionJob::new(0);
        job.finish(true);
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(!IngestionJob::new(0).is_terminal());
    }
}
