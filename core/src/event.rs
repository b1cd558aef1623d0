//! Batch audit events.
//!
//! RULE: the engine records one event per subject outcome, plus batch
//! start and completion. Events describe what happened; the decision
//! trace remains the authoritative record of why.

use crate::{
    persona_classifier::Persona,
    trace_recorder::TraceStatus,
    types::{RunId, SubjectId},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Every event emitted during a batch.
/// Variants are only ever appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    BatchStarted {
        run_id:         RunId,
        reference_date: NaiveDate,
        subject_count:  usize,
    },
    SubjectProcessed {
        subject_id:           SubjectId,
        status:               TraceStatus,
        persona:              Option<Persona>,
        recommendation_count: usize,
    },
    SubjectFailed {
        subject_id: SubjectId,
        reason:     String,
    },
    BatchCompleted {
        run_id:    RunId,
        processed: usize,
        failed:    usize,
    },
}

impl PipelineEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::BatchStarted { .. }     => "batch_started",
            Self::SubjectProcessed { .. } => "subject_processed",
            Self::SubjectFailed { .. }    => "subject_failed",
            Self::BatchCompleted { .. }   => "batch_completed",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub run_id:     RunId,
    /// Position within the batch; 0 for batch start.
    pub sequence:   u64,
    pub event_type: String,
    pub payload:    String, // JSON-serialized PipelineEvent
}
