//! Shared primitive types used across the entire pipeline.

/// A stable identifier for a subject (the person whose records are analyzed).
pub type SubjectId = String;

/// The canonical batch-run identifier.
pub type RunId = String;

/// A stable catalog reference for a content entry.
pub type ContentId = String;

/// Generate a fresh run identifier for a batch.
pub fn new_run_id() -> RunId {
    format!("run-{}", uuid::Uuid::new_v4())
}
