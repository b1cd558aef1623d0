//! The batch engine: runs every subject through the pipeline.
//!
//! STAGE ORDER (fixed, never reordered):
//!   1. Signal extractor
//!   2. Persona classifier
//!   3. Content selector
//!   4. Guardrail chain   (consent → eligibility → tone)
//!   5. Trace recorder
//!
//! RULES:
//!   - Configuration is validated once, before any subject is processed.
//!     It never changes during a batch.
//!   - `process_subject` is pure: same config, inputs and reference date
//!     give the same trace, apart from `generated_at`.
//!   - One subject's failure never aborts the batch. Only a broken store does.
//!   - Every subject outcome is recorded in the event log.

use crate::{
    config::PipelineConfig,
    content_selector::ContentSelector,
    error::{PipelineError, PipelineResult},
    event::{EventLogEntry, PipelineEvent},
    guardrail_chain::{GuardrailChain, SubjectContext},
    input::SubjectInputs,
    persona_classifier::{Persona, PersonaClassifier},
    signal_extractor::SignalExtractor,
    store::PipelineStore,
    trace_recorder::{DecisionTrace, TraceRecorder, TraceStatus},
    types::RunId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Run one subject through every stage and return its trace.
///
/// Never fails: malformed inputs produce a trace with status `failed`.
pub fn process_subject(
    config:         &PipelineConfig,
    run_id:         &str,
    inputs:         &SubjectInputs,
    reference_date: NaiveDate,
    generated_at:   DateTime<Utc>,
) -> DecisionTrace {
    let mut recorder = TraceRecorder::new(run_id, &inputs.subject_id, reference_date);

    if let Err(e) = inputs.validate() {
        log::warn!("subject={} failed validation: {e}", inputs.subject_id);
        recorder.record_failure(e.to_string());
        return recorder.finish(generated_at);
    }

    let signals = SignalExtractor::new(&config.signals, &config.windows).extract(inputs, reference_date);
    recorder.record_signals(&signals);

    let assignment = PersonaClassifier::new(&config.personas).classify(&signals);
    log::info!(
        "subject={} persona={} rule={} position={}",
        inputs.subject_id,
        assignment.persona.as_str(),
        assignment.fired_rule.rule_id,
        assignment.fired_rule.position,
    );
    recorder.record_persona(&assignment);

    let selection = ContentSelector::new(&config.catalog, &config.selection)
        .select(assignment.persona, &signals);
    log::debug!(
        "subject={} selected {} candidates ({} skipped)",
        inputs.subject_id,
        selection.candidates.len(),
        selection.skipped.len(),
    );
    recorder.record_selection(&selection);

    let ctx = SubjectContext::from_inputs(inputs, &signals);
    let outcome = GuardrailChain::build(&config.guardrails).run(selection.candidates, &ctx);
    log::debug!(
        "subject={} guardrails: {} recommended, halted_by={:?}",
        inputs.subject_id,
        outcome.recommendations.len(),
        outcome.halted_by,
    );
    recorder.record_guardrails(&outcome);

    recorder.finish(generated_at)
}

/// Counts for one completed batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub run_id:          RunId,
    pub reference_date:  NaiveDate,
    pub processed:       usize,
    pub completed:       usize,
    pub consent_blocked: usize,
    pub failed:          usize,
    pub recommendations: usize,
    pub persona_counts:  BTreeMap<Persona, usize>,
}

impl BatchSummary {
    fn new(run_id: &str, reference_date: NaiveDate) -> Self {
        Self {
            run_id: run_id.to_string(),
            reference_date,
            processed:       0,
            completed:       0,
            consent_blocked: 0,
            failed:          0,
            recommendations: 0,
            persona_counts:  BTreeMap::new(),
        }
    }

    fn count(&mut self, trace: &DecisionTrace) {
        self.processed += 1;
        match trace.status {
            TraceStatus::Completed      => self.completed += 1,
            TraceStatus::ConsentBlocked => self.consent_blocked += 1,
            TraceStatus::Failed         => self.failed += 1,
        }
        self.recommendations += trace.recommendations.len();
        if let Some(p) = trace.persona_label() {
            *self.persona_counts.entry(p).or_insert(0) += 1;
        }
    }
}

pub struct PipelineEngine {
    pub run_id:    RunId,
    config:        PipelineConfig,
    store:         PipelineStore,
    next_sequence: u64,
}

impl PipelineEngine {
    /// Wrap a store and a configuration. Rejects an invalid configuration
    /// before anything else happens.
    pub fn new(run_id: RunId, config: PipelineConfig, store: PipelineStore) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self { run_id, config, store, next_sequence: 0 })
    }

    /// Load configuration from `data_dir` and migrate the store.
    pub fn build(run_id: RunId, store: PipelineStore, data_dir: &str) -> PipelineResult<Self> {
        let config = PipelineConfig::load(data_dir)?;
        store.migrate()?;
        Self::new(run_id, config, store)
    }

    /// In-memory store with the shipped configuration. Used by tests.
    pub fn build_test(run_id: &str) -> PipelineResult<Self> {
        let store = PipelineStore::in_memory()?;
        store.migrate()?;
        Self::new(run_id.to_string(), PipelineConfig::bundled()?, store)
    }

    pub fn store(&self) -> &PipelineStore {
        &self.store
    }

    /// Process every subject in the store as of `reference_date` and
    /// persist one trace per subject.
    pub fn run_batch(&mut self, reference_date: NaiveDate) -> PipelineResult<BatchSummary> {
        if !self.store.run_exists(&self.run_id)? {
            self.store
                .insert_run(&self.run_id, reference_date, env!("CARGO_PKG_VERSION"))?;
        }

        let subject_ids = self.store.subject_ids()?;
        log::info!(
            "run={} as_of={reference_date} starting batch of {} subjects",
            self.run_id,
            subject_ids.len()
        );
        self.emit(&PipelineEvent::BatchStarted {
            run_id: self.run_id.clone(),
            reference_date,
            subject_count: subject_ids.len(),
        })?;

        let mut summary = BatchSummary::new(&self.run_id, reference_date);
        for subject_id in &subject_ids {
            let trace = self.run_subject(subject_id, reference_date, Utc::now())?;
            self.store.write_trace(&trace)?;
            summary.count(&trace);

            let event = match trace.status {
                TraceStatus::Failed => PipelineEvent::SubjectFailed {
                    subject_id: subject_id.clone(),
                    reason:     trace.failure.clone().unwrap_or_default(),
                },
                status => PipelineEvent::SubjectProcessed {
                    subject_id: subject_id.clone(),
                    status,
                    persona: trace.persona_label(),
                    recommendation_count: trace.recommendations.len(),
                },
            };
            self.emit(&event)?;
        }

        self.emit(&PipelineEvent::BatchCompleted {
            run_id:    self.run_id.clone(),
            processed: summary.processed,
            failed:    summary.failed,
        })?;
        log::info!(
            "run={} done: {} processed, {} completed, {} consent-blocked, {} failed",
            self.run_id,
            summary.processed,
            summary.completed,
            summary.consent_blocked,
            summary.failed
        );
        Ok(summary)
    }

    /// Load one subject and run it through the pipeline. Unreadable input
    /// becomes a failed trace; only store errors propagate.
    pub fn run_subject(
        &self,
        subject_id:     &str,
        reference_date: NaiveDate,
        generated_at:   DateTime<Utc>,
    ) -> PipelineResult<DecisionTrace> {
        match self.store.load_subject_inputs(subject_id) {
            Ok(inputs) => Ok(process_subject(
                &self.config,
                &self.run_id,
                &inputs,
                reference_date,
                generated_at,
            )),
            Err(e @ PipelineError::Database(_)) => Err(e),
            Err(e) => {
                log::warn!("subject={subject_id} could not be loaded: {e}");
                let mut recorder = TraceRecorder::new(&self.run_id, subject_id, reference_date);
                recorder.record_failure(e.to_string());
                Ok(recorder.finish(generated_at))
            }
        }
    }

    fn emit(&mut self, event: &PipelineEvent) -> PipelineResult<()> {
        let entry = EventLogEntry {
            id:         None,
            run_id:     self.run_id.clone(),
            sequence:   self.next_sequence,
            event_type: event.type_name().to_string(),
            payload:    serde_json::to_string(event)?,
        };
        self.store.append_event(&entry)?;
        self.next_sequence += 1;
        Ok(())
    }
}
