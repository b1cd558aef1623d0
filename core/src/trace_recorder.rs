//! Trace recorder: the audit record of how a subject's outputs were derived.
//!
//! RULE: the recorder performs no business logic. It copies each stage's
//! output as-is and never alters an upstream decision.

use crate::{
    config::ContentKind,
    content_selector::{RecommendationCandidate, Selection, SkippedEntry},
    error::PipelineResult,
    guardrail_chain::{ChainOutcome, GuardrailDecision, ReasonCode},
    persona_classifier::{Persona, PersonaAssignment},
    signal_extractor::WindowedSignals,
    types::{ContentId, RunId, SubjectId},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Bumped whenever the trace layout changes.
pub const TRACE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Completed,
    ConsentBlocked,
    Failed,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed      => "completed",
            Self::ConsentBlocked => "consent_blocked",
            Self::Failed         => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum TraceWarning {
    UnderFill {
        content_kind: ContentKind,
        persona:      Persona,
        selected:     usize,
        required:     usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionTrace {
    pub trace_version:       u32,
    pub run_id:              RunId,
    pub subject_id:          SubjectId,
    pub status:              TraceStatus,
    pub reference_date:      NaiveDate,
    pub generated_at:        DateTime<Utc>,
    pub signals:             Option<WindowedSignals>,
    pub persona:             Option<PersonaAssignment>,
    /// Candidates as selected, before any guardrail ran.
    pub candidates:          Vec<RecommendationCandidate>,
    pub skipped_content:     Vec<SkippedEntry>,
    pub guardrail_decisions: Vec<GuardrailDecision>,
    /// Final, post-guardrail output.
    pub recommendations:     Vec<RecommendationCandidate>,
    pub warnings:            Vec<TraceWarning>,
    pub failure:             Option<String>,
}

impl DecisionTrace {
    pub fn persona_label(&self) -> Option<Persona> {
        self.persona.as_ref().map(|p| p.persona)
    }

    pub fn decision_for(&self, content_id: &str) -> Option<&GuardrailDecision> {
        self.guardrail_decisions
            .iter()
            .find(|d| d.content_id.as_deref() == Some(content_id))
    }

    pub fn decisions_with_reason(&self, reason: ReasonCode) -> Vec<&GuardrailDecision> {
        self.guardrail_decisions
            .iter()
            .filter(|d| d.reason == Some(reason))
            .collect()
    }

    pub fn recommended_ids(&self) -> Vec<&ContentId> {
        self.recommendations.iter().map(|r| &r.content_id).collect()
    }

    pub fn to_json(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

pub struct TraceRecorder {
    trace: DecisionTrace,
}

impl TraceRecorder {
    pub fn new(run_id: &str, subject_id: &str, reference_date: NaiveDate) -> Self {
        Self {
            trace: DecisionTrace {
                trace_version:       TRACE_VERSION,
                run_id:              run_id.to_string(),
                subject_id:          subject_id.to_string(),
                status:              TraceStatus::Completed,
                reference_date,
                generated_at:        DateTime::<Utc>::MIN_UTC,
                signals:             None,
                persona:             None,
                candidates:          Vec::new(),
                skipped_content:     Vec::new(),
                guardrail_decisions: Vec::new(),
                recommendations:     Vec::new(),
                warnings:            Vec::new(),
                failure:             None,
            },
        }
    }

    pub fn record_signals(&mut self, signals: &WindowedSignals) {
        self.trace.signals = Some(signals.clone());
    }

    pub fn record_persona(&mut self, assignment: &PersonaAssignment) {
        self.trace.persona = Some(assignment.clone());
    }

    pub fn record_selection(&mut self, selection: &Selection) {
        self.trace.candidates = selection.candidates.clone();
        self.trace.skipped_content = selection.skipped.clone();
        self.trace.warnings.extend(selection.under_fill.iter().map(|u| TraceWarning::UnderFill {
            content_kind: u.kind,
            persona:      u.persona,
            selected:     u.selected,
            required:     u.required,
        }));
    }

    pub fn record_guardrails(&mut self, outcome: &ChainOutcome) {
        self.trace.guardrail_decisions = outcome.decisions.clone();
        self.trace.recommendations = outcome.recommendations.clone();
        if outcome
            .decisions
            .iter()
            .any(|d| d.reason == Some(ReasonCode::ConsentMissing))
        {
            self.trace.status = TraceStatus::ConsentBlocked;
        }
    }

    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.trace.status = TraceStatus::Failed;
        self.trace.failure = Some(reason.into());
    }

    pub fn finish(mut self, generated_at: DateTime<Utc>) -> DecisionTrace {
        self.trace.generated_at = generated_at;
        self.trace
    }
}
