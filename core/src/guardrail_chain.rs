//! Guardrail chain: consent, eligibility and tone, in that order.
//!
//! RULES:
//!   - Every stage has the same shape: candidates in, candidates + decisions out.
//!   - Stages see only the candidate list the previous stage produced.
//!   - A stage that halts ends the chain; later stages never run.
//!   - Without consent the chain emits nothing and records exactly one
//!     `consent_missing` decision.
//!   - Every candidate that reaches the chain with consent ends with exactly
//!     one decision: blocked, rewritten, or pass.
//!   - A rewrite never leaves a rationale ungrounded; such a candidate is blocked.

use crate::{
    config::{GuardrailConfig, ToneRule},
    content_selector::RecommendationCandidate,
    input::{AccountKind, SubjectInputs},
    signal_extractor::WindowedSignals,
    types::{ContentId, SubjectId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailOutcome {
    Pass,
    Blocked,
    Rewritten,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    ConsentMissing,
    Ineligible,
    ToneViolation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextRewrite {
    pub field:       String,
    pub original:    String,
    pub replacement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuardrailDecision {
    /// `None` for subject-level decisions (consent).
    pub content_id: Option<ContentId>,
    pub stage:      String,
    pub outcome:    GuardrailOutcome,
    pub reason:     Option<ReasonCode>,
    pub detail:     String,
    #[serde(default)]
    pub rewrites:   Vec<TextRewrite>,
}

impl GuardrailDecision {
    fn blocked(content_id: Option<&str>, stage: &str, reason: ReasonCode, detail: String) -> Self {
        Self {
            content_id: content_id.map(str::to_string),
            stage:      stage.to_string(),
            outcome:    GuardrailOutcome::Blocked,
            reason:     Some(reason),
            detail,
            rewrites:   Vec::new(),
        }
    }
}

/// What the guardrails know about a subject. Built once per subject from
/// inputs and signals; never mutated by a stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubjectContext {
    pub subject_id:      SubjectId,
    pub consent_granted: bool,
    pub monthly_income:  f64,
    pub utilization:     Option<f64>,
    pub held_products:   BTreeSet<AccountKind>,
}

impl SubjectContext {
    pub fn from_inputs(inputs: &SubjectInputs, signals: &WindowedSignals) -> Self {
        Self {
            subject_id:      inputs.subject_id.clone(),
            consent_granted: inputs.consent_granted(),
            monthly_income:  signals.long.income.monthly_income,
            utilization:     signals.short.credit.max_utilization,
            held_products:   inputs.held_products(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub passed:    Vec<RecommendationCandidate>,
    pub decisions: Vec<GuardrailDecision>,
    pub halt:      bool,
}

/// The contract every guardrail stage fulfils.
pub trait GuardrailStage: Send + Sync {
    /// Stable name recorded on every decision this stage makes.
    fn name(&self) -> &'static str;

    fn apply(&self, candidates: Vec<RecommendationCandidate>, ctx: &SubjectContext) -> StageOutput;
}

// ── Consent gate ───────────────────────────────────────────────────

pub struct ConsentGate;

impl GuardrailStage for ConsentGate {
    fn name(&self) -> &'static str { "consent" }

    fn apply(&self, candidates: Vec<RecommendationCandidate>, ctx: &SubjectContext) -> StageOutput {
        if ctx.consent_granted {
            return StageOutput { passed: candidates, ..StageOutput::default() };
        }
        StageOutput {
            passed:    Vec::new(),
            decisions: vec![GuardrailDecision::blocked(
                None,
                self.name(),
                ReasonCode::ConsentMissing,
                format!("consent not granted; {} candidates withheld", candidates.len()),
            )],
            halt:      true,
        }
    }
}

// ── Eligibility filter ─────────────────────────────────────────────

pub struct EligibilityFilter<'a> {
    predatory_categories: &'a [String],
}

impl<'a> EligibilityFilter<'a> {
    pub fn new(predatory_categories: &'a [String]) -> Self {
        Self { predatory_categories }
    }

    /// First failing check, or `None` when the candidate is eligible.
    fn ineligibility(&self, candidate: &RecommendationCandidate, ctx: &SubjectContext) -> Option<String> {
        let offer = candidate.offer.as_ref()?;

        if self
            .predatory_categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&offer.category))
        {
            return Some(format!("category '{}' is on the predatory denylist", offer.category));
        }
        if let Some(kind) = offer.product_kind.filter(|k| ctx.held_products.contains(k)) {
            return Some(format!("subject already holds a {} product", kind.as_str()));
        }
        if let Some(min) = offer.min_monthly_income.filter(|m| ctx.monthly_income < *m) {
            return Some(format!(
                "monthly income {:.2} below required {min:.2}",
                ctx.monthly_income
            ));
        }
        if let Some(max) = offer.max_utilization {
            if let Some(u) = ctx.utilization.filter(|u| *u > max) {
                return Some(format!(
                    "utilization {:.1}% above allowed {:.1}%",
                    u * 100.0,
                    max * 100.0
                ));
            }
        }
        None
    }
}

impl GuardrailStage for EligibilityFilter<'_> {
    fn name(&self) -> &'static str { "eligibility" }

    fn apply(&self, candidates: Vec<RecommendationCandidate>, ctx: &SubjectContext) -> StageOutput {
        let mut out = StageOutput::default();
        for candidate in candidates {
            match self.ineligibility(&candidate, ctx) {
                Some(detail) => {
                    log::debug!(
                        "subject={} eligibility: dropped {} ({detail})",
                        ctx.subject_id, candidate.content_id
                    );
                    out.decisions.push(GuardrailDecision::blocked(
                        Some(candidate.content_id.as_str()),
                        self.name(),
                        ReasonCode::Ineligible,
                        detail,
                    ));
                }
                None => out.passed.push(candidate),
            }
        }
        out
    }
}

// ── Tone validator ─────────────────────────────────────────────────

pub struct ToneValidator<'a> {
    rules: &'a [ToneRule],
}

impl<'a> ToneValidator<'a> {
    pub fn new(rules: &'a [ToneRule]) -> Self {
        Self { rules }
    }

    /// Prohibited phrases with no substitution found anywhere in the candidate.
    fn unsafe_matches(&self, candidate: &RecommendationCandidate) -> Vec<&'a str> {
        let fields = [&candidate.title, &candidate.content, &candidate.rationale];
        self.rules
            .iter()
            .filter(|r| r.substitution.is_none())
            .filter(|r| fields.iter().any(|f| contains_ignore_ascii_case(f, &r.phrase)))
            .map(|r| r.phrase.as_str())
            .collect()
    }

    /// Apply every substitution to one field; records a rewrite if it changed.
    fn rewrite_field(&self, field: &str, text: &mut String, rewrites: &mut Vec<TextRewrite>) {
        let original = text.clone();
        for rule in self.rules {
            if let Some(sub) = &rule.substitution {
                if let Some(replaced) = replace_ignore_ascii_case(text, &rule.phrase, sub) {
                    *text = replaced;
                }
            }
        }
        if *text != original {
            rewrites.push(TextRewrite {
                field:       field.to_string(),
                original,
                replacement: text.clone(),
            });
        }
    }
}

impl GuardrailStage for ToneValidator<'_> {
    fn name(&self) -> &'static str { "tone" }

    fn apply(&self, candidates: Vec<RecommendationCandidate>, ctx: &SubjectContext) -> StageOutput {
        let mut out = StageOutput::default();
        for mut candidate in candidates {
            let unsafe_phrases = self.unsafe_matches(&candidate);
            if !unsafe_phrases.is_empty() {
                log::warn!(
                    "subject={} tone: blocked {} (phrases {:?})",
                    ctx.subject_id, candidate.content_id, unsafe_phrases
                );
                out.decisions.push(GuardrailDecision::blocked(
                    Some(candidate.content_id.as_str()),
                    self.name(),
                    ReasonCode::ToneViolation,
                    format!("no safe substitution for {}", unsafe_phrases.join(", ")),
                ));
                continue;
            }

            let mut rewrites = Vec::new();
            self.rewrite_field("title", &mut candidate.title, &mut rewrites);
            self.rewrite_field("content", &mut candidate.content, &mut rewrites);
            self.rewrite_field("rationale", &mut candidate.rationale, &mut rewrites);

            // A rewritten rationale keeps only the values it still shows.
            if rewrites.iter().any(|r| r.field == "rationale") {
                candidate
                    .embedded_values
                    .retain(|v| candidate.rationale.contains(v.value.as_str()));
                if candidate.embedded_values.is_empty() {
                    let mut decision = GuardrailDecision::blocked(
                        Some(candidate.content_id.as_str()),
                        self.name(),
                        ReasonCode::ToneViolation,
                        "rewrite left the rationale without a signal value".to_string(),
                    );
                    decision.rewrites = rewrites;
                    out.decisions.push(decision);
                    continue;
                }
            }

            if !rewrites.is_empty() {
                out.decisions.push(GuardrailDecision {
                    content_id: Some(candidate.content_id.clone()),
                    stage:      self.name().to_string(),
                    outcome:    GuardrailOutcome::Rewritten,
                    reason:     Some(ReasonCode::ToneViolation),
                    detail:     format!("{} field(s) rewritten", rewrites.len()),
                    rewrites,
                });
            }
            out.passed.push(candidate);
        }
        out
    }
}

fn contains_ignore_ascii_case(haystack: &str, needle: &str) -> bool {
    !needle.is_empty() && haystack.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())
}

/// Replace every case-insensitive occurrence of `needle`. `None` if absent.
/// ASCII lowercasing keeps byte offsets aligned with the original text.
fn replace_ignore_ascii_case(haystack: &str, needle: &str, replacement: &str) -> Option<String> {
    let lower = haystack.to_ascii_lowercase();
    let needle = needle.to_ascii_lowercase();
    if needle.is_empty() || !lower.contains(&needle) {
        return None;
    }
    let mut out = String::with_capacity(haystack.len());
    let mut last = 0;
    for (idx, _) in lower.match_indices(&needle) {
        out.push_str(&haystack[last..idx]);
        out.push_str(replacement);
        last = idx + needle.len();
    }
    out.push_str(&haystack[last..]);
    Some(out)
}

// ── Chain ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ChainOutcome {
    pub recommendations: Vec<RecommendationCandidate>,
    pub decisions:       Vec<GuardrailDecision>,
    /// Name of the stage that halted the chain, if any.
    pub halted_by:       Option<String>,
}

pub struct GuardrailChain<'a> {
    stages: Vec<Box<dyn GuardrailStage + 'a>>,
}

impl<'a> GuardrailChain<'a> {
    /// Build the chain in its fixed order: consent → eligibility → tone.
    pub fn build(config: &'a GuardrailConfig) -> Self {
        let mut chain = Self { stages: Vec::new() };
        chain.register(Box::new(ConsentGate));
        chain.register(Box::new(EligibilityFilter::new(&config.predatory_categories)));
        chain.register(Box::new(ToneValidator::new(&config.prohibited_phrases)));
        chain
    }

    fn register(&mut self, stage: Box<dyn GuardrailStage + 'a>) {
        self.stages.push(stage);
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn run(&self, candidates: Vec<RecommendationCandidate>, ctx: &SubjectContext) -> ChainOutcome {
        let mut current = candidates;
        let mut decisions: Vec<GuardrailDecision> = Vec::new();

        for stage in &self.stages {
            let output = stage.apply(current, ctx);
            decisions.extend(output.decisions);
            current = output.passed;
            if output.halt {
                return ChainOutcome {
                    recommendations: Vec::new(),
                    decisions,
                    halted_by: Some(stage.name().to_string()),
                };
            }
        }

        for candidate in &current {
            let decided = decisions
                .iter()
                .any(|d| d.content_id.as_deref() == Some(candidate.content_id.as_str()));
            if !decided {
                decisions.push(GuardrailDecision {
                    content_id: Some(candidate.content_id.clone()),
                    stage:      "chain".to_string(),
                    outcome:    GuardrailOutcome::Pass,
                    reason:     None,
                    detail:     "cleared every guardrail".to_string(),
                    rewrites:   Vec::new(),
                });
            }
        }

        ChainOutcome { recommendations: current, decisions, halted_by: None }
    }
}
