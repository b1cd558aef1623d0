use crate::{
    content_selector::{is_signal_placeholder, template_placeholders, KNOWN_PLACEHOLDERS},
    error::{PipelineError, PipelineResult},
    input::AccountKind,
    persona_classifier::Persona,
    types::ContentId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ── Windows ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    pub short_days: u32,
    pub long_days:  u32,
}

// ── Signal extraction ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Utilization ratios at which a breakpoint flag fires, ascending.
    pub utilization_breakpoints:    Vec<f64>,
    /// Dollar slack when comparing a last payment to the stated minimum.
    pub minimum_payment_tolerance:  f64,
    pub interest_categories:        Vec<String>,
    pub payroll_categories:         Vec<String>,
    /// Outflow categories that are money movement, not spending.
    pub non_spend_categories:       Vec<String>,
    pub recurring_min_occurrences:  usize,
    pub recurring_lookback_days:    u32,
    /// Max relative distance of any amount from the merchant median.
    pub recurring_amount_tolerance: f64,
    pub payroll_min_amount:         f64,
    pub payroll_amount_tolerance:   f64,
    pub days_per_month:             f64,
}

impl SignalConfig {
    pub fn is_interest(&self, category: &str) -> bool {
        self.interest_categories.iter().any(|c| c == category)
    }

    pub fn is_payroll(&self, category: &str) -> bool {
        self.payroll_categories.iter().any(|c| c == category)
    }

    pub fn is_non_spend(&self, category: &str) -> bool {
        self.non_spend_categories.iter().any(|c| c == category)
    }
}

// ── Persona rules ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaThresholds {
    pub high_utilization:           f64,
    pub pay_gap_days:               i64,
    pub cash_buffer_months:         f64,
    pub subscription_min_merchants: usize,
    pub subscription_monthly_total: f64,
    pub subscription_spend_ratio:   f64,
    pub savings_growth_rate:        f64,
    pub savings_monthly_inflow:     f64,
    pub savings_max_utilization:    f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Evaluation order. Must name every rule persona exactly once.
    pub priority:   Vec<Persona>,
    pub thresholds: PersonaThresholds,
}

// ── Content catalog ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Education,
    PartnerOffer,
}

/// Terms attached to a partner offer; drive the eligibility guardrail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferTerms {
    pub partner:            String,
    pub category:           String,
    /// Product the offer opens; skipped when the subject already holds one.
    #[serde(default)]
    pub product_kind:       Option<AccountKind>,
    #[serde(default)]
    pub min_monthly_income: Option<f64>,
    #[serde(default)]
    pub max_utilization:    Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub content_id:         ContentId,
    pub kind:               ContentKind,
    pub title:              String,
    pub body:               String,
    pub personas:           Vec<Persona>,
    /// Lower sorts first.
    pub priority:           u32,
    pub rationale_template: String,
    #[serde(default)]
    pub offer:              Option<OfferTerms>,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogFile {
    entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub education_min: usize,
    pub education_max: usize,
    pub offer_min:     usize,
    pub offer_max:     usize,
    pub disclaimer:    String,
}

// ── Guardrails ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneRule {
    pub phrase:       String,
    /// `None` means no safe rewrite exists and the candidate is blocked.
    #[serde(default)]
    pub substitution: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    pub prohibited_phrases:   Vec<ToneRule>,
    pub predatory_categories: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ToneFile {
    prohibited_phrases: Vec<ToneRule>,
}

#[derive(Debug, Clone, Deserialize)]
struct EligibilityFile {
    predatory_categories: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ThresholdsFile {
    windows:  WindowConfig,
    signals:  SignalConfig,
    personas: PersonaConfig,
}

/// The full, immutable configuration for one batch run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub windows:    WindowConfig,
    pub signals:    SignalConfig,
    pub personas:   PersonaConfig,
    pub catalog:    Vec<CatalogEntry>,
    pub selection:  SelectionConfig,
    pub guardrails: GuardrailConfig,
}

impl PipelineConfig {
    /// Load from the data/ directory.
    /// In tests, use PipelineConfig::bundled().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let read = |rel: &str| -> anyhow::Result<String> {
            let path = format!("{data_dir}/{rel}");
            std::fs::read_to_string(&path).map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))
        };
        Self::from_json_parts(
            &read("thresholds.json")?,
            &read("catalog/content_catalog.json")?,
            &read("catalog/selection.json")?,
            &read("guardrails/tone.json")?,
            &read("guardrails/eligibility.json")?,
        )
    }

    /// The configuration shipped in data/, compiled into the binary.
    pub fn bundled() -> anyhow::Result<Self> {
        Self::from_json_parts(
            include_str!("../../data/thresholds.json"),
            include_str!("../../data/catalog/content_catalog.json"),
            include_str!("../../data/catalog/selection.json"),
            include_str!("../../data/guardrails/tone.json"),
            include_str!("../../data/guardrails/eligibility.json"),
        )
    }

    pub fn from_json_parts(
        thresholds:  &str,
        catalog:     &str,
        selection:   &str,
        tone:        &str,
        eligibility: &str,
    ) -> anyhow::Result<Self> {
        let thresholds: ThresholdsFile = serde_json::from_str(thresholds)
            .map_err(|e| anyhow::anyhow!("thresholds.json: {e}"))?;
        let catalog: CatalogFile = serde_json::from_str(catalog)
            .map_err(|e| anyhow::anyhow!("content_catalog.json: {e}"))?;
        let selection: SelectionConfig = serde_json::from_str(selection)
            .map_err(|e| anyhow::anyhow!("selection.json: {e}"))?;
        let tone: ToneFile = serde_json::from_str(tone)
            .map_err(|e| anyhow::anyhow!("tone.json: {e}"))?;
        let eligibility: EligibilityFile = serde_json::from_str(eligibility)
            .map_err(|e| anyhow::anyhow!("eligibility.json: {e}"))?;

        Ok(Self {
            windows:    thresholds.windows,
            signals:    thresholds.signals,
            personas:   thresholds.personas,
            catalog:    catalog.entries,
            selection,
            guardrails: GuardrailConfig {
                prohibited_phrases:   tone.prohibited_phrases,
                predatory_categories: eligibility.predatory_categories,
            },
        })
    }

    /// Reject any configuration that would make a batch non-deterministic
    /// or silently wrong. Called before any subject is processed.
    pub fn validate(&self) -> PipelineResult<()> {
        self.validate_windows()?;
        self.validate_signals()?;
        self.validate_personas()?;
        self.validate_selection()?;
        self.validate_catalog()?;
        self.validate_guardrails()?;
        Ok(())
    }

    fn validate_windows(&self) -> PipelineResult<()> {
        let w = &self.windows;
        if w.short_days == 0 || w.short_days >= w.long_days {
            return Err(PipelineError::invalid_config(format!(
                "windows must satisfy 0 < short_days < long_days (got {} / {})",
                w.short_days, w.long_days
            )));
        }
        Ok(())
    }

    fn validate_signals(&self) -> PipelineResult<()> {
        let s = &self.signals;
        if s.utilization_breakpoints.is_empty() {
            return Err(PipelineError::invalid_config("utilization_breakpoints is empty"));
        }
        for pair in s.utilization_breakpoints.windows(2) {
            if pair[0] >= pair[1] {
                return Err(PipelineError::invalid_config(
                    "utilization_breakpoints must be strictly ascending",
                ));
            }
        }
        for &b in &s.utilization_breakpoints {
            require_ratio("utilization breakpoint", b)?;
        }
        require_non_negative("minimum_payment_tolerance", s.minimum_payment_tolerance)?;
        require_ratio("recurring_amount_tolerance", s.recurring_amount_tolerance)?;
        require_ratio("payroll_amount_tolerance", s.payroll_amount_tolerance)?;
        require_non_negative("payroll_min_amount", s.payroll_min_amount)?;
        if !(s.days_per_month.is_finite() && s.days_per_month > 0.0) {
            return Err(PipelineError::invalid_config("days_per_month must be positive"));
        }
        if s.recurring_min_occurrences < 2 {
            return Err(PipelineError::invalid_config(
                "recurring_min_occurrences must be at least 2",
            ));
        }
        if s.recurring_lookback_days == 0 {
            return Err(PipelineError::invalid_config("recurring_lookback_days must be positive"));
        }
        if s.interest_categories.is_empty() || s.payroll_categories.is_empty() {
            return Err(PipelineError::invalid_config(
                "interest_categories and payroll_categories must be non-empty",
            ));
        }
        Ok(())
    }

    fn validate_personas(&self) -> PipelineResult<()> {
        let p = &self.personas;
        let expected = Persona::RULE_PERSONAS;
        let mut seen = HashSet::new();
        for persona in &p.priority {
            if *persona == Persona::General {
                return Err(PipelineError::invalid_config(
                    "the default persona cannot appear in the priority list",
                ));
            }
            if !seen.insert(*persona) {
                return Err(PipelineError::invalid_config(format!(
                    "persona {} appears more than once in the priority list",
                    persona.as_str()
                )));
            }
        }
        if let Some(missing) = expected.iter().find(|e| !seen.contains(*e)) {
            return Err(PipelineError::invalid_config(format!(
                "priority list is missing persona {}",
                missing.as_str()
            )));
        }

        let t = &p.thresholds;
        require_ratio("high_utilization", t.high_utilization)?;
        require_ratio("savings_max_utilization", t.savings_max_utilization)?;
        require_ratio("subscription_spend_ratio", t.subscription_spend_ratio)?;
        require_non_negative("cash_buffer_months", t.cash_buffer_months)?;
        require_non_negative("subscription_monthly_total", t.subscription_monthly_total)?;
        require_non_negative("savings_monthly_inflow", t.savings_monthly_inflow)?;
        if !t.savings_growth_rate.is_finite() {
            return Err(PipelineError::invalid_config("savings_growth_rate must be finite"));
        }
        if t.pay_gap_days <= 0 {
            return Err(PipelineError::invalid_config("pay_gap_days must be positive"));
        }
        if t.subscription_min_merchants == 0 {
            return Err(PipelineError::invalid_config(
                "subscription_min_merchants must be positive",
            ));
        }
        Ok(())
    }

    fn validate_selection(&self) -> PipelineResult<()> {
        let s = &self.selection;
        if s.education_max == 0 || s.education_min > s.education_max {
            return Err(PipelineError::invalid_config(format!(
                "education bounds invalid: min {} max {}",
                s.education_min, s.education_max
            )));
        }
        if s.offer_min > s.offer_max {
            return Err(PipelineError::invalid_config(format!(
                "offer bounds invalid: min {} max {}",
                s.offer_min, s.offer_max
            )));
        }
        if s.disclaimer.trim().is_empty() {
            return Err(PipelineError::invalid_config("disclaimer is empty"));
        }
        Ok(())
    }

    fn validate_catalog(&self) -> PipelineResult<()> {
        let mut ids = HashSet::new();
        for entry in &self.catalog {
            if !ids.insert(entry.content_id.as_str()) {
                return Err(PipelineError::invalid_config(format!(
                    "duplicate catalog content_id {}",
                    entry.content_id
                )));
            }
            if entry.personas.is_empty() {
                return Err(PipelineError::invalid_config(format!(
                    "catalog entry {} is not tagged for any persona",
                    entry.content_id
                )));
            }
            let placeholders = template_placeholders(&entry.rationale_template);
            if !placeholders.iter().any(|p| is_signal_placeholder(p)) {
                return Err(PipelineError::invalid_config(format!(
                    "catalog entry {} has a rationale template with no signal placeholder",
                    entry.content_id
                )));
            }
            if let Some(unknown) = placeholders.iter().find(|p| !KNOWN_PLACEHOLDERS.contains(*p)) {
                return Err(PipelineError::invalid_config(format!(
                    "catalog entry {} uses unknown placeholder {{{unknown}}}",
                    entry.content_id
                )));
            }
            if entry.kind == ContentKind::PartnerOffer && entry.offer.is_none() {
                return Err(PipelineError::invalid_config(format!(
                    "partner offer {} has no offer terms",
                    entry.content_id
                )));
            }
        }

        let all = Persona::RULE_PERSONAS.iter().chain(std::iter::once(&Persona::General));
        for persona in all {
            if !self.catalog.iter().any(|e| e.personas.contains(persona)) {
                return Err(PipelineError::invalid_config(format!(
                    "catalog has no entries for persona {}",
                    persona.as_str()
                )));
            }
        }
        Ok(())
    }

    fn validate_guardrails(&self) -> PipelineResult<()> {
        let mut phrases = HashSet::new();
        for rule in &self.guardrails.prohibited_phrases {
            let phrase = rule.phrase.trim().to_ascii_lowercase();
            if phrase.is_empty() {
                return Err(PipelineError::invalid_config("empty prohibited phrase"));
            }
            if !phrases.insert(phrase) {
                return Err(PipelineError::invalid_config(format!(
                    "prohibited phrase '{}' listed twice",
                    rule.phrase
                )));
            }
        }
        let contains_prohibited = |text: &str| {
            let lower = text.to_ascii_lowercase();
            phrases.iter().find(|p| lower.contains(p.as_str())).cloned()
        };
        if let Some(p) = contains_prohibited(&self.selection.disclaimer) {
            return Err(PipelineError::invalid_config(format!(
                "disclaimer contains prohibited phrase '{p}'"
            )));
        }
        for rule in &self.guardrails.prohibited_phrases {
            if let Some(sub) = &rule.substitution {
                if let Some(p) = contains_prohibited(sub) {
                    return Err(PipelineError::invalid_config(format!(
                        "substitution for '{}' contains prohibited phrase '{p}'",
                        rule.phrase
                    )));
                }
            }
        }
        Ok(())
    }
}

fn require_ratio(name: &str, value: f64) -> PipelineResult<()> {
    if !(value.is_finite() && (0.0..=1.0).contains(&value)) {
        return Err(PipelineError::invalid_config(format!(
            "{name} must be a ratio in [0, 1] (got {value})"
        )));
    }
    Ok(())
}

fn require_non_negative(name: &str, value: f64) -> PipelineResult<()> {
    if !(value.is_finite() && value >= 0.0) {
        return Err(PipelineError::invalid_config(format!(
            "{name} must be a non-negative number (got {value})"
        )));
    }
    Ok(())
}
