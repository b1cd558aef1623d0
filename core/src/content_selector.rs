//! Content selector: maps (persona, signals) to candidate recommendations.
//!
//! RULES:
//!   - Selection is ordered by (catalog priority, content_id). No randomness,
//!     so re-running on unchanged data yields the same candidates.
//!   - Every rationale embeds at least one concrete signal value. An entry
//!     whose template cannot be filled for this subject is skipped.
//!   - Every candidate's content ends with the configured disclaimer, verbatim.
//!   - Too few eligible entries is a warning, never a failure.
//!
//! Rationale values come from the window each persona rule reads: credit
//! and subscription values from the short window, income and savings
//! values from the long window.

use crate::{
    config::{CatalogEntry, ContentKind, OfferTerms, SelectionConfig},
    persona_classifier::Persona,
    signal_extractor::WindowedSignals,
    types::ContentId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every placeholder a rationale template may use.
pub const KNOWN_PLACEHOLDERS: &[&str] = &[
    "card_mask",
    "utilization_pct",
    "card_balance",
    "card_limit",
    "interest_total",
    "recurring_count",
    "recurring_monthly",
    "recurring_ratio_pct",
    "top_merchant",
    "monthly_spend",
    "pay_gap_days",
    "cash_buffer_months",
    "income_cv_pct",
    "monthly_income",
    "savings_balance",
    "savings_growth_pct",
    "net_inflow_monthly",
    "emergency_months",
    "short_window_days",
    "long_window_days",
];

/// Placeholders that describe the window rather than the subject. They can
/// appear in a rationale but never count as its grounding.
pub const WINDOW_PLACEHOLDERS: &[&str] = &["short_window_days", "long_window_days"];

pub fn is_signal_placeholder(key: &str) -> bool {
    !WINDOW_PLACEHOLDERS.contains(&key)
}

/// `{name}` tokens in a template, in order of appearance.
pub fn template_placeholders(template: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                out.push(&after[..close]);
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    out
}

/// `$1,234.56`
pub fn format_money(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddedValue {
    pub signal: String,
    pub value:  String,
}

/// Formatted signal values available to rationale templates.
#[derive(Debug, Clone, Default)]
pub struct RationaleValues {
    values: BTreeMap<&'static str, String>,
}

impl RationaleValues {
    pub fn from_signals(signals: &WindowedSignals) -> Self {
        let mut v = BTreeMap::new();
        let short = &signals.short;
        let long = &signals.long;
        v.insert("short_window_days", short.window_days.to_string());
        v.insert("long_window_days", long.window_days.to_string());

        let credit = &short.credit;
        if let Some(card) = &credit.top_card {
            v.insert("card_mask", card.mask.clone());
            v.insert("utilization_pct", format!("{:.0}%", card.utilization * 100.0));
            v.insert("card_balance", format_money(card.balance));
            v.insert("card_limit", format_money(card.limit));
        }
        if credit.interest_charged {
            v.insert("interest_total", format_money(credit.interest_charge_total));
        }

        let subs = &short.subscriptions;
        if subs.recurring_merchant_count > 0 {
            v.insert("recurring_count", subs.recurring_merchant_count.to_string());
            v.insert("recurring_monthly", format_money(subs.monthly_recurring_total));
        }
        if let Some(ratio) = subs.recurring_spend_ratio.filter(|_| subs.recurring_merchant_count > 0) {
            v.insert("recurring_ratio_pct", format!("{:.0}%", ratio * 100.0));
        }
        if let Some(top) = subs.merchants.first() {
            v.insert("top_merchant", top.merchant.clone());
        }
        v.insert("monthly_spend", format_money(subs.monthly_spend));

        let income = &long.income;
        if let Some(gap) = income.pay_gap_days {
            v.insert("pay_gap_days", gap.to_string());
        }
        if let Some(buffer) = income.cash_buffer_months {
            v.insert("cash_buffer_months", format!("{buffer:.1}"));
        }
        if let Some(cv) = income.income_variability {
            v.insert("income_cv_pct", format!("{:.0}%", cv * 100.0));
        }
        if income.monthly_income > 0.0 {
            v.insert("monthly_income", format_money(income.monthly_income));
        }

        let savings = &long.savings;
        if savings.savings_account_count > 0 {
            v.insert("savings_balance", format_money(savings.savings_balance));
            v.insert("net_inflow_monthly", format_money(savings.monthly_net_inflow));
        }
        if let Some(growth) = savings.growth_rate {
            v.insert("savings_growth_pct", format!("{:.1}%", growth * 100.0));
        }
        if let Some(months) = savings.emergency_fund_months {
            v.insert("emergency_months", format!("{months:.1}"));
        }

        Self { values: v }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Fill a template in one left-to-right pass; inserted values are never
    /// scanned again. `None` if any placeholder has no value for this subject
    /// or no signal value ends up embedded.
    pub fn render(&self, template: &str) -> Option<(String, Vec<EmbeddedValue>)> {
        let mut text = String::with_capacity(template.len());
        let mut embedded: Vec<EmbeddedValue> = Vec::new();
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else { break };
            let key = &after[..close];
            let value = self.get(key)?;
            text.push_str(&rest[..open]);
            text.push_str(value);
            if is_signal_placeholder(key) && !embedded.iter().any(|e| e.signal == key) {
                embedded.push(EmbeddedValue { signal: key.to_string(), value: value.to_string() });
            }
            rest = &after[close + 1..];
        }
        text.push_str(rest);
        (!embedded.is_empty()).then_some((text, embedded))
    }

    /// Template keys with no value for this subject.
    pub fn missing<'t>(&self, template: &'t str) -> Vec<&'t str> {
        template_placeholders(template)
            .into_iter()
            .filter(|k| self.get(k).is_none())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationCandidate {
    pub content_id:      ContentId,
    pub kind:            ContentKind,
    pub persona:         Persona,
    pub priority:        u32,
    pub title:           String,
    /// Body followed by the disclaimer.
    pub content:         String,
    pub rationale:       String,
    pub embedded_values: Vec<EmbeddedValue>,
    pub disclaimer:      String,
    #[serde(default)]
    pub offer:           Option<OfferTerms>,
}

impl RecommendationCandidate {
    pub fn ends_with_disclaimer(&self) -> bool {
        self.content.ends_with(&self.disclaimer)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnderFill {
    pub kind:      ContentKind,
    pub persona:   Persona,
    pub selected:  usize,
    pub required:  usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedEntry {
    pub content_id: ContentId,
    pub missing:    Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Selection {
    pub candidates: Vec<RecommendationCandidate>,
    pub under_fill: Vec<UnderFill>,
    /// Entries tagged for the persona whose rationale could not be grounded.
    pub skipped:    Vec<SkippedEntry>,
}

pub struct ContentSelector<'a> {
    catalog:   &'a [CatalogEntry],
    selection: &'a SelectionConfig,
}

impl<'a> ContentSelector<'a> {
    pub fn new(catalog: &'a [CatalogEntry], selection: &'a SelectionConfig) -> Self {
        Self { catalog, selection }
    }

    pub fn select(&self, persona: Persona, signals: &WindowedSignals) -> Selection {
        let values = RationaleValues::from_signals(signals);
        let mut out = Selection::default();

        let s = self.selection;
        self.pick(persona, ContentKind::Education, s.education_min, s.education_max, &values, &mut out);
        self.pick(persona, ContentKind::PartnerOffer, s.offer_min, s.offer_max, &values, &mut out);
        out
    }

    fn pick(
        &self,
        persona: Persona,
        kind:    ContentKind,
        min:     usize,
        max:     usize,
        values:  &RationaleValues,
        out:     &mut Selection,
    ) {
        let mut pool: Vec<&CatalogEntry> = self
            .catalog
            .iter()
            .filter(|e| e.kind == kind && e.personas.contains(&persona))
            .collect();
        pool.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.content_id.cmp(&b.content_id)));

        let mut selected = 0usize;
        for entry in pool {
            if selected == max {
                break;
            }
            match values.render(&entry.rationale_template) {
                Some((rationale, embedded_values)) => {
                    out.candidates.push(self.candidate(entry, persona, rationale, embedded_values));
                    selected += 1;
                }
                None => out.skipped.push(SkippedEntry {
                    content_id: entry.content_id.clone(),
                    missing:    values
                        .missing(&entry.rationale_template)
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                }),
            }
        }

        if selected < min {
            log::warn!(
                "persona={} {:?}: selected {selected} of required {min}",
                persona.as_str(),
                kind
            );
            out.under_fill.push(UnderFill { kind, persona, selected, required: min });
        }
    }

    fn candidate(
        &self,
        entry: &CatalogEntry,
        persona: Persona,
        rationale: String,
        embedded_values: Vec<EmbeddedValue>,
    ) -> RecommendationCandidate {
        let disclaimer = self.selection.disclaimer.clone();
        RecommendationCandidate {
            content_id: entry.content_id.clone(),
            kind: entry.kind,
            persona,
            priority: entry.priority,
            title: entry.title.clone(),
            content: format!("{}\n\n{}", entry.body.trim_end(), disclaimer),
            rationale,
            embedded_values,
            disclaimer,
            offer: entry.offer.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_extracted_in_order() {
        assert_eq!(
            template_placeholders("Your card ending in {card_mask} is at {utilization_pct}."),
            vec!["card_mask", "utilization_pct"]
        );
        assert!(template_placeholders("no values here").is_empty());
        assert!(template_placeholders("dangling {brace").is_empty());
    }

    fn values(pairs: &[(&'static str, &str)]) -> RationaleValues {
        RationaleValues {
            values: pairs.iter().map(|(k, v)| (*k, v.to_string())).collect(),
        }
    }

    #[test]
    fn inserted_values_are_not_expanded_again() {
        let v = values(&[("top_merchant", "{card_mask} Club"), ("card_mask", "4242")]);
        let (text, embedded) = v.render("{top_merchant} renews on card {card_mask}.").unwrap();
        assert_eq!(text, "{card_mask} Club renews on card 4242.");
        assert_eq!(embedded.len(), 2);
    }

    #[test]
    fn window_length_alone_does_not_ground_a_rationale() {
        let v = values(&[("short_window_days", "30"), ("interest_total", "$58.20")]);
        assert!(v.render("Nothing here in {short_window_days} days.").is_none());

        let (text, embedded) = v
            .render("You paid {interest_total} in the last {short_window_days} days.")
            .unwrap();
        assert_eq!(text, "You paid $58.20 in the last 30 days.");
        let signals: Vec<&str> = embedded.iter().map(|e| e.signal.as_str()).collect();
        assert_eq!(signals, vec!["interest_total"]);
    }

    #[test]
    fn money_is_grouped_with_commas() {
        assert_eq!(format_money(0.0), "$0.00");
        assert_eq!(format_money(87.5), "$87.50");
        assert_eq!(format_money(3400.0), "$3,400.00");
        assert_eq!(format_money(1234567.891), "$1,234,567.89");
        assert_eq!(format_money(-42.0), "-$42.00");
    }
}
