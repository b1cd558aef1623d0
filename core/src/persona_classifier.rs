//! Persona classifier: one persona per subject per run.
//!
//! RULES:
//!   - Rules are evaluated in the configured priority order, first match wins.
//!   - Order is the only tie-break. Nothing else is consulted.
//!   - The assignment is a pure function of the signals and the order;
//!     subject identity never reaches this module.
//!   - An absent signal never satisfies a predicate.
//!
//! Each rule reads one window:
//!   high_utilization   → short (current credit position, recent interest)
//!   variable_income    → long  (pay gaps need several pay periods)
//!   subscription_heavy → short (current monthly run-rate)
//!   savings_builder    → long  (growth needs a longer baseline)

use crate::{
    config::{PersonaConfig, PersonaThresholds},
    signal_extractor::{BehaviorSignals, WindowedSignals},
    window::WindowKind,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    HighUtilization,
    VariableIncome,
    SubscriptionHeavy,
    SavingsBuilder,
    /// Fallback when no rule matches.
    General,
}

impl Persona {
    /// Every persona backed by a rule, in the reference priority order.
    pub const RULE_PERSONAS: [Persona; 4] = [
        Persona::HighUtilization,
        Persona::VariableIncome,
        Persona::SubscriptionHeavy,
        Persona::SavingsBuilder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighUtilization   => "high_utilization",
            Self::VariableIncome    => "variable_income",
            Self::SubscriptionHeavy => "subscription_heavy",
            Self::SavingsBuilder    => "savings_builder",
            Self::General           => "general",
        }
    }

    /// The window this persona's rule reads. `None` for the fallback.
    pub fn rule_window(&self) -> Option<WindowKind> {
        match self {
            Self::HighUtilization | Self::SubscriptionHeavy => Some(WindowKind::Short),
            Self::VariableIncome | Self::SavingsBuilder     => Some(WindowKind::Long),
            Self::General                                   => None,
        }
    }

    /// Evaluate this persona's predicate. Returns the criteria that held
    /// when the rule matches, `None` otherwise.
    pub fn evaluate(&self, s: &BehaviorSignals, t: &PersonaThresholds) -> Option<Vec<String>> {
        match self {
            Self::HighUtilization   => high_utilization(s, t),
            Self::VariableIncome    => variable_income(s, t),
            Self::SubscriptionHeavy => subscription_heavy(s, t),
            Self::SavingsBuilder    => savings_builder(s, t),
            Self::General           => Some(vec!["no higher-priority rule matched".into()]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleEvaluation {
    /// 1-based position in the priority order.
    pub position: usize,
    pub persona:  Persona,
    pub window:   WindowKind,
    pub matched:  bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FiredRule {
    pub position: usize,
    pub rule_id:  String,
    pub window:   Option<WindowKind>,
    pub criteria: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonaAssignment {
    pub persona:     Persona,
    pub fired_rule:  FiredRule,
    /// Every rule evaluated, in order, up to and including the one that fired.
    pub evaluations: Vec<RuleEvaluation>,
}

pub struct PersonaClassifier<'a> {
    config: &'a PersonaConfig,
}

impl<'a> PersonaClassifier<'a> {
    pub fn new(config: &'a PersonaConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, signals: &WindowedSignals) -> PersonaAssignment {
        let mut evaluations = Vec::with_capacity(self.config.priority.len());

        for (idx, persona) in self.config.priority.iter().enumerate() {
            let Some(window) = persona.rule_window() else { continue };
            let outcome = persona.evaluate(signals.get(window), &self.config.thresholds);

            evaluations.push(RuleEvaluation {
                position: idx + 1,
                persona:  *persona,
                window,
                matched:  outcome.is_some(),
            });

            if let Some(criteria) = outcome {
                return PersonaAssignment {
                    persona: *persona,
                    fired_rule: FiredRule {
                        position: idx + 1,
                        rule_id:  persona.as_str().to_string(),
                        window:   Some(window),
                        criteria,
                    },
                    evaluations,
                };
            }
        }

        let fallback = Persona::General;
        PersonaAssignment {
            persona: fallback,
            fired_rule: FiredRule {
                position: self.config.priority.len() + 1,
                rule_id:  "default".to_string(),
                window:   None,
                criteria: fallback
                    .evaluate(&signals.short, &self.config.thresholds)
                    .unwrap_or_default(),
            },
            evaluations,
        }
    }
}

fn pct(ratio: f64) -> f64 {
    ratio * 100.0
}

fn high_utilization(s: &BehaviorSignals, t: &PersonaThresholds) -> Option<Vec<String>> {
    let c = &s.credit;
    let mut met = Vec::new();
    if let Some(u) = c.max_utilization.filter(|u| *u >= t.high_utilization) {
        met.push(format!(
            "utilization {:.1}% >= {:.0}%",
            pct(u),
            pct(t.high_utilization)
        ));
    }
    if c.interest_charged {
        met.push(format!("interest charges ${:.2} in window", c.interest_charge_total));
    }
    if c.minimum_payment_only {
        met.push("minimum payment only".into());
    }
    if c.overdue {
        met.push("liability overdue".into());
    }
    (!met.is_empty()).then_some(met)
}

fn variable_income(s: &BehaviorSignals, t: &PersonaThresholds) -> Option<Vec<String>> {
    let gap = s.income.pay_gap_days.filter(|g| *g > t.pay_gap_days)?;
    let buffer = s.income.cash_buffer_months.filter(|b| *b < t.cash_buffer_months)?;
    Some(vec![
        format!("pay gap {gap} days > {} days", t.pay_gap_days),
        format!("cash buffer {buffer:.2} months < {:.1} months", t.cash_buffer_months),
    ])
}

fn subscription_heavy(s: &BehaviorSignals, t: &PersonaThresholds) -> Option<Vec<String>> {
    let sub = &s.subscriptions;
    if sub.recurring_merchant_count < t.subscription_min_merchants {
        return None;
    }
    let mut met = vec![format!(
        "{} recurring merchants >= {}",
        sub.recurring_merchant_count, t.subscription_min_merchants
    )];
    let mut spend_met = false;
    if sub.monthly_recurring_total >= t.subscription_monthly_total {
        met.push(format!(
            "recurring ${:.2}/month >= ${:.2}",
            sub.monthly_recurring_total, t.subscription_monthly_total
        ));
        spend_met = true;
    }
    if let Some(r) = sub.recurring_spend_ratio.filter(|r| *r >= t.subscription_spend_ratio) {
        met.push(format!(
            "recurring share {:.1}% >= {:.0}%",
            pct(r),
            pct(t.subscription_spend_ratio)
        ));
        spend_met = true;
    }
    spend_met.then_some(met)
}

fn savings_builder(s: &BehaviorSignals, t: &PersonaThresholds) -> Option<Vec<String>> {
    let sav = &s.savings;
    if sav.savings_account_count == 0 || !s.credit.utilization_below(t.savings_max_utilization) {
        return None;
    }
    let mut met = Vec::new();
    if let Some(g) = sav.growth_rate.filter(|g| *g >= t.savings_growth_rate) {
        met.push(format!(
            "savings growth {:.1}% >= {:.1}%",
            pct(g),
            pct(t.savings_growth_rate)
        ));
    }
    if sav.monthly_net_inflow >= t.savings_monthly_inflow {
        met.push(format!(
            "net savings inflow ${:.2}/month >= ${:.2}",
            sav.monthly_net_inflow, t.savings_monthly_inflow
        ));
    }
    if met.is_empty() {
        return None;
    }
    met.push(match s.credit.max_utilization {
        Some(u) => format!(
            "utilization {:.1}% < {:.0}%",
            pct(u),
            pct(t.savings_max_utilization)
        ),
        None => "no revolving credit".into(),
    });
    Some(met)
}
