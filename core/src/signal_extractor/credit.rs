//! Credit signals: utilization, breakpoint flags, payment behaviour,
//! interest and overdue status.
//!
//! Utilization, minimum-payment-only and overdue describe the subject's
//! position on the reference date and are identical in both windows.
//! Only the interest flag depends on the window.

use super::settled_in;
use crate::{config::SignalConfig, input::SubjectInputs, window::Window};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CardUtilization {
    pub account_id:  String,
    pub mask:        String,
    pub balance:     f64,
    pub limit:       f64,
    pub utilization: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UtilizationFlag {
    pub threshold: f64,
    pub triggered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditSignals {
    pub card_count:            usize,
    /// Highest per-card utilization; the representative value.
    pub max_utilization:       Option<f64>,
    pub aggregate_utilization: Option<f64>,
    /// The card behind `max_utilization`.
    pub top_card:              Option<CardUtilization>,
    pub utilization_flags:     Vec<UtilizationFlag>,
    pub minimum_payment_only:  bool,
    pub interest_charged:      bool,
    pub interest_charge_total: f64,
    pub overdue:               bool,
}

impl CreditSignals {
    pub fn utilization_at_least(&self, threshold: f64) -> bool {
        self.max_utilization.is_some_and(|u| u >= threshold)
    }

    /// No cards at all counts as below any threshold.
    pub fn utilization_below(&self, threshold: f64) -> bool {
        self.max_utilization.map_or(true, |u| u < threshold)
    }
}

pub(super) fn extract(inputs: &SubjectInputs, window: &Window, config: &SignalConfig) -> CreditSignals {
    let mut card_accounts: Vec<_> = inputs
        .accounts
        .iter()
        .filter(|a| a.kind.is_credit_card())
        .collect();
    card_accounts.sort_by(|a, b| a.account_id.cmp(&b.account_id));

    let cards: Vec<CardUtilization> = card_accounts
        .iter()
        .filter_map(|a| {
            let limit = a.credit_limit.filter(|l| *l > 0.0)?;
            let balance = a.current_balance.max(0.0);
            Some(CardUtilization {
                account_id:  a.account_id.clone(),
                mask:        a.mask.clone(),
                balance,
                limit,
                utilization: balance / limit,
            })
        })
        .collect();

    // First card wins ties so the choice is stable.
    let top_card = cards
        .iter()
        .fold(None::<&CardUtilization>, |best, c| match best {
            Some(b) if b.utilization >= c.utilization => Some(b),
            _ => Some(c),
        })
        .cloned();
    let max_utilization = top_card.as_ref().map(|c| c.utilization);

    let total_limit: f64 = cards.iter().map(|c| c.limit).sum();
    let aggregate_utilization = (total_limit > 0.0)
        .then(|| cards.iter().map(|c| c.balance).sum::<f64>() / total_limit);

    let utilization_flags = config
        .utilization_breakpoints
        .iter()
        .map(|&threshold| UtilizationFlag {
            threshold,
            triggered: max_utilization.is_some_and(|u| u >= threshold),
        })
        .collect();

    let tolerance = config.minimum_payment_tolerance;
    let minimum_payment_only = inputs.liabilities.iter().any(|l| {
        match (l.last_payment_amount, l.minimum_payment_amount) {
            (Some(paid), Some(minimum)) if minimum > 0.0 && paid > 0.0 => {
                let owed_more = l
                    .last_statement_balance
                    .map_or(true, |s| s > minimum + tolerance);
                paid <= minimum + tolerance && owed_more
            }
            _ => false,
        }
    });

    let interest: Vec<f64> = settled_in(inputs, window)
        .filter(|t| config.is_interest(&t.category))
        .map(|t| t.amount.abs())
        .collect();

    CreditSignals {
        card_count: card_accounts.len(),
        max_utilization,
        aggregate_utilization,
        top_card,
        utilization_flags,
        minimum_payment_only,
        interest_charged: !interest.is_empty(),
        interest_charge_total: interest.iter().sum(),
        overdue: inputs.liabilities.iter().any(|l| l.is_overdue == Some(true)),
    }
}
