//! Income signals: payroll detection, pay-gap, variability and cash buffer.
//!
//! A deposit is payroll-like when it lands in a checking account, is at
//! least `payroll_min_amount`, is not a transfer, and either carries a
//! payroll category or comes from a payer that deposits at least twice in
//! the window with amounts within `payroll_amount_tolerance` of each other.

use super::{settled_in, within_tolerance, SpendSummary};
use crate::{
    config::SignalConfig,
    input::{SubjectInputs, TransactionRecord},
    window::Window,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncomeSignals {
    pub payroll_deposit_count: usize,
    /// Longest gap in days between consecutive deposits; needs two deposits.
    pub pay_gap_days:          Option<i64>,
    /// Coefficient of variation of deposit amounts.
    pub income_variability:    Option<f64>,
    pub average_deposit:       Option<f64>,
    pub monthly_income:        f64,
    pub liquid_balance:        f64,
    pub cash_buffer_months:    Option<f64>,
}

pub(super) fn extract(
    inputs: &SubjectInputs,
    window: &Window,
    config: &SignalConfig,
    spend: &SpendSummary,
) -> IncomeSignals {
    let deposits = payroll_deposits(inputs, window, config);
    let amounts: Vec<f64> = deposits.iter().map(|t| t.amount).collect();

    let pay_gap_days = deposits
        .windows(2)
        .map(|pair| (pair[1].date - pair[0].date).num_days())
        .max();

    let average_deposit = (!amounts.is_empty()).then(|| amounts.iter().sum::<f64>() / amounts.len() as f64);
    let income_variability = match average_deposit {
        Some(mean) if amounts.len() >= 2 && mean > 0.0 => {
            let variance = amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / amounts.len() as f64;
            Some(variance.sqrt() / mean)
        }
        _ => None,
    };

    let liquid_balance: f64 = inputs
        .accounts
        .iter()
        .filter(|a| a.kind.is_liquid())
        .map(|a| a.current_balance)
        .sum();

    IncomeSignals {
        payroll_deposit_count: deposits.len(),
        pay_gap_days,
        income_variability,
        average_deposit,
        monthly_income: amounts.iter().sum::<f64>() / window.months(config.days_per_month),
        liquid_balance,
        cash_buffer_months: spend.months_covered(liquid_balance.max(0.0)),
    }
}

/// Payroll-like deposits in date order.
fn payroll_deposits<'a>(
    inputs: &'a SubjectInputs,
    window: &'a Window,
    config: &SignalConfig,
) -> Vec<&'a TransactionRecord> {
    let candidates: Vec<&TransactionRecord> = settled_in(inputs, window)
        .filter(|t| t.is_inflow() && t.amount >= config.payroll_min_amount)
        .filter(|t| inputs.account(&t.account_id).is_some_and(|a| a.kind.is_liquid()))
        .filter(|t| config.is_payroll(&t.category) || !config.is_non_spend(&t.category))
        .collect();

    let mut by_payer: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for t in &candidates {
        if let Some(key) = t.merchant_key() {
            by_payer.entry(key).or_default().push(t.amount);
        }
    }
    let recurring_payer = |t: &TransactionRecord| {
        t.merchant_key()
            .and_then(|k| by_payer.get(&k))
            .is_some_and(|amounts| {
                amounts.len() >= 2 && within_tolerance(amounts, config.payroll_amount_tolerance)
            })
    };

    let mut deposits: Vec<&TransactionRecord> = candidates
        .into_iter()
        .filter(|t| config.is_payroll(&t.category) || recurring_payer(*t))
        .collect();
    deposits.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.transaction_id.cmp(&b.transaction_id)));
    deposits
}
