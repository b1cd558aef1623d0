//! Savings signals over savings-type accounts (savings, money market, HSA).

use super::{settled_in, SpendSummary};
use crate::{config::SignalConfig, input::SubjectInputs, window::Window};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavingsSignals {
    pub savings_account_count: usize,
    pub savings_balance:       f64,
    /// Money in minus money out of savings accounts within the window.
    pub net_inflow:            f64,
    pub monthly_net_inflow:    f64,
    /// `(end - start) / start`; absent when the start balance is not positive.
    pub growth_rate:           Option<f64>,
    pub emergency_fund_months: Option<f64>,
}

pub(super) fn extract(
    inputs: &SubjectInputs,
    window: &Window,
    config: &SignalConfig,
    spend: &SpendSummary,
) -> SavingsSignals {
    let savings_accounts: Vec<_> = inputs
        .accounts
        .iter()
        .filter(|a| a.kind.is_savings())
        .collect();

    if savings_accounts.is_empty() {
        return SavingsSignals {
            savings_account_count: 0,
            savings_balance:       0.0,
            net_inflow:            0.0,
            monthly_net_inflow:    0.0,
            growth_rate:           None,
            emergency_fund_months: None,
        };
    }

    let savings_balance: f64 = savings_accounts.iter().map(|a| a.current_balance).sum();
    let net_inflow: f64 = settled_in(inputs, window)
        .filter(|t| savings_accounts.iter().any(|a| a.account_id == t.account_id))
        .map(|t| t.amount)
        .sum();

    let start_balance = savings_balance - net_inflow;
    let growth_rate = (start_balance > 0.0).then(|| (savings_balance - start_balance) / start_balance);

    SavingsSignals {
        savings_account_count: savings_accounts.len(),
        savings_balance,
        net_inflow,
        monthly_net_inflow: net_inflow / window.months(config.days_per_month),
        growth_rate,
        emergency_fund_months: spend.months_covered(savings_balance),
    }
}
