//! Signal extractor: behavioral metrics per subject, per window.
//!
//! RULES:
//!   - Every signal is recomputed from scratch on each run.
//!   - Pending transactions never contribute to any signal.
//!   - Missing data resolves to `None` or a zero sentinel, never an error.
//!     Downstream rules treat `None` as "does not satisfy".

mod credit;
mod income;
mod savings;
mod subscription;

pub use credit::{CardUtilization, CreditSignals, UtilizationFlag};
pub use income::IncomeSignals;
pub use savings::SavingsSignals;
pub use subscription::{RecurringMerchant, SubscriptionSignals};

use crate::{
    config::{SignalConfig, WindowConfig},
    input::{SubjectInputs, TransactionRecord},
    window::{Window, WindowKind},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One window's worth of signals for one subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BehaviorSignals {
    pub window:        WindowKind,
    pub window_days:   u32,
    pub credit:        CreditSignals,
    pub subscriptions: SubscriptionSignals,
    pub savings:       SavingsSignals,
    pub income:        IncomeSignals,
}

/// Both windows, as handed to the classifier and selector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowedSignals {
    pub reference_date: NaiveDate,
    pub short:          BehaviorSignals,
    pub long:           BehaviorSignals,
}

impl WindowedSignals {
    pub fn get(&self, kind: WindowKind) -> &BehaviorSignals {
        match kind {
            WindowKind::Short => &self.short,
            WindowKind::Long  => &self.long,
        }
    }
}

pub struct SignalExtractor<'a> {
    signals: &'a SignalConfig,
    windows: &'a WindowConfig,
}

impl<'a> SignalExtractor<'a> {
    pub fn new(signals: &'a SignalConfig, windows: &'a WindowConfig) -> Self {
        Self { signals, windows }
    }

    pub fn extract(&self, inputs: &SubjectInputs, reference_date: NaiveDate) -> WindowedSignals {
        let short = Window::new(WindowKind::Short, self.windows.short_days, reference_date);
        let long = Window::new(WindowKind::Long, self.windows.long_days, reference_date);
        WindowedSignals {
            reference_date,
            short: self.extract_window(inputs, &short),
            long:  self.extract_window(inputs, &long),
        }
    }

    fn extract_window(&self, inputs: &SubjectInputs, window: &Window) -> BehaviorSignals {
        let spend = SpendSummary::compute(inputs, window, self.signals);

        let signals = BehaviorSignals {
            window:        window.kind,
            window_days:   window.days,
            credit:        credit::extract(inputs, window, self.signals),
            subscriptions: subscription::extract(inputs, window, self.signals, &spend),
            savings:       savings::extract(inputs, window, self.signals, &spend),
            income:        income::extract(inputs, window, self.signals, &spend),
        };

        log::debug!(
            "subject={} window={} util={:?} recurring={} growth={:?} pay_gap={:?}",
            inputs.subject_id,
            window.kind.as_str(),
            signals.credit.max_utilization,
            signals.subscriptions.recurring_merchant_count,
            signals.savings.growth_rate,
            signals.income.pay_gap_days,
        );

        signals
    }
}

/// Spending within a window: outflows from non-savings accounts that are
/// not money movement (transfers, card payments).
#[derive(Debug, Clone, Copy)]
pub(crate) struct SpendSummary {
    pub total:           f64,
    pub monthly_average: f64,
}

impl SpendSummary {
    fn compute(inputs: &SubjectInputs, window: &Window, config: &SignalConfig) -> Self {
        let total: f64 = settled_in(inputs, window)
            .filter(|t| is_spend(inputs, t, config))
            .map(|t| t.amount.abs())
            .sum();
        Self {
            total,
            monthly_average: total / window.months(config.days_per_month),
        }
    }

    /// `balance / monthly spend`, absent when there is no spend to divide by.
    pub fn months_covered(&self, balance: f64) -> Option<f64> {
        (self.monthly_average > 0.0).then(|| balance / self.monthly_average)
    }
}

/// Settled transactions dated inside `window`.
pub(crate) fn settled_in<'a>(
    inputs: &'a SubjectInputs,
    window: &'a Window,
) -> impl Iterator<Item = &'a TransactionRecord> + 'a {
    inputs
        .transactions
        .iter()
        .filter(move |t| !t.pending && window.contains(t.date))
}

pub(crate) fn is_spend(inputs: &SubjectInputs, t: &TransactionRecord, config: &SignalConfig) -> bool {
    t.is_outflow()
        && !config.is_non_spend(&t.category)
        && inputs.account(&t.account_id).is_some_and(|a| !a.kind.is_savings())
}

/// Median of a non-empty slice; `None` when empty.
pub(crate) fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// True when every value lies within `tolerance` (relative) of the median.
pub(crate) fn within_tolerance(values: &[f64], tolerance: f64) -> bool {
    match median(values) {
        Some(m) if m > 0.0 => values.iter().all(|v| (v - m).abs() <= tolerance * m + 1e-9),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_handles_even_and_odd_lengths() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn tolerance_is_relative_to_median() {
        assert!(within_tolerance(&[15.49, 15.49, 15.99], 0.10));
        assert!(!within_tolerance(&[10.0, 10.0, 14.0], 0.10));
        assert!(!within_tolerance(&[0.0, 0.0], 0.10));
    }
}
