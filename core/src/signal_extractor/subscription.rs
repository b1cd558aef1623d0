//! Subscription signals: recurring merchants and their share of spend.
//!
//! A merchant is recurring when it appears at least
//! `recurring_min_occurrences` times in the lookback with every amount
//! within `recurring_amount_tolerance` of the merchant's median amount.
//! The lookback is the window itself or `recurring_lookback_days`,
//! whichever is longer, so a 30-day window can still see monthly bills.

use super::{is_spend, settled_in, within_tolerance, SpendSummary};
use crate::{config::SignalConfig, input::SubjectInputs, window::Window};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecurringMerchant {
    pub merchant:       String,
    pub occurrences:    usize,
    pub average_amount: f64,
    pub last_seen:      NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionSignals {
    pub recurring_merchant_count: usize,
    pub monthly_recurring_total:  f64,
    /// Monthly recurring total over monthly spend; `None` without spend.
    pub recurring_spend_ratio:    Option<f64>,
    pub total_spend:              f64,
    pub monthly_spend:            f64,
    /// Ordered by average amount, largest first.
    pub merchants:                Vec<RecurringMerchant>,
}

pub(super) fn extract(
    inputs: &SubjectInputs,
    window: &Window,
    config: &SignalConfig,
    spend: &SpendSummary,
) -> SubscriptionSignals {
    let lookback = window.widened_to(config.recurring_lookback_days);

    // BTreeMap keeps merchant iteration order stable across runs.
    let mut groups: BTreeMap<String, Vec<_>> = BTreeMap::new();
    for t in settled_in(inputs, &lookback).filter(|t| is_spend(inputs, t, config)) {
        if let Some(key) = t.merchant_key() {
            groups.entry(key).or_default().push(t);
        }
    }

    let mut merchants: Vec<RecurringMerchant> = groups
        .into_values()
        .filter(|txns| txns.len() >= config.recurring_min_occurrences)
        .filter_map(|txns| {
            let amounts: Vec<f64> = txns.iter().map(|t| t.amount.abs()).collect();
            if !within_tolerance(&amounts, config.recurring_amount_tolerance) {
                return None;
            }
            let latest = txns.iter().max_by(|a, b| {
                a.date.cmp(&b.date).then_with(|| a.transaction_id.cmp(&b.transaction_id))
            })?;
            Some(RecurringMerchant {
                merchant:       latest.merchant_name.as_deref().unwrap_or_default().trim().to_string(),
                occurrences:    txns.len(),
                average_amount: amounts.iter().sum::<f64>() / amounts.len() as f64,
                last_seen:      latest.date,
            })
        })
        .collect();
    merchants.sort_by(|a, b| {
        b.average_amount
            .total_cmp(&a.average_amount)
            .then_with(|| a.merchant.cmp(&b.merchant))
    });

    let monthly_recurring_total: f64 = merchants.iter().map(|m| m.average_amount).sum();
    let recurring_spend_ratio = (spend.monthly_average > 0.0)
        .then(|| monthly_recurring_total / spend.monthly_average);

    SubscriptionSignals {
        recurring_merchant_count: merchants.len(),
        monthly_recurring_total,
        recurring_spend_ratio,
        total_spend: spend.total,
        monthly_spend: spend.monthly_average,
        merchants,
    }
}
