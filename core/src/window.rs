//! Trailing time windows: the two spans every signal is computed over.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Short, // default 30 days
    Long,  // default 180 days
}

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Long  => "long",
        }
    }
}

/// A concrete window anchored on a reference date.
///
/// Covers `(end - days, end]`: the reference date is included, the day
/// `days` before it is not.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Window {
    pub kind: WindowKind,
    pub days: u32,
    pub end:  NaiveDate,
}

impl Window {
    pub fn new(kind: WindowKind, days: u32, end: NaiveDate) -> Self {
        Self { kind, days, end }
    }

    /// First date inside the window.
    pub fn start(&self) -> NaiveDate {
        self.end - Duration::days(i64::from(self.days) - 1)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start() && date <= self.end
    }

    /// A window over the same end date stretched to at least `days`.
    pub fn widened_to(&self, days: u32) -> Self {
        Self { days: self.days.max(days), ..*self }
    }

    /// Length of the window expressed in months.
    pub fn months(&self, days_per_month: f64) -> f64 {
        f64::from(self.days) / days_per_month
    }
}
