//! Subject input records, as delivered by the ingestion collaborator.
//!
//! SIGN CONVENTION: a positive transaction amount is money into the
//! account, a negative amount is money out of it.
//!
//! Inputs are trusted to be schema-valid. `validate()` only catches the
//! referential problems that would make signal extraction meaningless.

use crate::{
    error::{PipelineError, PipelineResult},
    types::SubjectId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Checking,
    Savings,
    MoneyMarket,
    Hsa,
    CreditCard,
    StudentLoan,
    Mortgage,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checking    => "checking",
            Self::Savings     => "savings",
            Self::MoneyMarket => "money_market",
            Self::Hsa         => "hsa",
            Self::CreditCard  => "credit_card",
            Self::StudentLoan => "student_loan",
            Self::Mortgage    => "mortgage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "checking"     => Some(Self::Checking),
            "savings"      => Some(Self::Savings),
            "money_market" => Some(Self::MoneyMarket),
            "hsa"          => Some(Self::Hsa),
            "credit_card"  => Some(Self::CreditCard),
            "student_loan" => Some(Self::StudentLoan),
            "mortgage"     => Some(Self::Mortgage),
            _ => None,
        }
    }

    /// Savings-type accounts feed the savings signals.
    pub fn is_savings(&self) -> bool {
        matches!(self, Self::Savings | Self::MoneyMarket | Self::Hsa)
    }

    pub fn is_credit_card(&self) -> bool {
        matches!(self, Self::CreditCard)
    }

    /// Liquid accounts feed the cash-buffer signal.
    pub fn is_liquid(&self) -> bool {
        matches!(self, Self::Checking)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountRecord {
    pub account_id:        String,
    pub kind:              AccountKind,
    /// Last four digits, used in rationale text.
    pub mask:              String,
    /// For credit accounts: the amount owed.
    pub current_balance:   f64,
    #[serde(default)]
    pub available_balance: Option<f64>,
    #[serde(default)]
    pub credit_limit:      Option<f64>,
    pub currency:          String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub account_id:     String,
    pub date:           NaiveDate,
    pub amount:         f64,
    #[serde(default)]
    pub merchant_name:  Option<String>,
    pub category:       String,
    #[serde(default)]
    pub pending:        bool,
}

impl TransactionRecord {
    pub fn is_inflow(&self) -> bool  { self.amount > 0.0 }
    pub fn is_outflow(&self) -> bool { self.amount < 0.0 }

    /// Merchant key used for grouping: trimmed and lowercased.
    pub fn merchant_key(&self) -> Option<String> {
        self.merchant_name
            .as_deref()
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LiabilityRecord {
    pub account_id:             String,
    #[serde(default)]
    pub apr_percentage:         Option<f64>,
    #[serde(default)]
    pub minimum_payment_amount: Option<f64>,
    #[serde(default)]
    pub last_payment_amount:    Option<f64>,
    #[serde(default)]
    pub last_statement_balance: Option<f64>,
    #[serde(default)]
    pub is_overdue:             Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsentRecord {
    pub granted:     bool,
    pub recorded_at: DateTime<Utc>,
}

/// Everything the pipeline reads for one subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubjectInputs {
    pub subject_id:   SubjectId,
    #[serde(default)]
    pub accounts:     Vec<AccountRecord>,
    #[serde(default)]
    pub transactions: Vec<TransactionRecord>,
    #[serde(default)]
    pub liabilities:  Vec<LiabilityRecord>,
    /// Latest consent record; `None` means consent was never granted.
    #[serde(default)]
    pub consent:      Option<ConsentRecord>,
}

impl SubjectInputs {
    pub fn new(subject_id: impl Into<SubjectId>) -> Self {
        Self {
            subject_id:   subject_id.into(),
            accounts:     Vec::new(),
            transactions: Vec::new(),
            liabilities:  Vec::new(),
            consent:      None,
        }
    }

    pub fn consent_granted(&self) -> bool {
        self.consent.as_ref().is_some_and(|c| c.granted)
    }

    pub fn account(&self, account_id: &str) -> Option<&AccountRecord> {
        self.accounts.iter().find(|a| a.account_id == account_id)
    }

    pub fn held_products(&self) -> BTreeSet<AccountKind> {
        self.accounts.iter().map(|a| a.kind).collect()
    }

    /// Reject inputs whose references or numbers cannot be analyzed.
    pub fn validate(&self) -> PipelineResult<()> {
        let id = self.subject_id.as_str();
        let mut account_ids = HashSet::new();
        for a in &self.accounts {
            if !account_ids.insert(a.account_id.as_str()) {
                return Err(PipelineError::malformed(
                    id, format!("duplicate account_id {}", a.account_id),
                ));
            }
            if !a.current_balance.is_finite() {
                return Err(PipelineError::malformed(
                    id, format!("account {} has a non-finite balance", a.account_id),
                ));
            }
            if let Some(limit) = a.credit_limit {
                if !limit.is_finite() || limit < 0.0 {
                    return Err(PipelineError::malformed(
                        id, format!("account {} has an invalid credit limit {limit}", a.account_id),
                    ));
                }
            }
        }

        let mut txn_ids = HashSet::new();
        for t in &self.transactions {
            if !txn_ids.insert(t.transaction_id.as_str()) {
                return Err(PipelineError::malformed(
                    id, format!("duplicate transaction_id {}", t.transaction_id),
                ));
            }
            if !account_ids.contains(t.account_id.as_str()) {
                return Err(PipelineError::malformed(
                    id,
                    format!(
                        "transaction {} references unknown account {}",
                        t.transaction_id, t.account_id
                    ),
                ));
            }
            if !t.amount.is_finite() {
                return Err(PipelineError::malformed(
                    id, format!("transaction {} has a non-finite amount", t.transaction_id),
                ));
            }
        }

        for l in &self.liabilities {
            if !account_ids.contains(l.account_id.as_str()) {
                return Err(PipelineError::malformed(
                    id, format!("liability references unknown account {}", l.account_id),
                ));
            }
        }

        Ok(())
    }
}
