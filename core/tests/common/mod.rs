//! Shared subject fixtures. All anchored on `as_of()` = 2025-03-31.
#![allow(dead_code)]

use chrono::{NaiveDate, TimeZone, Utc};
use spendsense_core::input::{
    AccountKind, AccountRecord, ConsentRecord, LiabilityRecord, SubjectInputs, TransactionRecord,
};

/// Route library logs through the test harness; `RUST_LOG=debug` to see them.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An on-disk database path, removed together with its WAL files on drop.
pub struct TempDb {
    pub path: String,
}

impl TempDb {
    pub fn new(tag: &str) -> Self {
        let file = format!("spendsense-{tag}-{}.db", uuid::Uuid::new_v4());
        Self { path: std::env::temp_dir().join(file).to_string_lossy().into_owned() }
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.path));
        }
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn as_of() -> NaiveDate {
    date(2025, 3, 31)
}

pub fn consent(granted: bool, y: i32, m: u32, d: u32) -> ConsentRecord {
    ConsentRecord {
        granted,
        recorded_at: Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap(),
    }
}

pub fn account(id: &str, kind: AccountKind, mask: &str, balance: f64, limit: Option<f64>) -> AccountRecord {
    AccountRecord {
        account_id:        id.into(),
        kind,
        mask:              mask.into(),
        current_balance:   balance,
        available_balance: None,
        credit_limit:      limit,
        currency:          "USD".into(),
    }
}

pub fn txn(
    id: &str,
    account_id: &str,
    on: NaiveDate,
    amount: f64,
    merchant: Option<&str>,
    category: &str,
) -> TransactionRecord {
    TransactionRecord {
        transaction_id: id.into(),
        account_id:     account_id.into(),
        date:           on,
        amount,
        merchant_name:  merchant.map(str::to_string),
        category:       category.into(),
        pending:        false,
    }
}

/// Consent granted, one checking account, $358.85 of uneven grocery
/// spend in March.
pub fn base_subject(id: &str) -> SubjectInputs {
    let mut s = SubjectInputs::new(id);
    s.consent = Some(consent(true, 2025, 1, 2));
    s.accounts.push(account("chk", AccountKind::Checking, "1111", 1_500.0, None));
    let groceries = [(6u32, 85.0), (13, 112.40), (20, 64.15), (27, 97.30)];
    for (i, (day, amount)) in groceries.iter().enumerate() {
        s.transactions.push(txn(
            &format!("groc-{i}"),
            "chk",
            date(2025, 3, *day),
            -amount,
            Some("Fresh Market"),
            "groceries",
        ));
    }
    s
}

/// Card ending 4242 at $3,400 of $5,000 (68%), one interest charge,
/// minimum payments only.
pub fn high_utilization_subject(id: &str) -> SubjectInputs {
    let mut s = base_subject(id);
    s.accounts.push(account("card", AccountKind::CreditCard, "4242", 3_400.0, Some(5_000.0)));
    s.transactions.push(txn(
        "int-1",
        "card",
        date(2025, 3, 15),
        -58.20,
        None,
        "interest_charge",
    ));
    s.liabilities.push(LiabilityRecord {
        account_id:             "card".into(),
        apr_percentage:         Some(24.99),
        minimum_payment_amount: Some(85.0),
        last_payment_amount:    Some(85.0),
        last_statement_balance: Some(3_400.0),
        is_overdue:             Some(false),
    });
    s
}

/// Four monthly subscriptions charged in January, February and March.
pub fn add_subscriptions(s: &mut SubjectInputs) {
    let subs = [
        ("StreamFlix", 15.49),
        ("CloudBox", 11.99),
        ("TuneWave", 10.99),
        ("FitClub", 24.00),
    ];
    for (name, amount) in subs {
        for month in 1..=3u32 {
            s.transactions.push(txn(
                &format!("{}-{month}", name.to_lowercase()),
                "chk",
                date(2025, month, 5),
                -amount,
                Some(name),
                "subscription",
            ));
        }
    }
}

pub fn subscription_subject(id: &str) -> SubjectInputs {
    let mut s = base_subject(id);
    add_subscriptions(&mut s);
    s
}

/// Payroll arriving with gaps of up to 56 days and a thin checking balance.
pub fn variable_income_subject(id: &str) -> SubjectInputs {
    let mut s = SubjectInputs::new(id);
    s.consent = Some(consent(true, 2025, 1, 2));
    s.accounts.push(account("chk", AccountKind::Checking, "2222", 800.0, None));
    let pay = [
        (date(2024, 10, 10), 1_800.0),
        (date(2024, 12, 5), 2_400.0),
        (date(2025, 1, 20), 1_500.0),
        (date(2025, 3, 10), 2_100.0),
    ];
    for (i, (on, amount)) in pay.iter().enumerate() {
        s.transactions.push(txn(&format!("pay-{i}"), "chk", *on, *amount, Some("Gig Platform"), "payroll"));
    }
    let rent_days = [
        date(2024, 10, 15),
        date(2024, 11, 15),
        date(2024, 12, 15),
        date(2025, 1, 15),
        date(2025, 2, 15),
        date(2025, 3, 15),
    ];
    for (i, on) in rent_days.iter().enumerate() {
        s.transactions.push(txn(&format!("rent-{i}"), "chk", *on, -1_200.0, Some("Oak Apartments"), "rent"));
    }
    s
}

/// $500 moved into savings every month for six months; $10,000 saved.
pub fn savings_builder_subject(id: &str) -> SubjectInputs {
    let mut s = base_subject(id);
    s.accounts.push(account("sav", AccountKind::Savings, "3333", 10_000.0, None));
    let days = [
        date(2024, 10, 15),
        date(2024, 11, 15),
        date(2024, 12, 15),
        date(2025, 1, 15),
        date(2025, 2, 15),
        date(2025, 3, 15),
    ];
    for (i, on) in days.iter().enumerate() {
        s.transactions.push(txn(&format!("sav-in-{i}"), "sav", *on, 500.0, None, "transfer_in"));
        s.transactions.push(txn(&format!("sav-out-{i}"), "chk", *on, -500.0, None, "transfer_out"));
    }
    s
}
