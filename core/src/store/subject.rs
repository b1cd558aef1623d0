use super::PipelineStore;
use crate::{
    error::{PipelineError, PipelineResult},
    input::{AccountKind, AccountRecord, ConsentRecord, LiabilityRecord, SubjectInputs, TransactionRecord},
    types::SubjectId,
};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension};

/// Outcome of ingesting a bundle of subjects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub ingested: usize,
    pub failed:   Vec<IngestFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestFailure {
    pub subject_id: SubjectId,
    pub reason:     String,
}

impl PipelineStore {
    // ── Subject inputs ────────────────────────────────────────────

    pub fn insert_subject(&self, subject_id: &str) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO subject (subject_id) VALUES (?1)",
            params![subject_id],
        )?;
        Ok(())
    }

    pub fn insert_account(&self, subject_id: &str, a: &AccountRecord) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO account (
                account_id, subject_id, kind, mask, current_balance,
                available_balance, credit_limit, currency
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &a.account_id,
                subject_id,
                a.kind.as_str(),
                &a.mask,
                a.current_balance,
                a.available_balance,
                a.credit_limit,
                &a.currency,
            ],
        )?;
        Ok(())
    }

    pub fn insert_transaction(&self, subject_id: &str, t: &TransactionRecord) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO txn (
                transaction_id, subject_id, account_id, date, amount,
                merchant_name, category, pending
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &t.transaction_id,
                subject_id,
                &t.account_id,
                t.date.to_string(),
                t.amount,
                &t.merchant_name,
                &t.category,
                if t.pending { 1 } else { 0 }
            ],
        )?;
        Ok(())
    }

    pub fn insert_liability(&self, subject_id: &str, l: &LiabilityRecord) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO liability (
                account_id, subject_id, apr_percentage, minimum_payment_amount,
                last_payment_amount, last_statement_balance, is_overdue
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &l.account_id,
                subject_id,
                l.apr_percentage,
                l.minimum_payment_amount,
                l.last_payment_amount,
                l.last_statement_balance,
                l.is_overdue,
            ],
        )?;
        Ok(())
    }

    /// Append a consent event. The latest event is the one that counts.
    pub fn record_consent(&self, subject_id: &str, c: &ConsentRecord) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO consent_event (subject_id, granted, recorded_at) VALUES (?1, ?2, ?3)",
            params![
                subject_id,
                if c.granted { 1 } else { 0 },
                c.recorded_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        Ok(())
    }

    /// Replace a subject's accounts, transactions and liabilities, and
    /// append its consent record. All-or-nothing.
    pub fn ingest_subject(&self, inputs: &SubjectInputs) -> PipelineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let id = inputs.subject_id.as_str();

        self.insert_subject(id)?;
        for table in ["txn", "liability", "account"] {
            self.conn
                .execute(&format!("DELETE FROM {table} WHERE subject_id = ?1"), params![id])?;
        }
        for a in &inputs.accounts {
            self.insert_account(id, a)?;
        }
        for t in &inputs.transactions {
            self.insert_transaction(id, t)?;
        }
        for l in &inputs.liabilities {
            self.insert_liability(id, l)?;
        }
        if let Some(c) = &inputs.consent {
            self.record_consent(id, c)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Ingest each subject on its own. A subject whose records the store
    /// rejects (duplicate ids and the like) is rolled back, logged and
    /// reported; the rest of the bundle still lands. Other database errors
    /// abort.
    pub fn ingest_bundle(&self, subjects: &[SubjectInputs]) -> PipelineResult<IngestReport> {
        let mut report = IngestReport::default();
        for inputs in subjects {
            match self.ingest_subject(inputs) {
                Ok(()) => report.ingested += 1,
                Err(e) if is_constraint_violation(&e) => {
                    log::warn!("subject={} skipped at ingest: {e}", inputs.subject_id);
                    report.failed.push(IngestFailure {
                        subject_id: inputs.subject_id.clone(),
                        reason:     e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// All known subjects, in stable order.
    pub fn subject_ids(&self) -> PipelineResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT subject_id FROM subject ORDER BY subject_id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Read everything the pipeline needs for one subject.
    /// Rows the store cannot interpret surface as `MalformedInput`.
    pub fn load_subject_inputs(&self, subject_id: &str) -> PipelineResult<SubjectInputs> {
        let exists: Option<String> = self
            .conn
            .query_row(
                "SELECT subject_id FROM subject WHERE subject_id = ?1",
                params![subject_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(PipelineError::SubjectNotFound { subject_id: subject_id.to_string() });
        }

        let mut inputs = SubjectInputs::new(subject_id);
        inputs.accounts = self.load_accounts(subject_id)?;
        inputs.transactions = self.load_transactions(subject_id)?;
        inputs.liabilities = self.load_liabilities(subject_id)?;
        inputs.consent = self.latest_consent(subject_id)?;
        Ok(inputs)
    }

    fn load_accounts(&self, subject_id: &str) -> PipelineResult<Vec<AccountRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT account_id, kind, mask, current_balance, available_balance,
                    credit_limit, currency
             FROM account WHERE subject_id = ?1
             ORDER BY account_id ASC",
        )?;
        let rows = stmt
            .query_map(params![subject_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| row_error(subject_id, "account", e))?;

        rows.into_iter()
            .map(|(account_id, kind, mask, current_balance, available_balance, credit_limit, currency)| {
                let kind = AccountKind::parse(&kind).ok_or_else(|| {
                    PipelineError::malformed(
                        subject_id,
                        format!("account {account_id} has unknown kind '{kind}'"),
                    )
                })?;
                Ok(AccountRecord {
                    account_id,
                    kind,
                    mask,
                    current_balance,
                    available_balance,
                    credit_limit,
                    currency,
                })
            })
            .collect()
    }

    fn load_transactions(&self, subject_id: &str) -> PipelineResult<Vec<TransactionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT transaction_id, account_id, date, amount, merchant_name,
                    category, pending
             FROM txn WHERE subject_id = ?1
             ORDER BY date ASC, transaction_id ASC",
        )?;
        let rows = stmt
            .query_map(params![subject_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)? != 0,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| row_error(subject_id, "txn", e))?;

        rows.into_iter()
            .map(|(transaction_id, account_id, date, amount, merchant_name, category, pending)| {
                let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|e| {
                    PipelineError::malformed(
                        subject_id,
                        format!("transaction {transaction_id} has unparseable date '{date}': {e}"),
                    )
                })?;
                Ok(TransactionRecord {
                    transaction_id,
                    account_id,
                    date,
                    amount,
                    merchant_name,
                    category,
                    pending,
                })
            })
            .collect()
    }

    fn load_liabilities(&self, subject_id: &str) -> PipelineResult<Vec<LiabilityRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT account_id, apr_percentage, minimum_payment_amount,
                    last_payment_amount, last_statement_balance, is_overdue
             FROM liability WHERE subject_id = ?1
             ORDER BY account_id ASC",
        )?;
        let rows = stmt
            .query_map(params![subject_id], |row| {
                Ok(LiabilityRecord {
                    account_id:             row.get(0)?,
                    apr_percentage:         row.get(1)?,
                    minimum_payment_amount: row.get(2)?,
                    last_payment_amount:    row.get(3)?,
                    last_statement_balance: row.get(4)?,
                    is_overdue:             row.get::<_, Option<i64>>(5)?.map(|v| v != 0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| row_error(subject_id, "liability", e))?;
        Ok(rows)
    }

    pub fn latest_consent(&self, subject_id: &str) -> PipelineResult<Option<ConsentRecord>> {
        let row: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT granted, recorded_at FROM consent_event
                 WHERE subject_id = ?1
                 ORDER BY recorded_at DESC, id DESC LIMIT 1",
                params![subject_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| row_error(subject_id, "consent_event", e))?;

        let Some((granted, recorded_at)) = row else { return Ok(None) };
        let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
            .map_err(|e| {
                PipelineError::malformed(
                    subject_id,
                    format!("consent timestamp '{recorded_at}' is not RFC 3339: {e}"),
                )
            })?
            .with_timezone(&Utc);
        Ok(Some(ConsentRecord { granted: granted != 0, recorded_at }))
    }
}

/// A stored value of the wrong type belongs to one subject's data, not to
/// the database; everything else stays a database error.
fn row_error(subject_id: &str, table: &str, e: rusqlite::Error) -> PipelineError {
    match e {
        rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => {
            PipelineError::malformed(subject_id, format!("unreadable {table} row: {e}"))
        }
        other => PipelineError::Database(other),
    }
}

fn is_constraint_violation(e: &PipelineError) -> bool {
    matches!(
        e,
        PipelineError::Database(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> PipelineStore {
        let s = PipelineStore::in_memory().unwrap();
        s.migrate().unwrap();
        s
    }

    fn sample() -> SubjectInputs {
        let mut inputs = SubjectInputs::new("subj-001");
        inputs.accounts.push(AccountRecord {
            account_id:        "acc-chk".into(),
            kind:              AccountKind::Checking,
            mask:              "1111".into(),
            current_balance:   1_250.0,
            available_balance: Some(1_200.0),
            credit_limit:      None,
            currency:          "USD".into(),
        });
        inputs.transactions.push(TransactionRecord {
            transaction_id: "t-1".into(),
            account_id:     "acc-chk".into(),
            date:           NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            amount:         -12.5,
            merchant_name:  Some("Corner Cafe".into()),
            category:       "food_and_drink".into(),
            pending:        false,
        });
        inputs.consent = Some(ConsentRecord {
            granted:     true,
            recorded_at: Utc.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap(),
        });
        inputs
    }

    #[test]
    fn ingested_subject_loads_back_unchanged() {
        let s = store();
        let inputs = sample();
        s.ingest_subject(&inputs).unwrap();
        assert_eq!(s.load_subject_inputs("subj-001").unwrap(), inputs);
        assert_eq!(s.subject_ids().unwrap(), vec!["subj-001".to_string()]);
    }

    #[test]
    fn reingest_replaces_records_and_latest_consent_wins() {
        let s = store();
        let mut inputs = sample();
        s.ingest_subject(&inputs).unwrap();

        inputs.transactions.clear();
        inputs.consent = Some(ConsentRecord {
            granted:     false,
            recorded_at: Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap(),
        });
        s.ingest_subject(&inputs).unwrap();

        let loaded = s.load_subject_inputs("subj-001").unwrap();
        assert!(loaded.transactions.is_empty());
        assert!(!loaded.consent_granted());
    }

    #[test]
    fn record_ids_are_scoped_per_subject() {
        let s = store();
        let first = sample();
        let mut second = sample();
        second.subject_id = "subj-002".into();
        assert_eq!(s.ingest_bundle(&[first, second.clone()]).unwrap().ingested, 2);
        assert_eq!(s.load_subject_inputs("subj-002").unwrap(), second);
    }

    #[test]
    fn unknown_subject_is_not_found() {
        let s = store();
        assert!(matches!(
            s.load_subject_inputs("nobody"),
            Err(PipelineError::SubjectNotFound { .. })
        ));
    }

    #[test]
    fn unparseable_date_is_malformed_input() {
        let s = store();
        s.ingest_subject(&sample()).unwrap();
        s.conn
            .execute("UPDATE txn SET date = '2025-13-45' WHERE transaction_id = 't-1'", [])
            .unwrap();
        assert!(matches!(
            s.load_subject_inputs("subj-001"),
            Err(PipelineError::MalformedInput { .. })
        ));
    }
}
