use super::PipelineStore;
use crate::{
    error::PipelineResult,
    trace_recorder::{DecisionTrace, TraceStatus},
};
use chrono::SecondsFormat;
use rusqlite::{params, OptionalExtension};

impl PipelineStore {
    // ── Decision traces ───────────────────────────────────────────

    /// Write a subject's trace, replacing any earlier one in a single
    /// statement. Readers see either the old trace or the new one.
    pub fn write_trace(&self, trace: &DecisionTrace) -> PipelineResult<()> {
        let json = trace.to_json()?;
        self.conn.execute(
            "INSERT INTO decision_trace (
                subject_id, run_id, status, persona, recommendation_count,
                generated_at, trace_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(subject_id) DO UPDATE SET
                run_id               = excluded.run_id,
                status               = excluded.status,
                persona              = excluded.persona,
                recommendation_count = excluded.recommendation_count,
                generated_at         = excluded.generated_at,
                trace_json           = excluded.trace_json",
            params![
                &trace.subject_id,
                &trace.run_id,
                trace.status.as_str(),
                trace.persona_label().map(|p| p.as_str()),
                trace.recommendations.len() as i64,
                trace.generated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                json,
            ],
        )?;
        Ok(())
    }

    pub fn trace_for_subject(&self, subject_id: &str) -> PipelineResult<Option<DecisionTrace>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT trace_json FROM decision_trace WHERE subject_id = ?1",
                params![subject_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| DecisionTrace::from_json(&j)).transpose()
    }

    pub fn trace_count(&self) -> PipelineResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM decision_trace", [], |row| row.get(0))?;
        Ok(n)
    }

    pub fn subjects_with_status(&self, status: TraceStatus) -> PipelineResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT subject_id FROM decision_trace WHERE status = ?1 ORDER BY subject_id ASC",
        )?;
        let ids = stmt
            .query_map(params![status.as_str()], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}
