//! End-to-end batches through the engine and store.

mod common;

use chrono::{TimeZone, Utc};
use common::*;
use spendsense_core::{
    config::PipelineConfig,
    engine::{process_subject, PipelineEngine},
    error::PipelineError,
    event::PipelineEvent,
    guardrail_chain::{GuardrailOutcome, ReasonCode},
    persona_classifier::Persona,
    store::PipelineStore,
    trace_recorder::{DecisionTrace, TraceStatus},
};

fn engine_with(subjects: &[spendsense_core::input::SubjectInputs]) -> PipelineEngine {
    init_logging();
    let engine = PipelineEngine::build_test("run-test").unwrap();
    let report = engine.store().ingest_bundle(subjects).unwrap();
    assert!(report.failed.is_empty(), "{:?}", report.failed);
    engine
}

#[test]
fn high_utilization_scenario() {
    let mut engine = engine_with(&[high_utilization_subject("subj-68")]);
    let summary = engine.run_batch(as_of()).unwrap();
    assert_eq!(summary.completed, 1);

    let trace = engine.store().trace_for_subject("subj-68").unwrap().unwrap();
    assert_eq!(trace.status, TraceStatus::Completed);
    assert_eq!(trace.persona_label(), Some(Persona::HighUtilization));

    assert!(!trace.recommendations.is_empty());
    assert!(trace.recommendations.iter().any(|r| r.rationale.contains("68%")));
    assert!(trace.recommendations.iter().all(|r| r.ends_with_disclaimer()));

    // The subject already holds a credit card.
    let transfer = trace.decision_for("offer-hu-balance-transfer").unwrap();
    assert_eq!(transfer.outcome, GuardrailOutcome::Blocked);
    assert_eq!(transfer.reason, Some(ReasonCode::Ineligible));
    assert!(!trace.recommended_ids().iter().any(|id| id.as_str() == "offer-hu-balance-transfer"));

    // The trace carries what each stage saw.
    let signals = trace.signals.as_ref().unwrap();
    assert!((signals.short.credit.max_utilization.unwrap() - 0.68).abs() < 1e-9);
    assert!(trace.candidates.len() >= trace.recommendations.len());
}

#[test]
fn revoked_consent_overwrites_the_earlier_trace() {
    let mut engine = engine_with(&[high_utilization_subject("subj-rev")]);
    engine.run_batch(as_of()).unwrap();
    let before = engine.store().trace_for_subject("subj-rev").unwrap().unwrap();
    assert!(!before.recommendations.is_empty());

    engine
        .store()
        .record_consent("subj-rev", &consent(false, 2025, 3, 20))
        .unwrap();
    let summary = engine.run_batch(as_of()).unwrap();
    assert_eq!(summary.consent_blocked, 1);

    assert_eq!(engine.store().trace_count().unwrap(), 1);
    let after = engine.store().trace_for_subject("subj-rev").unwrap().unwrap();
    assert_eq!(after.status, TraceStatus::ConsentBlocked);
    assert!(after.recommendations.is_empty());
    assert_eq!(after.decisions_with_reason(ReasonCode::ConsentMissing).len(), 1);
    assert_eq!(after.guardrail_decisions.len(), 1);
    assert!(after
        .guardrail_decisions
        .iter()
        .all(|d| d.outcome != GuardrailOutcome::Pass));
}

#[test]
fn one_bad_subject_does_not_stop_the_batch() {
    let mut broken = base_subject("subj-bad");
    broken.transactions.push(txn("ghost-1", "ghost", date(2025, 3, 10), -20.0, None, "misc"));

    let mut engine = engine_with(&[
        high_utilization_subject("subj-a"),
        broken,
        subscription_subject("subj-c"),
    ]);
    let summary = engine.run_batch(as_of()).unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(
        engine.store().subjects_with_status(TraceStatus::Failed).unwrap(),
        vec!["subj-bad".to_string()]
    );

    let bad = engine.store().trace_for_subject("subj-bad").unwrap().unwrap();
    assert!(bad.failure.as_deref().unwrap().contains("unknown account ghost"));
    assert!(bad.persona.is_none());
    assert!(bad.recommendations.is_empty());

    let c = engine.store().trace_for_subject("subj-c").unwrap().unwrap();
    assert_eq!(c.persona_label(), Some(Persona::SubscriptionHeavy));
}

#[test]
fn unreadable_stored_value_fails_only_that_subject() {
    init_logging();
    let db = TempDb::new("bad-column");
    let store = PipelineStore::open(&db.path).unwrap();
    store.migrate().unwrap();
    store
        .ingest_bundle(&[
            high_utilization_subject("subj-a"),
            base_subject("subj-b"),
            subscription_subject("subj-c"),
        ])
        .unwrap();

    let raw = rusqlite::Connection::open(&db.path).unwrap();
    raw.execute(
        "UPDATE account SET current_balance = 'n/a' WHERE subject_id = 'subj-b'",
        [],
    )
    .unwrap();
    drop(raw);

    let mut engine =
        PipelineEngine::new("run-file".into(), PipelineConfig::bundled().unwrap(), store).unwrap();
    let summary = engine.run_batch(as_of()).unwrap();
    assert_eq!((summary.processed, summary.completed, summary.failed), (3, 2, 1));

    let b = engine.store().trace_for_subject("subj-b").unwrap().unwrap();
    assert_eq!(b.status, TraceStatus::Failed);
    assert!(b.failure.as_deref().unwrap().contains("current_balance"));

    let c = engine.store().trace_for_subject("subj-c").unwrap().unwrap();
    assert_eq!(c.persona_label(), Some(Persona::SubscriptionHeavy));

    let events = engine.store().events_for_run("run-file").unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types.iter().filter(|t| **t == "subject_failed").count(), 1);
    assert_eq!(types.last(), Some(&"batch_completed"));
}

#[test]
fn rejected_subject_does_not_stop_the_rest_of_the_bundle() {
    let engine = PipelineEngine::build_test("run-ingest").unwrap();
    let mut duplicated = base_subject("subj-b");
    let repeat = duplicated.transactions[0].clone();
    duplicated.transactions.push(repeat);

    let report = engine
        .store()
        .ingest_bundle(&[
            high_utilization_subject("subj-a"),
            duplicated,
            subscription_subject("subj-c"),
        ])
        .unwrap();
    assert_eq!(report.ingested, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].subject_id, "subj-b");
    assert!(report.failed[0].reason.contains("UNIQUE"));

    // Nothing of the rejected subject is left behind.
    assert_eq!(
        engine.store().subject_ids().unwrap(),
        vec!["subj-a".to_string(), "subj-c".to_string()]
    );
}

#[test]
fn batch_events_bracket_every_subject() {
    let mut engine = engine_with(&[base_subject("subj-1"), subscription_subject("subj-2")]);
    engine.run_batch(as_of()).unwrap();

    let events = engine.store().events_for_run("run-test").unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec!["batch_started", "subject_processed", "subject_processed", "batch_completed"]
    );

    let last: PipelineEvent = serde_json::from_str(&events[3].payload).unwrap();
    assert_eq!(
        last,
        PipelineEvent::BatchCompleted { run_id: "run-test".into(), processed: 2, failed: 0 }
    );
}

#[test]
fn invalid_configuration_aborts_before_any_subject() {
    let store = PipelineStore::in_memory().unwrap();
    store.migrate().unwrap();
    store.ingest_subject(&high_utilization_subject("subj-a")).unwrap();

    let mut config = PipelineConfig::bundled().unwrap();
    config.personas.priority.pop();
    let err = PipelineEngine::new("run-bad".into(), config, store).err().unwrap();
    assert!(matches!(err, PipelineError::InvalidConfig { .. }));

    let mut config = PipelineConfig::bundled().unwrap();
    config.catalog.retain(|e| !e.personas.contains(&Persona::General));
    let store = PipelineStore::in_memory().unwrap();
    assert!(matches!(
        PipelineEngine::new("run-bad".into(), config, store),
        Err(PipelineError::InvalidConfig { .. })
    ));
}

#[test]
fn duplicate_priority_entries_are_rejected() {
    let mut config = PipelineConfig::bundled().unwrap();
    config.personas.priority = vec![
        Persona::HighUtilization,
        Persona::HighUtilization,
        Persona::SubscriptionHeavy,
        Persona::SavingsBuilder,
    ];
    assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig { .. })));
}

#[test]
fn reruns_differ_only_in_timestamp() {
    let config = PipelineConfig::bundled().unwrap();
    let inputs = high_utilization_subject("subj-det");
    let t1 = Utc.with_ymd_and_hms(2025, 4, 1, 6, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2025, 4, 2, 6, 0, 0).unwrap();

    let a = process_subject(&config, "run-1", &inputs, as_of(), t1);
    let mut b = process_subject(&config, "run-1", &inputs, as_of(), t2);
    assert_ne!(a.generated_at, b.generated_at);
    b.generated_at = a.generated_at;
    assert_eq!(a, b);
}

#[test]
fn trace_json_survives_the_store() {
    let config = PipelineConfig::bundled().unwrap();
    let trace = process_subject(&config, "run-1", &subscription_subject("subj-json"), as_of(), Utc::now());

    let store = PipelineStore::in_memory().unwrap();
    store.migrate().unwrap();
    store.write_trace(&trace).unwrap();
    let back: DecisionTrace = store.trace_for_subject("subj-json").unwrap().unwrap();
    assert_eq!(back, trace);
    assert_eq!(
        store.subjects_with_status(TraceStatus::Completed).unwrap(),
        vec!["subj-json".to_string()]
    );
}

#[test]
fn differently_configured_batches_run_side_by_side() {
    let mut inputs = high_utilization_subject("subj-both");
    add_subscriptions(&mut inputs);

    let default_config = PipelineConfig::bundled().unwrap();
    let mut reordered = PipelineConfig::bundled().unwrap();
    reordered.personas.priority.reverse();
    reordered.validate().unwrap();

    let (a, b) = std::thread::scope(|scope| {
        let ha = scope.spawn(|| process_subject(&default_config, "run-a", &inputs, as_of(), Utc::now()));
        let hb = scope.spawn(|| process_subject(&reordered, "run-b", &inputs, as_of(), Utc::now()));
        (ha.join().unwrap(), hb.join().unwrap())
    });

    assert_eq!(a.persona_label(), Some(Persona::HighUtilization));
    assert_eq!(b.persona_label(), Some(Persona::SubscriptionHeavy));
}

#[test]
fn unknown_subject_is_reported_not_fabricated() {
    let engine = PipelineEngine::build_test("run-x").unwrap();
    let trace = engine.run_subject("nobody", as_of(), Utc::now()).unwrap();
    assert_eq!(trace.status, TraceStatus::Failed);
    assert!(trace.failure.unwrap().contains("not found"));
}
