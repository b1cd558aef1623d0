//! batch-runner: headless batch runner for the persona pipeline.
//!
//! Usage:
//!   batch-runner --db spendsense.db --as-of 2025-03-31
//!   batch-runner --db spendsense.db --ingest demos/subjects.json --as-of 2025-03-31
//!   batch-runner --db spendsense.db --as-of 2025-03-31 --trace subj-001

use anyhow::{Context, Result};
use chrono::Utc;
use spendsense_core::{
    engine::{BatchSummary, PipelineEngine},
    input::SubjectInputs,
    store::PipelineStore,
    types::new_run_id,
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let data_dir = string_arg(&args, "--data-dir").unwrap_or("./data");
    let as_of = parse_arg(&args, "--as-of", Utc::now().date_naive());
    let run_id = string_arg(&args, "--run-id").map_or_else(new_run_id, str::to_string);
    let ingest = string_arg(&args, "--ingest");
    let trace_subject = string_arg(&args, "--trace");

    println!("spendsense batch-runner");
    println!("  run_id:    {run_id}");
    println!("  as_of:     {as_of}");
    println!("  db:        {db}");
    println!("  data_dir:  {data_dir}");
    println!();

    let store = PipelineStore::open(db)?;
    store.migrate()?;

    if let Some(path) = ingest {
        let raw = std::fs::read_to_string(path).with_context(|| format!("Cannot read {path}"))?;
        let subjects: Vec<SubjectInputs> =
            serde_json::from_str(&raw).with_context(|| format!("Cannot parse {path}"))?;
        let report = store.ingest_bundle(&subjects)?;
        log::info!(
            "ingested {} subjects from {path}, {} rejected",
            report.ingested,
            report.failed.len()
        );
        println!("ingested {} subjects from {path}", report.ingested);
        for failure in &report.failed {
            println!("  rejected {}: {}", failure.subject_id, failure.reason);
        }
        println!();
    }

    let mut engine = PipelineEngine::build(run_id, store, data_dir)?;
    let summary = engine.run_batch(as_of)?;
    print_summary(&summary);

    if let Some(subject_id) = trace_subject {
        println!();
        match engine.store().trace_for_subject(subject_id)? {
            Some(trace) => println!("{}", serde_json::to_string_pretty(&trace)?),
            None => println!("no trace recorded for {subject_id}"),
        }
    }

    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    println!("=== BATCH SUMMARY ===");
    println!("  run_id:          {}", summary.run_id);
    println!("  as_of:           {}", summary.reference_date);
    println!("  processed:       {}", summary.processed);
    println!("  completed:       {}", summary.completed);
    println!("  consent blocked: {}", summary.consent_blocked);
    println!("  failed:          {}", summary.failed);
    println!("  recommendations: {}", summary.recommendations);

    println!();
    println!("=== PERSONAS ===");
    if summary.persona_counts.is_empty() {
        println!("  (no personas assigned)");
    }
    for (persona, count) in &summary.persona_counts {
        println!("  {:<20} {count}", persona.as_str());
    }
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
