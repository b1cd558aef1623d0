//! spendsense-core: consent-gated persona classification and
//! recommendation pipeline with a per-subject decision trace.

pub mod config;
pub mod content_selector;
pub mod engine;
pub mod error;
pub mod event;
pub mod guardrail_chain;
pub mod input;
pub mod persona_classifier;
pub mod signal_extractor;
pub mod store;
pub mod trace_recorder;
pub mod types;
pub mod window;
