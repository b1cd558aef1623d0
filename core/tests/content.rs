//! Content selector: grounded rationales, disclaimers and count bounds.

mod common;

use common::*;
use spendsense_core::{
    config::{ContentKind, PipelineConfig},
    content_selector::{ContentSelector, Selection},
    input::SubjectInputs,
    persona_classifier::{Persona, PersonaClassifier},
    signal_extractor::SignalExtractor,
};

fn select_with(config: &PipelineConfig, inputs: &SubjectInputs) -> (Persona, Selection) {
    let signals = SignalExtractor::new(&config.signals, &config.windows).extract(inputs, as_of());
    let persona = PersonaClassifier::new(&config.personas).classify(&signals).persona;
    let selection = ContentSelector::new(&config.catalog, &config.selection).select(persona, &signals);
    (persona, selection)
}

fn select(inputs: &SubjectInputs) -> (Persona, Selection) {
    select_with(&PipelineConfig::bundled().unwrap(), inputs)
}

fn count(selection: &Selection, kind: ContentKind) -> usize {
    selection.candidates.iter().filter(|c| c.kind == kind).count()
}

#[test]
fn rationale_embeds_the_utilization_figure() {
    let (persona, selection) = select(&high_utilization_subject("a"));
    assert_eq!(persona, Persona::HighUtilization);

    let basics = selection
        .candidates
        .iter()
        .find(|c| c.content_id == "edu-hu-utilization-basics")
        .expect("utilization basics selected");
    assert_eq!(
        basics.rationale,
        "Your card ending in 4242 is at 68% of its limit ($3,400.00 of $5,000.00)."
    );
    assert!(basics.embedded_values.iter().any(|v| v.signal == "utilization_pct" && v.value == "68%"));
}

#[test]
fn window_lengths_in_rationales_follow_configuration() {
    let mut config = PipelineConfig::bundled().unwrap();
    config.windows.short_days = 45;
    config.validate().unwrap();

    let (_, selection) = select_with(&config, &high_utilization_subject("a"));
    let interest = selection
        .candidates
        .iter()
        .find(|c| c.content_id == "edu-hu-interest-cost")
        .unwrap();
    assert_eq!(
        interest.rationale,
        "You were charged $58.20 in card interest in the last 45 days."
    );
    let signals: Vec<&str> = interest.embedded_values.iter().map(|v| v.signal.as_str()).collect();
    assert_eq!(signals, vec!["interest_total"]);
}

#[test]
fn every_candidate_is_grounded_and_disclaimed() {
    let config = PipelineConfig::bundled().unwrap();
    let fixtures = [
        high_utilization_subject("a"),
        variable_income_subject("b"),
        subscription_subject("c"),
        savings_builder_subject("d"),
        base_subject("e"),
    ];
    for inputs in &fixtures {
        let (_, selection) = select_with(&config, inputs);
        assert!(!selection.candidates.is_empty());
        for c in &selection.candidates {
            assert!(!c.embedded_values.is_empty(), "{} has no embedded value", c.content_id);
            for v in &c.embedded_values {
                assert!(c.rationale.contains(&v.value), "{} missing {}", c.content_id, v.value);
            }
            assert!(!c.rationale.contains('{'), "{} left a placeholder", c.content_id);
            assert!(c.ends_with_disclaimer());
            assert_eq!(c.disclaimer, config.selection.disclaimer);
        }
    }
}

#[test]
fn counts_stay_within_bounds() {
    let config = PipelineConfig::bundled().unwrap();
    let s = &config.selection;
    for inputs in [high_utilization_subject("a"), subscription_subject("c"), savings_builder_subject("d")] {
        let (_, selection) = select_with(&config, &inputs);
        let edu = count(&selection, ContentKind::Education);
        let offers = count(&selection, ContentKind::PartnerOffer);
        assert!((s.education_min..=s.education_max).contains(&edu), "education count {edu}");
        assert!((s.offer_min..=s.offer_max).contains(&offers), "offer count {offers}");
        assert!(selection.under_fill.is_empty());
    }
}

#[test]
fn selection_follows_catalog_priority() {
    let (_, selection) = select(&high_utilization_subject("a"));
    let offers: Vec<&str> = selection
        .candidates
        .iter()
        .filter(|c| c.kind == ContentKind::PartnerOffer)
        .map(|c| c.content_id.as_str())
        .collect();
    assert_eq!(
        offers,
        vec!["offer-hu-balance-transfer", "offer-hu-quick-cash", "offer-hu-budget-app"]
    );
}

#[test]
fn entries_without_a_value_are_skipped_not_faked() {
    let (persona, selection) = select(&base_subject("e"));
    assert_eq!(persona, Persona::General);

    let skipped: Vec<&str> = selection.skipped.iter().map(|s| s.content_id.as_str()).collect();
    assert!(skipped.contains(&"edu-gen-credit-basics"));
    assert!(skipped.contains(&"edu-gen-savings-habits"));
    let credit = selection
        .skipped
        .iter()
        .find(|s| s.content_id == "edu-gen-credit-basics")
        .unwrap();
    assert!(credit.missing.contains(&"card_mask".to_string()));

    assert_eq!(count(&selection, ContentKind::Education), 3);
}

#[test]
fn thin_catalog_is_a_warning_not_a_failure() {
    let mut config = PipelineConfig::bundled().unwrap();
    config.catalog.retain(|e| {
        e.content_id == "edu-hu-utilization-basics"
            || !e.personas.contains(&Persona::HighUtilization)
            || e.kind == ContentKind::PartnerOffer
    });
    config.validate().unwrap();

    let (_, selection) = select_with(&config, &high_utilization_subject("a"));
    assert_eq!(count(&selection, ContentKind::Education), 1);
    assert_eq!(selection.under_fill.len(), 1);
    let warning = &selection.under_fill[0];
    assert_eq!(warning.kind, ContentKind::Education);
    assert_eq!(warning.persona, Persona::HighUtilization);
    assert_eq!((warning.selected, warning.required), (1, 3));
}

#[test]
fn selection_is_deterministic() {
    let a = select(&subscription_subject("c"));
    let b = select(&subscription_subject("c"));
    assert_eq!(a, b);
}
