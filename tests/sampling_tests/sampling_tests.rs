//! Tests for span sampling
//!
//! These tests verify:
//! - Every span is kept with probability `alpha`, whatever its document size
//! - Seeded draws repeat exactly
//! - Edge amounts (zero, full layer)
//! - Sampling option builders

use layerstore::sampling::{thin_spans, SampleAmount, SampleConstruction, SampleOptions, SamplingMethod};
use rand::rngs::StdRng;
use rand::SeedableRng;

// =============================================================================
// Helper Functions
// =============================================================================

/// Fraction of spans kept over `documents` documents of `span_count` spans
fn kept_fraction(documents: usize, span_count: usize, alpha: f64, seed: u64) -> f64 {
    let mut rng = StdRng::seed_from_u64(seed);
    let kept: usize = (0..documents)
        .map(|_| thin_spans(span_count, alpha, &mut rng).map_or(0, |keep| keep.len()))
        .sum();
    kept as f64 / (documents * span_count) as f64
}

// =============================================================================
// Probability Tests
// =============================================================================

#[test]
fn test_single_span_documents_converge_to_alpha() {
    let fraction = kept_fraction(100_000, 1, 0.3, 42);

    assert!((fraction - 0.3).abs() < 0.01, "kept fraction {}", fraction);
}

#[test]
fn test_span_probability_independent_of_document_size() {
    for span_count in [2, 5, 40] {
        let fraction = kept_fraction(50_000, span_count, 0.3, span_count as u64);
        assert!(
            (fraction - 0.3).abs() < 0.01,
            "{} spans per document: kept fraction {}",
            span_count,
            fraction
        );
    }
}

#[test]
fn test_large_documents_are_almost_always_drawn() {
    let mut rng = StdRng::seed_from_u64(3);
    let drawn = (0..1_000).filter(|_| thin_spans(200, 0.3, &mut rng).is_some()).count();

    assert_eq!(drawn, 1_000);
}

#[test]
fn test_near_one_alpha_keeps_everything() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..100 {
        assert_eq!(thin_spans(10, 0.999_999_999, &mut rng), Some((0..10).collect()));
    }
}

#[test]
fn test_zero_alpha_keeps_nothing() {
    let mut rng = StdRng::seed_from_u64(5);

    assert_eq!(thin_spans(10, 0.0, &mut rng), None);
}

// =============================================================================
// Reproducibility Tests
// =============================================================================

#[test]
fn test_same_seed_same_draw() {
    let draw = |seed| {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..200).map(|i| thin_spans(i % 7 + 1, 0.4, &mut rng)).collect::<Vec<_>>()
    };

    assert_eq!(draw(17), draw(17));
    assert_ne!(draw(17), draw(18));
}

// =============================================================================
// Options Tests
// =============================================================================

#[test]
fn test_sample_option_builders() {
    let defaults = SampleOptions::default();
    assert_eq!(defaults.seed, None);
    assert_eq!(defaults.method, SamplingMethod::Bernoulli);
    assert_eq!(defaults.construction, SampleConstruction::Join);

    let options = SampleOptions::default()
        .seed(0.5)
        .method(SamplingMethod::System)
        .construction(SampleConstruction::Any);
    assert_eq!(options.seed, Some(0.5));
    assert_eq!(options.method, SamplingMethod::System);
    assert_eq!(options.construction, SampleConstruction::Any);
}

#[test]
fn test_sample_amounts_compare() {
    assert_eq!(SampleAmount::Size(10), SampleAmount::Size(10));
    assert_ne!(SampleAmount::Percentage(10.0), SampleAmount::Size(10));
}
