//! Tests for the document model
//!
//! These tests verify:
//! - Annotation validation against the attribute schema
//! - Span ordering and ambiguity rules
//! - Document layer dependencies (parent, enveloping)
//! - Span retention used by span sampling

use layerstore::model::{BaseSpan, Document, Layer};
use layerstore::LayerStoreError;
use serde_json::{json, Map, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn pairs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn words_layer(text: &str) -> Layer {
    let mut layer = Layer::new("words", ["normalized_form"]);
    let mut start = 0;
    for word in text.split(' ') {
        let end = start + word.len();
        layer
            .add_annotation(BaseSpan::plain(start, end), &pairs(json!({"normalized_form": null})))
            .unwrap();
        start = end + 1;
    }
    layer
}

// =============================================================================
// Annotation Tests
// =============================================================================

#[test]
fn test_missing_attributes_become_null() {
    let mut layer = Layer::new("morph", ["lemma", "pos"]);
    layer
        .add_annotation(BaseSpan::plain(0, 4), &pairs(json!({"lemma": "tere"})))
        .unwrap();

    assert_eq!(layer.annotation_value(0, 0, "lemma"), Some(&json!("tere")));
    assert_eq!(layer.annotation_value(0, 0, "pos"), Some(&Value::Null));
}

#[test]
fn test_unknown_attribute_is_rejected() {
    let mut layer = Layer::new("morph", ["lemma"]);
    let result = layer.add_annotation(BaseSpan::plain(0, 4), &pairs(json!({"form": "x"})));

    assert!(matches!(result, Err(LayerStoreError::InvalidArgument(_))));
    assert!(layer.is_empty());
}

#[test]
fn test_spans_are_kept_in_position_order() {
    let mut layer = Layer::new("tokens", Vec::<String>::new());
    for (start, end) in [(10, 12), (0, 3), (4, 9)] {
        layer.add_annotation(BaseSpan::plain(start, end), &Map::new()).unwrap();
    }

    let starts: Vec<usize> = layer.spans().iter().map(|s| s.base_span.start()).collect();
    assert_eq!(starts, vec![0, 4, 10]);
}

#[test]
fn test_ambiguous_layer_collects_annotations() {
    let mut layer = Layer::new("morph", ["lemma"]).with_ambiguous(true);
    layer
        .add_annotation(BaseSpan::plain(0, 4), &pairs(json!({"lemma": "a"})))
        .unwrap();
    layer
        .add_annotation(BaseSpan::plain(0, 4), &pairs(json!({"lemma": "b"})))
        .unwrap();

    assert_eq!(layer.len(), 1);
    assert_eq!(layer.spans()[0].annotations.len(), 2);
    assert_eq!(layer.annotation_value(0, 1, "lemma"), Some(&json!("b")));
}

#[test]
fn test_unambiguous_layer_rejects_second_annotation() {
    let mut layer = Layer::new("morph", ["lemma"]);
    layer
        .add_annotation(BaseSpan::plain(0, 4), &pairs(json!({"lemma": "a"})))
        .unwrap();
    let result = layer.add_annotation(BaseSpan::plain(0, 4), &pairs(json!({"lemma": "b"})));

    assert!(matches!(result, Err(LayerStoreError::InvalidArgument(_))));
}

#[test]
fn test_enveloping_base_span_bounds() {
    let span = BaseSpan::enveloping(vec![BaseSpan::plain(0, 4), BaseSpan::plain(5, 9)]);

    assert_eq!(span.start(), 0);
    assert_eq!(span.end(), 9);
    assert_eq!(span.level(), 1);
}

// =============================================================================
// Span Retention Tests
// =============================================================================

#[test]
fn test_retain_spans_keeps_order() {
    let mut layer = words_layer("one two three four");
    layer.retain_spans(&[1, 3]);

    let starts: Vec<usize> = layer.spans().iter().map(|s| s.base_span.start()).collect();
    assert_eq!(starts, vec![4, 14]);
}

#[test]
fn test_empty_copy_keeps_schema() {
    let layer = words_layer("one two").with_serialisation_module("default");
    let empty = layer.empty_copy();

    assert!(empty.is_empty());
    assert_eq!(empty.attributes, layer.attributes);
    assert_eq!(empty.serialisation_module.as_deref(), Some("default"));
}

// =============================================================================
// Document Tests
// =============================================================================

#[test]
fn test_layer_requires_its_parent() {
    let mut document = Document::new("one two");
    let morph = Layer::new("morph", ["lemma"]).with_parent("words");

    let result = document.add_layer(morph.clone());
    assert!(matches!(
        result,
        Err(LayerStoreError::MissingDependency { ref dependency, .. }) if dependency == "words"
    ));

    document.add_layer(words_layer("one two")).unwrap();
    document.add_layer(morph).unwrap();
    assert_eq!(document.layer_names(), vec!["words", "morph"]);
}

#[test]
fn test_duplicate_layer_is_rejected() {
    let mut document = Document::new("one two");
    document.add_layer(words_layer("one two")).unwrap();

    assert!(matches!(
        document.add_layer(words_layer("one two")),
        Err(LayerStoreError::AlreadyExists(_))
    ));
}

#[test]
fn test_remove_layer_with_dependents_fails() {
    let mut document = Document::new("one two");
    document.add_layer(words_layer("one two")).unwrap();
    document
        .add_layer(Layer::new("sentences", Vec::<String>::new()).with_enveloping("words"))
        .unwrap();

    assert!(matches!(
        document.remove_layer("words"),
        Err(LayerStoreError::HasDependents { .. })
    ));
    document.remove_layer("sentences").unwrap();
    document.remove_layer("words").unwrap();
    assert!(document.layers().is_empty());
}
