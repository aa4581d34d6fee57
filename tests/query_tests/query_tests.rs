//! Tests for query composition
//!
//! These tests verify:
//! - Filter predicates render with bound values only
//! - Combining filters across collections is rejected
//! - Join kinds follow layer sparsity and the sparse policy
//! - Column projection order and aliases

use std::sync::Arc;

use layerstore::collection::{LayerStructure, MetaType, Structure, StructureVersion};
use layerstore::model::{Layer, LayerType};
use layerstore::query::{CompareOp, Filter, JoinClause, JoinKind, QueryContext, SelectedColumns, SparsePolicy, SqlParam};
use layerstore::serialization::SerializationRegistry;
use layerstore::LayerStoreError;
use serde_json::json;

// =============================================================================
// Helper Functions
// =============================================================================

fn structure(collection: &str) -> Structure {
    let words = Layer::new("words", ["normalized_form"]);
    let morph = Layer::new("morph", ["lemma", "pos", "length"]).with_parent("words");
    let ner = Layer::new("ner", ["nertag"]);
    let pages = Layer::new("pages", ["number"]);
    Structure::from_layers(
        collection,
        StructureVersion::CURRENT,
        vec![
            LayerStructure::from_layer(&words, LayerType::Attached, Vec::new()),
            LayerStructure::from_layer(&morph, LayerType::Detached, Vec::new()),
            LayerStructure::from_layer(&ner, LayerType::Sparse, Vec::new()),
            LayerStructure::from_layer(&pages, LayerType::Fragmented, Vec::new()),
        ],
    )
    .unwrap()
}

fn context(collection: &str) -> Arc<QueryContext> {
    Arc::new(QueryContext::new(
        "public",
        structure(collection),
        vec![
            ("source".to_string(), MetaType::Str),
            ("year".to_string(), MetaType::Int),
        ],
        &SerializationRegistry::default(),
    ))
}

// =============================================================================
// Filter Tests
// =============================================================================

#[test]
fn test_meta_comparison() {
    let context = context("news");
    let filter = Filter::meta(&context, "year", CompareOp::Ge, json!(2020)).unwrap();
    let sql = filter.to_sql().unwrap();

    assert_eq!(sql.render(), "\"public\".\"news\".\"year\" >= $1::bigint");
    assert_eq!(sql.params(), &[SqlParam::Int(2020)]);
}

#[test]
fn test_meta_null_comparison() {
    let context = context("news");
    let sql = Filter::meta(&context, "source", CompareOp::Eq, json!(null))
        .unwrap()
        .to_sql()
        .unwrap();
    assert_eq!(sql.render(), "\"public\".\"news\".\"source\" IS NULL");
    assert!(sql.params().is_empty());

    assert!(matches!(
        Filter::meta(&context, "source", CompareOp::Lt, json!(null)),
        Err(LayerStoreError::InvalidArgument(_))
    ));
}

#[test]
fn test_meta_type_mismatch() {
    let context = context("news");

    assert!(Filter::meta(&context, "year", CompareOp::Eq, json!("2020")).is_err());
    assert!(Filter::meta(&context, "author", CompareOp::Eq, json!("x")).is_err());
}

#[test]
fn test_attribute_equals_uses_containment() {
    let context = context("news");
    let filter = Filter::attribute_equals(&context, "morph", "lemma", json!("maa")).unwrap();
    let sql = filter.to_sql().unwrap();

    assert_eq!(sql.render(), "\"public\".\"news__morph__layer\".\"data\" @> $1::text::jsonb");
    assert_eq!(
        sql.params(),
        &[SqlParam::Json(
            json!({"spans": [{"annotations": [{"lemma": "maa"}]}]}).to_string()
        )]
    );
    assert_eq!(filter.required_layers(), vec!["morph".to_string()]);
}

#[test]
fn test_attribute_on_attached_layer_needs_no_join() {
    let context = context("news");
    let filter = Filter::attribute_equals(&context, "words", "normalized_form", json!("x")).unwrap();

    assert!(filter.to_sql().unwrap().render().contains("jsonb_array_elements(\"public\".\"news\".\"data\"->'layers')"));
    assert!(filter.required_layers().is_empty());
}

#[test]
fn test_attribute_contains_escapes_pattern() {
    let context = context("news");
    let sql = Filter::attribute_contains(&context, "morph", "lemma", "50%")
        .unwrap()
        .to_sql()
        .unwrap();

    assert!(sql.render().contains("a.value->>$1::text LIKE $2::text"));
    assert_eq!(sql.params()[1], SqlParam::Text("%50\\%%".into()));
}

#[test]
fn test_attribute_checks() {
    let context = context("news");

    assert!(matches!(
        Filter::attribute_equals(&context, "morph", "form", json!("x")),
        Err(LayerStoreError::InvalidArgument(_))
    ));
    assert!(matches!(
        Filter::attribute_equals(&context, "pages", "number", json!(1)),
        Err(LayerStoreError::UnsupportedLayerType { .. })
    ));
    assert!(matches!(
        Filter::attribute_range(&context, "morph", "length", None, None),
        Err(LayerStoreError::InvalidArgument(_))
    ));
}

#[test]
fn test_attribute_range_binds_both_bounds() {
    let context = context("news");
    let sql = Filter::attribute_range(&context, "morph", "length", Some(2.0), Some(5.0))
        .unwrap()
        .to_sql()
        .unwrap();

    assert!(sql.params().contains(&SqlParam::Float(2.0)));
    assert!(sql.params().contains(&SqlParam::Float(5.0)));
    assert!(sql.render().contains(" AND "));
}

#[test]
fn test_missing_layer() {
    let context = context("news");

    let sparse = Filter::missing_layer(&context, "ner").unwrap().to_sql().unwrap();
    assert_eq!(
        sparse.render(),
        "\"public\".\"news\".\"id\" NOT IN (SELECT \"text_id\" FROM \"public\".\"news__ner__layer\")"
    );

    let attached = Filter::missing_layer(&context, "words").unwrap().to_sql().unwrap();
    assert!(attached.render().starts_with("NOT EXISTS"));
    assert_eq!(attached.params(), &[SqlParam::Text("words".into())]);
}

#[test]
fn test_ngram_sets() {
    let context = context("news");
    let query = vec![vec![vec!["mees", "läks"]], vec![vec!["naine", "tuli"], vec!["tuli", "koju"]]];
    let sql = Filter::ngram(&context, "morph", "lemma_ngram_2", query)
        .unwrap()
        .to_sql()
        .unwrap();

    assert_eq!(
        sql.render(),
        "(\"public\".\"news__morph__layer\".\"lemma_ngram_2\" @> $1::text[] OR \
         \"public\".\"news__morph__layer\".\"lemma_ngram_2\" @> $2::text[])"
    );
    assert_eq!(sql.params()[1], SqlParam::TextArray(vec!["naine-tuli".into(), "tuli-koju".into()]));

    let empty: Vec<Vec<Vec<&str>>> = vec![vec![]];
    assert!(Filter::ngram(&context, "morph", "lemma_ngram_2", empty).is_err());
    assert!(Filter::ngram(&context, "words", "lemma_ngram_2", vec![vec![vec!["a"]]]).is_err());
}

#[test]
fn test_block_and_keys() {
    let context = context("news");

    let block = Filter::block(&context, 3, 1).unwrap().to_sql().unwrap();
    assert_eq!(block.render(), "\"public\".\"news\".\"id\" % $1::bigint = $2::bigint");
    assert!(Filter::block(&context, 3, 3).is_err());
    assert!(Filter::block(&context, 0, 0).is_err());

    let keys = Filter::keys(&context, [1, 5, 8]).to_sql().unwrap();
    assert_eq!(keys.params(), &[SqlParam::IntArray(vec![1, 5, 8])]);
}

#[test]
fn test_combination_numbers_placeholders_in_order() {
    let context = context("news");
    let year = Filter::meta(&context, "year", CompareOp::Gt, json!(2000)).unwrap();
    let source = Filter::meta(&context, "source", CompareOp::Eq, json!("wiki")).unwrap();
    let block = Filter::block(&context, 2, 0).unwrap();

    let sql = year.and(&source).unwrap().or(&block).unwrap().to_sql().unwrap();
    assert_eq!(
        sql.render(),
        "((\"public\".\"news\".\"year\" > $1::bigint AND \"public\".\"news\".\"source\" = $2::text) OR \
         \"public\".\"news\".\"id\" % $3::bigint = $4::bigint)"
    );

    // operands are left untouched
    assert_eq!(year.to_sql().unwrap().params().len(), 1);
}

#[test]
fn test_combining_collections_fails() {
    let news = context("news");
    let wiki = context("wiki");
    let left = Filter::keys(&news, [1]);
    let right = Filter::keys(&wiki, [1]);

    assert!(matches!(
        left.and(&right),
        Err(LayerStoreError::IncompatibleCollections { .. })
    ));
}

// =============================================================================
// Join / Projection Tests
// =============================================================================

#[test]
fn test_join_kinds_follow_policy() {
    let context = context("news");
    let layers = ["words", "morph", "ner"];

    let keep = JoinClause::new(&context, &layers, SparsePolicy::KeepAsTemplate).unwrap();
    assert_eq!(keep.layers(), vec!["morph", "ner"]);
    assert_eq!(keep.kind_of("morph"), Some(JoinKind::Inner));
    assert_eq!(keep.kind_of("ner"), Some(JoinKind::Left));

    let null = JoinClause::new(&context, &layers, SparsePolicy::KeepAsNull).unwrap();
    assert_eq!(null.kind_of("ner"), Some(JoinKind::Left));

    let drop = JoinClause::new(&context, &layers, SparsePolicy::Drop).unwrap();
    assert_eq!(drop.kind_of("ner"), Some(JoinKind::Inner));

    assert!(matches!(
        JoinClause::new(&context, &["pages"], SparsePolicy::default()),
        Err(LayerStoreError::UnsupportedLayerType { .. })
    ));
}

#[test]
fn test_join_rendering() {
    let context = context("news");
    let join = JoinClause::new(&context, &["ner"], SparsePolicy::KeepAsTemplate).unwrap();

    assert_eq!(
        join.to_sql().render(),
        "FROM \"public\".\"news\" LEFT JOIN \"public\".\"news__ner__layer\" \
         ON \"public\".\"news\".\"id\" = \"public\".\"news__ner__layer\".\"text_id\""
    );
}

#[test]
fn test_join_combine_other_collection() {
    let news = JoinClause::new(&context("news"), &["morph"], SparsePolicy::default()).unwrap();
    let wiki = JoinClause::new(&context("wiki"), &["morph"], SparsePolicy::default()).unwrap();

    assert!(matches!(
        news.combine(wiki),
        Err(LayerStoreError::IncompatibleCollections { .. })
    ));
}

#[test]
fn test_projection_order() {
    let context = context("news");
    let columns = SelectedColumns::new(&context, &["morph", "ner"], &["year"]).unwrap();

    assert_eq!(columns.width(), 7);
    assert_eq!(columns.layer_data_index("morph"), Some(3));
    assert_eq!(columns.layer_data_index("ner"), Some(5));
    assert_eq!(SelectedColumns::layer_data_alias("ner"), "\"ner__data\"");

    let sql = columns.to_sql().render();
    assert!(sql.starts_with("SELECT \"public\".\"news\".\"id\" AS \"id\", \"public\".\"news\".\"data\" AS \"data\""));
    assert!(sql.ends_with("to_jsonb(\"public\".\"news\".\"year\") AS \"year\""));

    assert!(SelectedColumns::new(&context, &["morph"], &["author"]).is_err());
    assert!(SelectedColumns::new(&context, &["words"], &[] as &[&str]).is_err());
}
