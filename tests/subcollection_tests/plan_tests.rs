//! Tests for subcollection query plans
//!
//! These tests verify:
//! - head/tail windows and the refinement rules around them
//! - Dependency closure of the selected layers
//! - Statement rendering (joins, filter, order, window)

use std::sync::Arc;

use layerstore::collection::{LayerStructure, MetaType, Structure, StructureVersion};
use layerstore::model::{Layer, LayerType};
use layerstore::query::{CompareOp, Filter, QueryContext, SparsePolicy, SqlParam};
use layerstore::serialization::SerializationRegistry;
use layerstore::subcollection::QueryPlan;
use layerstore::LayerStoreError;
use serde_json::json;

// =============================================================================
// Helper Functions
// =============================================================================

fn context(collection: &str) -> Arc<QueryContext> {
    let words = Layer::new("words", Vec::<String>::new());
    let morph = Layer::new("morph", ["lemma"]).with_parent("words");
    let ner = Layer::new("ner", ["nertag"]);
    let structure = Structure::from_layers(
        collection,
        StructureVersion::CURRENT,
        vec![
            LayerStructure::from_layer(&words, LayerType::Attached, Vec::new()),
            LayerStructure::from_layer(&morph, LayerType::Detached, Vec::new()),
            LayerStructure::from_layer(&ner, LayerType::Sparse, Vec::new()),
        ],
    )
    .unwrap();
    Arc::new(QueryContext::new(
        "public",
        structure,
        vec![("year".to_string(), MetaType::Int)],
        &SerializationRegistry::default(),
    ))
}

fn plan(layers: &[&str]) -> QueryPlan {
    QueryPlan::new(layers.iter().map(|l| l.to_string()).collect())
}

// =============================================================================
// Window Tests
// =============================================================================

#[test]
fn test_head_narrows_only() {
    let headed = plan(&[]).head(10).unwrap();
    assert_eq!(headed.limit(), Some(10));

    assert_eq!(headed.head(8).unwrap().limit(), Some(8));
    assert_eq!(headed.head(10).unwrap().limit(), Some(10));
    assert!(matches!(headed.head(11), Err(LayerStoreError::InvalidRefinement(_))));
}

#[test]
fn test_tail_offsets() {
    // 10 documents
    let tailed = plan(&[]).tail(9, 10).unwrap();
    assert_eq!(tailed.offset(), Some(1));
    assert_eq!(tailed.limit(), None);

    // tail of a tail: 9 documents remain
    let again = tailed.tail(8, 9).unwrap();
    assert_eq!(again.offset(), Some(2));

    // asking for more than there is keeps everything
    assert_eq!(plan(&[]).tail(20, 10).unwrap().offset(), Some(0));
}

#[test]
fn test_tail_after_head_is_rejected() {
    let headed = plan(&[]).head(9).unwrap();

    assert!(matches!(headed.tail(8, 9), Err(LayerStoreError::InvalidRefinement(_))));
}

#[test]
fn test_head_after_tail() {
    let windowed = plan(&[]).tail(9, 10).unwrap().head(8).unwrap();

    assert_eq!(windowed.offset(), Some(1));
    assert_eq!(windowed.limit(), Some(8));
}

#[test]
fn test_filter_after_window_is_rejected() {
    let context = context("news");
    let filter = Filter::keys(&context, [1, 2]);

    assert!(plan(&[]).select(Some(&filter), None).is_ok());
    assert!(matches!(
        plan(&[]).head(5).unwrap().select(Some(&filter), None),
        Err(LayerStoreError::InvalidRefinement(_))
    ));
    // a layer change alone is fine
    assert!(plan(&[]).head(5).unwrap().select(None, Some(vec!["morph".into()])).is_ok());
}

#[test]
fn test_filters_accumulate() {
    let context = context("news");
    let first = Filter::meta(&context, "year", CompareOp::Gt, json!(2000)).unwrap();
    let second = Filter::block(&context, 2, 1).unwrap();

    let refined = plan(&[])
        .select(Some(&first), None)
        .unwrap()
        .select(Some(&second), None)
        .unwrap();
    let sql = refined.filter().unwrap().to_sql().unwrap();
    assert!(sql.render().contains(" AND "));
    assert_eq!(sql.params().len(), 3);
}

// =============================================================================
// Resolution Tests
// =============================================================================

#[test]
fn test_resolve_adds_dependencies() {
    let context = context("news");
    let resolved = plan(&["morph"]).resolve(&context).unwrap();

    assert_eq!(resolved.layers, vec!["words".to_string(), "morph".to_string()]);
    assert_eq!(resolved.joins.layers(), vec!["morph"]);
    assert_eq!(resolved.columns.width(), 4);
}

#[test]
fn test_resolve_renders_window() {
    let context = context("news");
    let sql = plan(&[]).tail(8, 10).unwrap().head(5).unwrap().resolve(&context).unwrap().sql;

    assert_eq!(
        sql.render(),
        "SELECT \"public\".\"news\".\"id\" AS \"id\", \"public\".\"news\".\"data\" AS \"data\" \
         FROM \"public\".\"news\" ORDER BY \"public\".\"news\".\"id\" LIMIT $1::bigint OFFSET $2::bigint"
    );
    assert_eq!(sql.params(), &[SqlParam::Int(5), SqlParam::Int(2)]);
}

#[test]
fn test_filter_layers_are_joined() {
    let context = context("news");
    let filter = Filter::attribute_equals(&context, "ner", "nertag", json!("PER")).unwrap();
    let resolved = plan(&[])
        .with_sparse_policy(SparsePolicy::Drop)
        .select(Some(&filter), None)
        .unwrap()
        .resolve(&context)
        .unwrap();

    // joined for the filter, not projected
    assert_eq!(resolved.joins.layers(), vec!["ner"]);
    assert_eq!(resolved.columns.width(), 2);
    let sql = resolved.sql.render();
    assert!(sql.contains(" JOIN \"public\".\"news__ner__layer\""));
    assert!(sql.contains(" WHERE \"public\".\"news__ner__layer\".\"data\" @> $1::text::jsonb"));
}

#[test]
fn test_filter_from_other_collection() {
    let filter = Filter::keys(&context("wiki"), [1]);
    let plan = plan(&[]).select(Some(&filter), None).unwrap();

    assert!(matches!(
        plan.resolve(&context("news")),
        Err(LayerStoreError::IncompatibleCollections { .. })
    ));
}

#[test]
fn test_count_sql_wraps_plan() {
    let context = context("news");
    let sql = plan(&["ner"]).with_meta(vec!["year".into()]).count_sql(&context).unwrap();
    let rendered = sql.render();

    assert!(rendered.starts_with("SELECT count(*) FROM (SELECT "));
    assert!(rendered.contains("LEFT JOIN \"public\".\"news__ner__layer\""));
    assert!(rendered.ends_with(") AS a"));
}

#[test]
fn test_unknown_layer() {
    let context = context("news");

    assert!(matches!(
        plan(&["pos"]).resolve(&context),
        Err(LayerStoreError::UnknownLayer { .. })
    ));
}
