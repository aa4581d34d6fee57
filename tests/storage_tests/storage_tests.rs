//! Tests against a live PostgreSQL database
//!
//! Set `LAYERSTORE_TEST_DSN` (a libpq connection string) to run them; every
//! test works in its own schema and drops it afterwards. Without the
//! variable the tests return immediately.
//!
//! These tests verify:
//! - Collection lifecycle in the registry
//! - Document insert, get and ordered iteration
//! - head/tail windows
//! - Detached and sparse layers created by a tagger
//! - Append mode and block (sharded) tagging
//! - Iteration over a collection deleted mid-way
//! - Reproducible sampling and permutation

use layerstore::model::BaseSpan;
use layerstore::sampling::{SampleAmount, SampleOptions};
use layerstore::{
    CollectionOptions, CompareOp, Config, CreateMode, Document, Filter, FnTagger, Layer, LayerOptions,
    LayerStoreError, LayerType, MetaType, Record, SparsePolicy, Storage, Subcollection,
};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

// =============================================================================
// Helper Functions
// =============================================================================

/// Storage in a fresh schema, or `None` when no database is configured
fn storage(schema: &str) -> Option<Storage> {
    let dsn = std::env::var("LAYERSTORE_TEST_DSN").ok()?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let mut config = Config::from_connection_string(dsn);
    config.schema = format!("layerstore_test_{}", schema);
    config.create_schema_if_missing = true;

    let storage = Storage::open(config).unwrap();
    storage.delete_schema().unwrap();
    let storage = Storage::open(storage.config().clone()).unwrap();
    Some(storage)
}

fn words(text: &str) -> Layer {
    let mut layer = Layer::new("words", Vec::<String>::new());
    let mut start = 0;
    for word in text.split(' ') {
        layer
            .add_annotation(BaseSpan::plain(start, start + word.len()), &Map::new())
            .unwrap();
        start += word.len() + 1;
    }
    layer
}

const TEXTS: [&str; 10] = [
    "tere maailm",
    "Mees läks koju",
    "Naine tuli koju",
    "Ilus ilm täna",
    "Tallinn on linn",
    "Tartu on ka linn",
    "Mees tuli tagasi",
    "Koer haukus valjult",
    "Kass magab",
    "päike paistab ja linnud laulavad",
];

/// Collection `news` with ten documents (ids 0..10), attached `words` and a `year` meta column
fn news(storage: &Storage) -> layerstore::Collection {
    let collection = storage
        .add_collection(
            "news",
            CollectionOptions::default()
                .meta(vec![("year".to_string(), MetaType::Int)])
                .description("test collection"),
        )
        .unwrap();

    let mut inserter = collection.insert().unwrap();
    for (i, text) in TEXTS.iter().enumerate() {
        let mut document = Document::new(*text);
        document.add_layer(words(text)).unwrap();
        let meta = json!({"year": 2000 + i as i64});
        inserter
            .insert(&document, Some(i as i64), meta.as_object())
            .unwrap();
    }
    assert_eq!(inserter.close().unwrap(), 10);
    collection
}

/// Capitalized words as a `ner` layer; documents 0 and 9 get an empty layer
fn ner_tagger() -> FnTagger<impl Fn(&Document, &mut Map<String, Value>) -> layerstore::Result<Layer>> {
    let template = Layer::new("ner", ["nertag"]);
    FnTagger::new(template.clone(), ["words"], move |document: &Document, _status: &mut Map<String, Value>| {
        let mut layer = template.clone();
        if let Some(words) = document.layer("words") {
            for span in words.spans() {
                let (start, end) = (span.base_span.start(), span.base_span.end());
                let word = &document.text[start..end];
                if word.chars().next().map_or(false, char::is_uppercase) {
                    layer.add_annotation(span.base_span.clone(), json!({"nertag": "LOC"}).as_object().unwrap())?;
                }
            }
        }
        Ok(layer)
    })
}

fn ids(subcollection: &Subcollection) -> Vec<i64> {
    subcollection
        .iter()
        .unwrap()
        .map(|record| record.unwrap().id)
        .collect()
}

fn record_ids(records: impl Iterator<Item = layerstore::Result<Record>>) -> Vec<i64> {
    records.map(|record| record.unwrap().id).collect()
}

// =============================================================================
// Collection Tests
// =============================================================================

#[test]
fn test_collection_lifecycle() {
    let Some(storage) = storage("lifecycle") else { return };

    let collection = news(&storage);
    assert!(storage.collection_exists("news"));
    assert_eq!(collection.len().unwrap(), 10);
    assert!(matches!(
        storage.add_collection("news", CollectionOptions::default()),
        Err(LayerStoreError::AlreadyExists(_))
    ));

    let reopened = storage.get_collection("news").unwrap();
    assert_eq!(reopened.meta_columns(), &vec![("year".to_string(), MetaType::Int)]);
    assert_eq!(reopened.structure().layer_names(), vec!["words"]);

    collection.delete(false).unwrap();
    assert!(!storage.collection_exists("news"));
    assert!(matches!(
        storage.get_collection("news"),
        Err(LayerStoreError::UnknownCollection(_))
    ));
    storage.delete_schema().unwrap();
}

#[test]
fn test_insert_get_and_iterate() {
    let Some(storage) = storage("iterate") else { return };
    let collection = news(&storage);

    let document = collection.get(2).unwrap().unwrap();
    assert_eq!(document.text, TEXTS[2]);
    assert_eq!(document.layer("words").unwrap().len(), 3);
    assert!(collection.get(99).unwrap().is_none());

    let records: Vec<Record> = collection
        .select()
        .with_meta(["year"])
        .with_itersize(3)
        .iter()
        .unwrap()
        .collect::<layerstore::Result<_>>()
        .unwrap();
    assert_eq!(records.len(), 10);
    assert!(records.windows(2).all(|w| w[0].id < w[1].id));
    assert_eq!(records[4].meta.get("year"), Some(&json!(2004)));

    let year = Filter::meta(&collection.context(), "year", CompareOp::Ge, json!(2007)).unwrap();
    assert_eq!(ids(&collection.select().filter(&year).unwrap()), vec![7, 8, 9]);
    storage.delete_schema().unwrap();
}

#[test]
fn test_head_and_tail() {
    let Some(storage) = storage("window") else { return };
    let collection = news(&storage);
    let all = collection.select();

    assert_eq!(ids(&all.head(8).unwrap()), (0..8).collect::<Vec<_>>());
    assert_eq!(ids(&all.tail(9).unwrap()), (1..10).collect::<Vec<_>>());
    assert_eq!(ids(&all.tail(9).unwrap().head(8).unwrap()), (1..9).collect::<Vec<_>>());
    assert_eq!(ids(&all.tail(9).unwrap().tail(8).unwrap()), (2..10).collect::<Vec<_>>());
    assert_eq!(all.head(10).unwrap().len().unwrap(), 10);

    assert!(matches!(
        all.head(8).unwrap().head(9),
        Err(LayerStoreError::InvalidRefinement(_))
    ));
    assert!(matches!(
        all.head(8).unwrap().tail(2),
        Err(LayerStoreError::InvalidRefinement(_))
    ));
    storage.delete_schema().unwrap();
}

// =============================================================================
// Layer Tests
// =============================================================================

#[test]
fn test_create_detached_layer() {
    let Some(storage) = storage("detached") else { return };
    let collection = news(&storage);

    let written = collection.create_layer(&ner_tagger(), LayerOptions::default()).unwrap();
    assert_eq!(written, 10);
    assert!(matches!(
        collection.create_layer(&ner_tagger(), LayerOptions::default()),
        Err(LayerStoreError::AlreadyExists(_))
    ));

    let per = Filter::attribute_equals(&collection.context(), "ner", "nertag", json!("LOC")).unwrap();
    let tagged = collection
        .select()
        .select_layers(["words", "ner"])
        .unwrap()
        .filter(&per)
        .unwrap();
    assert_eq!(ids(&tagged), vec![1, 2, 3, 4, 5, 6, 7, 8]);

    let record = tagged.iter().unwrap().next().unwrap().unwrap();
    assert!(record.document.layer("words").is_some());

    // overwrite recreates the layer
    let written = collection
        .create_layer(&ner_tagger(), LayerOptions::default().mode(CreateMode::Overwrite))
        .unwrap();
    assert_eq!(written, 10);

    collection.delete_layer("ner", false).unwrap();
    assert!(!collection.structure().has_layer("ner"));
    storage.delete_schema().unwrap();
}

#[test]
fn test_sparse_layer_policies() {
    let Some(storage) = storage("sparse") else { return };
    let collection = news(&storage);

    let written = collection
        .create_layer(&ner_tagger(), LayerOptions::default().sparse(true))
        .unwrap();
    assert_eq!(written, 8);
    let selected = collection.select().select_layers(["ner"]).unwrap();

    let all = selected.iter().unwrap().collect::<layerstore::Result<Vec<_>>>().unwrap();
    assert_eq!(all.len(), 10);
    let empty = all.iter().find(|r| r.id == 0).unwrap();
    assert!(empty.document.layer("ner").unwrap().is_empty());

    let dropped = selected.clone().with_sparse_policy(SparsePolicy::Drop);
    assert_eq!(ids(&dropped), (1..9).collect::<Vec<_>>());

    let nulls = selected.with_sparse_policy(SparsePolicy::KeepAsNull);
    let first = nulls.iter().unwrap().next().unwrap().unwrap();
    assert_eq!(first.id, 0);
    assert!(first.document.layer("ner").is_none());
    storage.delete_schema().unwrap();
}

#[test]
fn test_append_to_sparse_layer() {
    let Some(storage) = storage("append") else { return };
    let collection = news(&storage);

    let written = collection
        .create_layer(&ner_tagger(), LayerOptions::default().sparse(true))
        .unwrap();
    assert_eq!(written, 8);

    // every document with content already has a row
    let appended = collection
        .create_layer(&ner_tagger(), LayerOptions::default().sparse(true).mode(CreateMode::Append))
        .unwrap();
    assert_eq!(appended, 0);
    let tagged = collection
        .select()
        .select_layers(["ner"])
        .unwrap()
        .with_sparse_policy(SparsePolicy::Drop);
    assert_eq!(ids(&tagged), (1..9).collect::<Vec<_>>());
    storage.delete_schema().unwrap();
}

#[test]
fn test_append_requires_sparse_layer() {
    let Some(storage) = storage("append_dense") else { return };
    let collection = news(&storage);

    collection.create_layer(&ner_tagger(), LayerOptions::default()).unwrap();
    assert!(matches!(
        collection.create_layer(&ner_tagger(), LayerOptions::default().mode(CreateMode::Append)),
        Err(LayerStoreError::InvalidArgument(_))
    ));
    storage.delete_schema().unwrap();
}

#[test]
fn test_block_tagging() {
    let Some(storage) = storage("block") else { return };
    let collection = news(&storage);
    collection
        .add_layer(&Layer::new("ner", ["nertag"]), LayerType::Detached, &LayerOptions::default())
        .unwrap();

    let tagger = ner_tagger();
    assert_eq!(collection.create_layer_block(&tagger, (3, 0), CreateMode::New).unwrap(), 4);
    assert_eq!(collection.create_layer_block(&tagger, (3, 1), CreateMode::Append).unwrap(), 3);
    assert_eq!(collection.create_layer_block(&tagger, (3, 1), CreateMode::Append).unwrap(), 0);

    let tagged = collection.select().select_layers(["ner"]).unwrap();
    assert_eq!(ids(&tagged), vec![0, 1, 3, 4, 6, 7, 9]);
    storage.delete_schema().unwrap();
}

#[test]
fn test_failed_overwrite_leaves_no_layer() {
    let Some(storage) = storage("overwrite_fail") else { return };
    let collection = news(&storage);
    collection.create_layer(&ner_tagger(), LayerOptions::default()).unwrap();

    let failing = FnTagger::new(
        Layer::new("ner", ["nertag"]),
        ["words"],
        |_: &Document, _: &mut Map<String, Value>| -> layerstore::Result<Layer> {
            Err(LayerStoreError::InvalidArgument("tagger failed".into()))
        },
    );
    assert!(matches!(
        collection.create_layer(&failing, LayerOptions::default().mode(CreateMode::Overwrite)),
        Err(LayerStoreError::InvalidArgument(_))
    ));
    assert!(!collection.structure().has_layer("ner"));
    storage.delete_schema().unwrap();
}

#[test]
fn test_missing_input_layer() {
    let Some(storage) = storage("inputs") else { return };
    let collection = news(&storage);
    let template = Layer::new("pos", ["tag"]);
    let tagger = FnTagger::new(template.clone(), ["morph"], move |_: &Document, _: &mut Map<String, Value>| {
        Ok(template.clone())
    });

    assert!(matches!(
        collection.create_layer(&tagger, LayerOptions::default()),
        Err(LayerStoreError::MissingDependency { .. })
    ));
    assert!(!collection.structure().has_layer("pos"));
    storage.delete_schema().unwrap();
}

#[test]
fn test_iteration_over_deleted_collection() {
    let Some(storage) = storage("gone") else { return };
    let collection = news(&storage);

    let mut records = collection.select().with_itersize(2).iter().unwrap();
    assert!(records.next().unwrap().is_ok());
    assert!(records.next().unwrap().is_ok());

    storage.delete_collection("news", true).unwrap();
    assert!(matches!(
        records.next(),
        Some(Err(LayerStoreError::CollectionGone(_)))
    ));
    assert!(records.next().is_none());
    storage.delete_schema().unwrap();
}

// =============================================================================
// Sampling Tests
// =============================================================================

#[test]
fn test_seeded_sample_is_reproducible() {
    let Some(storage) = storage("sample") else { return };
    let collection = news(&storage);
    let mut subcollection = collection.select();

    let options = SampleOptions::default().seed(0.25);
    let first = record_ids(subcollection.sample(SampleAmount::Percentage(50.0), options).unwrap());
    let second = record_ids(subcollection.sample(SampleAmount::Percentage(50.0), options).unwrap());
    assert_eq!(first, second);
    assert!(first.windows(2).all(|w| w[0] < w[1]));

    assert!(matches!(
        subcollection.sample(SampleAmount::Size(11), options),
        Err(LayerStoreError::ExceedsCollectionSize { requested: 11, available: 10 })
    ));
    storage.delete_schema().unwrap();
}

#[test]
fn test_unseeded_reiteration_fails() {
    let Some(storage) = storage("reiterate") else { return };
    let collection = news(&storage);
    let mut subcollection = collection.select();

    let amount = SampleAmount::Percentage(30.0);
    drop(subcollection.sample(amount, SampleOptions::default()).unwrap());
    assert!(matches!(
        subcollection.sample(amount, SampleOptions::default()),
        Err(LayerStoreError::NonReproducibleReiteration(_))
    ));
    storage.delete_schema().unwrap();
}

#[test]
fn test_seeded_permutation() {
    let Some(storage) = storage("permutation") else { return };
    let collection = news(&storage);
    let mut subcollection = collection.select();

    let first = record_ids(subcollection.permutate(Some(0.5)).unwrap());
    let second = record_ids(subcollection.permutate(Some(0.5)).unwrap());
    assert_eq!(first, second);

    let mut sorted = first.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..10).collect::<Vec<_>>());
    assert!(subcollection.permutate(Some(2.0)).is_err());
    storage.delete_schema().unwrap();
}

#[test]
fn test_seeded_span_sample() {
    let Some(storage) = storage("span_sample") else { return };
    let collection = news(&storage);
    let mut subcollection = collection.select();

    let spans = |records: Vec<Record>| -> Vec<(i64, usize)> {
        records
            .iter()
            .map(|r| (r.id, r.document.layer("words").map_or(0, |l| l.len())))
            .collect()
    };
    let draw = |subcollection: &mut Subcollection| {
        subcollection
            .sample_from_layer("words", SampleAmount::Percentage(40.0), Some(9))
            .unwrap()
            .collect::<layerstore::Result<Vec<_>>>()
            .unwrap()
    };

    let first = spans(draw(&mut subcollection));
    let second = spans(draw(&mut subcollection));
    assert_eq!(first, second);
    assert!(first.iter().all(|(_, n)| *n > 0));

    assert!(matches!(
        subcollection.sample_from_layer("ner", SampleAmount::Size(1), None),
        Err(LayerStoreError::InvalidArgument(_))
    ));
    storage.delete_schema().unwrap();
}
