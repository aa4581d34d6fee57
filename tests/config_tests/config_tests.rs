//! Tests for Config
//!
//! These tests verify:
//! - Defaults and the builder
//! - Completing connection parameters from a pgpass file
//! - Wildcards and comments in pgpass entries
//! - Deserializing a partial config

use std::io::Write;

use layerstore::{Config, LayerStoreError};
use tempfile::NamedTempFile;

// =============================================================================
// Helper Functions
// =============================================================================

fn pgpass(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file
}

// =============================================================================
// Defaults / Builder Tests
// =============================================================================

#[test]
fn test_defaults() {
    let config = Config::default();

    assert_eq!(config.schema, "public");
    assert_eq!(config.itersize, 50);
    assert_eq!(config.insert_buffer_size, 10_000);
    assert_eq!(config.query_length_limit, 5_000_000);
    assert!(!config.create_schema_if_missing);
}

#[test]
fn test_builder_sets_fields() {
    let config = Config::builder()
        .host("db.local")
        .port(5433)
        .dbname("corpus")
        .user("reader")
        .password("secret")
        .schema("texts")
        .itersize(200)
        .insert_buffer_size(500)
        .create_schema_if_missing(true)
        .build();

    let params = config.resolve().unwrap();
    assert_eq!(params.host, "db.local");
    assert_eq!(params.port, 5433);
    assert_eq!(params.dbname, "corpus");
    assert_eq!(config.schema, "texts");
    assert_eq!(config.itersize, 200);
    assert_eq!(config.insert_buffer_size, 500);
    assert!(config.create_schema_if_missing);
}

#[test]
fn test_connection_string_is_parsed() {
    let config = Config::from_connection_string("host=localhost port=5432 dbname=corpus user=me");
    assert!(config.to_postgres_config().is_ok());

    let broken = Config::from_connection_string("host=localhost port=notaport");
    assert!(matches!(broken.to_postgres_config(), Err(LayerStoreError::Config(_))));
}

#[test]
fn test_missing_parameters_without_pgpass() {
    let config = Config::builder().host("localhost").build();
    assert!(matches!(config.resolve(), Err(LayerStoreError::Config(_))));
}

// =============================================================================
// Pgpass Tests
// =============================================================================

#[test]
fn test_pgpass_completes_parameters() {
    let file = pgpass(&["# comment", "localhost:5432:corpus:reader:hunter2"]);
    let config = Config::builder().dbname("corpus").pgpass_file(file.path()).build();

    let params = config.resolve().unwrap();
    assert_eq!(params.host, "localhost");
    assert_eq!(params.port, 5432);
    assert_eq!(params.user, "reader");
    assert_eq!(params.password, "hunter2");
}

#[test]
fn test_pgpass_first_matching_entry_wins() {
    let file = pgpass(&[
        "otherhost:5432:corpus:reader:wrong",
        "localhost:5432:corpus:reader:right",
        "localhost:5432:corpus:reader:later",
    ]);
    let config = Config::builder()
        .host("localhost")
        .dbname("corpus")
        .pgpass_file(file.path())
        .build();

    assert_eq!(config.resolve().unwrap().password, "right");
}

#[test]
fn test_pgpass_wildcard_matches_requested_value() {
    let file = pgpass(&["*:*:*:reader:any"]);
    let config = Config::builder()
        .host("db.local")
        .port(6000)
        .dbname("corpus")
        .pgpass_file(file.path())
        .build();

    let params = config.resolve().unwrap();
    assert_eq!(params.host, "db.local");
    assert_eq!(params.port, 6000);
    assert_eq!(params.user, "reader");
    assert_eq!(params.password, "any");
}

#[test]
fn test_pgpass_wildcard_cannot_supply_missing_value() {
    let file = pgpass(&["*:5432:corpus:reader:pw"]);
    let config = Config::builder().dbname("corpus").pgpass_file(file.path()).build();

    assert!(matches!(config.resolve(), Err(LayerStoreError::Config(_))));
}

#[test]
fn test_pgpass_no_match() {
    let file = pgpass(&["localhost:5432:other:reader:pw"]);
    let config = Config::builder()
        .host("localhost")
        .dbname("corpus")
        .pgpass_file(file.path())
        .build();

    assert!(matches!(config.resolve(), Err(LayerStoreError::Config(_))));
}

#[test]
fn test_pgpass_missing_file() {
    let config = Config::builder()
        .dbname("corpus")
        .pgpass_file("/nonexistent/.pgpass")
        .build();

    assert!(matches!(config.resolve(), Err(LayerStoreError::Config(_))));
}

// =============================================================================
// Serde Tests
// =============================================================================

#[test]
fn test_deserialize_partial_config() {
    let config: Config = serde_json::from_str(r#"{"host": "db", "schema": "texts", "itersize": 10}"#).unwrap();

    assert_eq!(config.host.as_deref(), Some("db"));
    assert_eq!(config.schema, "texts");
    assert_eq!(config.itersize, 10);
    assert_eq!(config.insert_buffer_size, 10_000);
}

#[test]
fn test_password_is_not_serialized() {
    let config = Config::builder().user("me").password("secret").build();
    let json = serde_json::to_string(&config).unwrap();

    assert!(json.contains("\"user\":\"me\""));
    assert!(!json.contains("secret"));
}
