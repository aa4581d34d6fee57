//! DDL helpers shared by the storage manager and collections

use postgres::GenericClient;
use tracing::debug;

use crate::collection::MetaColumns;
use crate::error::Result;
use crate::query::{qualified, quote_ident, quote_literal};

use super::naming::{collection_index, layer_data_index, layer_text_id_index, REGISTRY_TABLE};

fn run<C: GenericClient>(client: &mut C, statement: &str) -> Result<()> {
    debug!(sql = %statement, "executing");
    client.batch_execute(statement)?;
    Ok(())
}

pub(crate) fn create_schema<C: GenericClient>(client: &mut C, schema: &str) -> Result<()> {
    run(client, &format!("CREATE SCHEMA {}", quote_ident(schema)))
}

pub(crate) fn create_registry_table<C: GenericClient>(client: &mut C, schema: &str) -> Result<()> {
    run(
        client,
        &format!(
            "CREATE TABLE {} (collection text PRIMARY KEY, version text NOT NULL)",
            qualified(schema, REGISTRY_TABLE)
        ),
    )
}

fn meta_column_definitions(meta: &MetaColumns) -> String {
    meta.iter()
        .map(|(name, ty)| format!(", {} {}", quote_ident(name), ty.sql_type()))
        .collect()
}

/// Document table with its GIN index and a table comment
pub(crate) fn create_collection_table<C: GenericClient>(
    client: &mut C,
    schema: &str,
    collection: &str,
    meta: &MetaColumns,
    description: &str,
) -> Result<()> {
    let table = qualified(schema, collection);
    run(
        client,
        &format!(
            "CREATE TABLE {} (id BIGSERIAL PRIMARY KEY, data jsonb{})",
            table,
            meta_column_definitions(meta)
        ),
    )?;
    create_collection_index(client, schema, collection)?;
    run(
        client,
        &format!("COMMENT ON TABLE {} IS {}", table, quote_literal(description)),
    )
}

pub(crate) fn create_collection_index<C: GenericClient>(client: &mut C, schema: &str, collection: &str) -> Result<()> {
    run(
        client,
        &format!(
            "CREATE INDEX {} ON {} USING gin ((data->'layers') jsonb_path_ops)",
            quote_ident(&collection_index(collection)),
            qualified(schema, collection)
        ),
    )
}

/// Layer (or fragment) table keyed by the document id
pub(crate) fn create_layer_table<C: GenericClient>(
    client: &mut C,
    schema: &str,
    collection: &str,
    table: &str,
    fragment: bool,
    meta: &MetaColumns,
    ngram_columns: &[String],
) -> Result<()> {
    let parent = if fragment { ", parent_id bigint NOT NULL" } else { "" };
    let ngrams: String = ngram_columns
        .iter()
        .map(|c| format!(", {} text[]", quote_ident(c)))
        .collect();
    run(
        client,
        &format!(
            "CREATE TABLE {} (id BIGSERIAL PRIMARY KEY{}, text_id bigint NOT NULL REFERENCES {}(id), data jsonb{}{})",
            qualified(schema, table),
            parent,
            qualified(schema, collection),
            meta_column_definitions(meta),
            ngrams
        ),
    )?;
    run(
        client,
        &format!(
            "CREATE INDEX {} ON {} (text_id)",
            quote_ident(&layer_text_id_index(table)),
            qualified(schema, table)
        ),
    )
}

pub(crate) fn create_layer_data_index<C: GenericClient>(client: &mut C, schema: &str, table: &str) -> Result<()> {
    run(
        client,
        &format!(
            "CREATE INDEX {} ON {} USING gin (data jsonb_path_ops)",
            quote_ident(&layer_data_index(table)),
            qualified(schema, table)
        ),
    )
}

pub(crate) fn create_ngram_index<C: GenericClient>(client: &mut C, schema: &str, table: &str, column: &str) -> Result<()> {
    run(
        client,
        &format!(
            "CREATE INDEX {} ON {} USING gin ({})",
            quote_ident(&format!("idx_{}_{}", table, column)),
            qualified(schema, table),
            quote_ident(column)
        ),
    )
}

pub(crate) fn drop_index<C: GenericClient>(client: &mut C, schema: &str, index: &str) -> Result<()> {
    run(client, &format!("DROP INDEX IF EXISTS {}", qualified(schema, index)))
}

pub(crate) fn drop_table<C: GenericClient>(client: &mut C, schema: &str, table: &str, cascade: bool) -> Result<()> {
    let cascade = if cascade { " CASCADE" } else { "" };
    run(
        client,
        &format!("DROP TABLE IF EXISTS {}{}", qualified(schema, table), cascade),
    )
}
