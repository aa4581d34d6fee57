//! Table naming convention
//!
//! ```text
//! <collection>                     documents (text, meta, attached layers)
//! <collection>__structure          layer metadata
//! <collection>__<layer>__layer     detached / sparse layer rows
//! <collection>__<layer>__fragment  fragmented layer rows
//! __collections                    registry of all collections
//! ```
//!
//! Names are lowercase identifiers without `__`, so every table name above
//! splits back unambiguously.

use crate::error::{LayerStoreError, Result};

/// Registry table holding one row per collection
pub const REGISTRY_TABLE: &str = "__collections";

/// Postgres truncates identifiers beyond this many bytes
const MAX_IDENTIFIER_LEN: usize = 63;

pub fn structure_table(collection: &str) -> String {
    format!("{}__structure", collection)
}

pub fn layer_table(collection: &str, layer: &str) -> String {
    format!("{}__{}__layer", collection, layer)
}

pub fn fragment_table(collection: &str, layer: &str) -> String {
    format!("{}__{}__fragment", collection, layer)
}

/// GIN index over the attached layers of a collection
pub fn collection_index(collection: &str) -> String {
    format!("idx_{}_data", collection)
}

/// GIN index over a layer table's data
pub fn layer_data_index(table: &str) -> String {
    format!("idx_{}_data", table)
}

/// B-tree index over a layer table's document reference
pub fn layer_text_id_index(table: &str) -> String {
    format!("idx_{}_text_id", table)
}

/// Validate a collection name
pub fn validate_collection_name(name: &str) -> Result<()> {
    validate_name("collection", name)?;
    // the longest derived table name must still fit
    let longest = structure_table(name);
    if longest.len() > MAX_IDENTIFIER_LEN {
        return Err(LayerStoreError::InvalidName(format!(
            "collection name {:?} is too long",
            name
        )));
    }
    Ok(())
}

/// Validate a layer name and the table name it produces
pub fn validate_layer_name(collection: &str, layer: &str) -> Result<()> {
    validate_name("layer", layer)?;
    let table = fragment_table(collection, layer);
    if table.len() > MAX_IDENTIFIER_LEN {
        return Err(LayerStoreError::InvalidName(format!(
            "layer table name {:?} is too long",
            table
        )));
    }
    Ok(())
}

/// Validate a column name (meta and n-gram columns)
pub fn validate_column_name(name: &str) -> Result<()> {
    validate_name("column", name)?;
    if matches!(name, "id" | "data" | "text_id" | "parent_id") {
        return Err(LayerStoreError::InvalidName(format!(
            "column name {:?} is reserved",
            name
        )));
    }
    Ok(())
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    let valid_rest = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if !valid_start || !valid_rest {
        return Err(LayerStoreError::InvalidName(format!(
            "{} name {:?} must be a lowercase identifier",
            kind, name
        )));
    }
    if name.contains("__") {
        return Err(LayerStoreError::InvalidName(format!(
            "{} name {:?} must not contain '__'",
            kind, name
        )));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(LayerStoreError::InvalidName(format!("{} name {:?} is too long", kind, name)));
    }
    Ok(())
}
