//! Error types for layerstore
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using LayerStoreError
pub type Result<T> = std::result::Result<T, LayerStoreError>;

/// Unified error type for layerstore operations
#[derive(Debug, Error)]
pub enum LayerStoreError {
    // -------------------------------------------------------------------------
    // Connection / Schema Errors
    // -------------------------------------------------------------------------
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Schema {0:?} does not exist")]
    SchemaMissing(String),

    // -------------------------------------------------------------------------
    // Registry Errors
    // -------------------------------------------------------------------------
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Collection {0:?} is not registered")]
    UnknownCollection(String),

    #[error("Collection {0:?} was deleted while it was being read")]
    CollectionGone(String),

    #[error("Registry operation {operation} failed: {source}")]
    Registry {
        operation: String,
        #[source]
        source: postgres::Error,
    },

    #[error("Invalid name: {0}")]
    InvalidName(String),

    // -------------------------------------------------------------------------
    // Structure Errors
    // -------------------------------------------------------------------------
    #[error("Collection {collection:?} has no layer {layer:?}")]
    UnknownLayer { collection: String, layer: String },

    #[error("Layer {layer:?} requires missing layer {dependency:?}")]
    MissingDependency { layer: String, dependency: String },

    #[error("Layer {layer:?} has dependent layer {dependent:?}")]
    HasDependents { layer: String, dependent: String },

    #[error("Structure mismatch: {0}")]
    StructureMismatch(String),

    #[error("Layer {layer:?} of type {layer_type} is not supported here")]
    UnsupportedLayerType { layer: String, layer_type: String },

    // -------------------------------------------------------------------------
    // Query Errors
    // -------------------------------------------------------------------------
    #[error("Cannot combine filters over {left:?} and {right:?}")]
    IncompatibleCollections { left: String, right: String },

    #[error("Invalid refinement: {0}")]
    InvalidRefinement(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Sampling Errors
    // -------------------------------------------------------------------------
    #[error("Cannot reiterate {0} without a fixed seed")]
    NonReproducibleReiteration(String),

    #[error("Sample size {requested} exceeds subcollection size {available}")]
    ExceedsCollectionSize { requested: u64, available: u64 },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization module {0:?} is not registered")]
    UnknownSerializationModule(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Driver / Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Database error: {0}")]
    Database(#[from] postgres::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LayerStoreError {
    /// True when the driver reported a missing relation (SQLSTATE 42P01)
    pub fn is_undefined_table(err: &postgres::Error) -> bool {
        err.code() == Some(&postgres::error::SqlState::UNDEFINED_TABLE)
    }

    /// True when the driver reported a unique constraint violation (SQLSTATE 23505)
    pub fn is_unique_violation(err: &postgres::Error) -> bool {
        err.code() == Some(&postgres::error::SqlState::UNIQUE_VIOLATION)
    }

    pub(crate) fn unknown_layer(collection: &str, layer: &str) -> Self {
        LayerStoreError::UnknownLayer {
            collection: collection.to_string(),
            layer: layer.to_string(),
        }
    }
}
