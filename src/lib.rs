//! # layerstore
//!
//! Storage of annotated text documents in PostgreSQL:
//! - Documents with inline ("attached") annotation layers in one table per collection
//! - Detached and sparse layers in their own tables, joined back on read
//! - Composable, parameterized queries over metadata, attributes and n-grams
//! - Holdable server-side cursors for long iterations
//! - Reproducible document and span sampling
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Storage                               │
//! │       (connection, schema, collections registry + lock)      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Collection                              │
//! │     (structure, documents, layer tables, inserter)           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │    Query    │─────────▶│ Subcollection │
//!   │ filter/join │          │ cursor, rows  │
//!   └─────────────┘          └──────┬───────┘
//!                                   │
//!                    ┌──────────────┼──────────────┐
//!                    ▼              ▼              ▼
//!             ┌────────────┐ ┌────────────┐ ┌────────────┐
//!             │  Sampling  │ │  Tagging   │ │  Serializ. │
//!             └────────────┘ │  (writer)  │ │  registry  │
//!                            └────────────┘ └────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod collection;
pub mod model;
pub mod query;
pub mod sampling;
pub mod serialization;
pub mod storage;
pub mod subcollection;
pub mod tagger;
pub mod writer;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use collection::{Collection, CreateMode, LayerOptions, MetaType, StructureVersion};
pub use config::Config;
pub use error::{LayerStoreError, Result};
pub use model::{Document, Layer, LayerType};
pub use query::{CompareOp, Filter, SparsePolicy};
pub use serialization::SerializationRegistry;
pub use storage::{CollectionOptions, Storage};
pub use subcollection::{Record, Subcollection};
pub use tagger::{FnTagger, Tagger};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of layerstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
