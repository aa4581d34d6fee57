//! Model Module
//!
//! In-memory representation of annotated documents.
//!
//! ## Responsibilities
//! - `Document`: base text, document meta and an ordered list of layers
//! - `Layer`: spans over the text with per-span annotations following a
//!   fixed attribute schema
//! - `LayerType`: how a layer is stored in a collection
//!
//! ## Shape
//! ```text
//! Document
//!   ├── text
//!   ├── meta   { key: value }
//!   └── layers [ Layer ]
//!                 ├── name, attributes, parent, enveloping, ambiguous
//!                 └── spans [ Span ]
//!                              ├── base_span  (start, end) | [base_span, ...]
//!                              └── annotations [ Annotation ]   (one value per attribute)
//! ```

mod document;
mod layer;

pub use document::Document;
pub use layer::{Annotation, BaseSpan, DependencyNode, DependencyTree, Layer, LayerType, Span};
