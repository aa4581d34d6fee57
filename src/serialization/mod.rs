//! Layer Serialization Registry
//!
//! Versioned encode/decode strategies for layer payloads.
//!
//! ## Responsibilities
//! - Map a version tag to a `SerializationModule`
//! - Resolve the tag of a layer (`None` means the default module)
//! - Encode/decode whole document payloads (`{text, meta, layers}`)
//! - Rebuild dependency navigation after decoding `id`/`head` layers
//!
//! ## Built-in modules
//!
//! ```text
//! tag         span layout
//! ─────────── ─────────────────────────────────────────────────────
//! default     {base_span: [s, e] | [[s, e], ...], annotations: [{..}]}
//! legacy_v0   {start, end, attr..} | [{..}, ..] (ambiguous)
//!             enveloping spans via `_base_` or `_index_`
//! syntax_v0   default layout, `id`/`head` coerced to integers
//! ```
//!
//! The registry is an explicit value: it is built once and handed to the
//! storage, so tests can construct isolated registries.

mod default;
mod dependency;
mod legacy;
mod syntax;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::error::{LayerStoreError, Result};
use crate::model::{Document, Layer};

pub use default::DefaultModule;
pub use dependency::build_dependency_tree;
pub use legacy::LegacyModule;
pub use syntax::SyntaxModule;

/// Tag of the module used for layers without an explicit tag
pub const DEFAULT_TAG: &str = "default";

/// Tag of the global module used by structure versions before 2.0
pub const LEGACY_TAG: &str = "legacy_v0";

/// Tag of the syntax module
pub const SYNTAX_TAG: &str = "syntax_v0";

/// A versioned layer codec
pub trait SerializationModule: Send + Sync {
    /// Encode a layer into its stored JSON payload
    fn encode(&self, layer: &Layer) -> Result<Value>;

    /// Decode a stored payload; `document` holds the layers decoded so far
    fn decode(&self, payload: &Value, document: &Document) -> Result<Layer>;

    /// True if the payload uses the `{base_span, annotations}` span layout
    /// that attribute filters are written against
    fn has_default_span_layout(&self) -> bool {
        false
    }
}

/// Mapping from version tag to serialization module
#[derive(Clone)]
pub struct SerializationRegistry {
    modules: HashMap<String, Arc<dyn SerializationModule>>,
    default_tag: String,
}

impl std::fmt::Debug for SerializationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&String> = self.modules.keys().collect();
        tags.sort();
        f.debug_struct("SerializationRegistry")
            .field("tags", &tags)
            .field("default_tag", &self.default_tag)
            .finish()
    }
}

impl Default for SerializationRegistry {
    /// Registry with the built-in modules
    fn default() -> Self {
        let mut registry = Self::empty(DEFAULT_TAG);
        registry
            .modules
            .insert(DEFAULT_TAG.to_string(), Arc::new(DefaultModule));
        registry
            .modules
            .insert(LEGACY_TAG.to_string(), Arc::new(LegacyModule));
        registry
            .modules
            .insert(SYNTAX_TAG.to_string(), Arc::new(SyntaxModule));
        registry
    }
}

impl SerializationRegistry {
    /// Registry without any module
    pub fn empty(default_tag: impl Into<String>) -> Self {
        Self {
            modules: HashMap::new(),
            default_tag: default_tag.into(),
        }
    }

    /// Register a module under a new tag
    pub fn register(&mut self, tag: impl Into<String>, module: Arc<dyn SerializationModule>) -> Result<()> {
        let tag = tag.into();
        if self.modules.contains_key(&tag) {
            return Err(LayerStoreError::AlreadyExists(format!(
                "serialization module {:?}",
                tag
            )));
        }
        self.modules.insert(tag, module);
        Ok(())
    }

    pub fn default_tag(&self) -> &str {
        &self.default_tag
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.modules.contains_key(tag)
    }

    /// Resolve a layer's tag; `None` resolves to the default module
    pub fn resolve(&self, tag: Option<&str>) -> Result<&Arc<dyn SerializationModule>> {
        let tag = tag.unwrap_or(&self.default_tag);
        self.modules
            .get(tag)
            .ok_or_else(|| LayerStoreError::UnknownSerializationModule(tag.to_string()))
    }

    /// Encode a layer with the module named by its own tag
    pub fn encode_layer(&self, layer: &Layer) -> Result<Value> {
        self.resolve(layer.serialisation_module.as_deref())?.encode(layer)
    }

    /// Decode a layer payload and rebuild dependency navigation
    pub fn decode_layer(&self, tag: Option<&str>, payload: &Value, document: &Document) -> Result<Layer> {
        let mut layer = self.resolve(tag)?.decode(payload, document)?;
        if layer.has_dependency_attributes() {
            let tree = build_dependency_tree(&layer)?;
            layer.set_navigation(Some(tree));
        }
        Ok(layer)
    }

    /// Encode a document: text, meta and every layer it carries
    pub fn encode_document(&self, document: &Document) -> Result<Value> {
        let layers = document
            .layers()
            .iter()
            .map(|layer| self.encode_layer(layer))
            .collect::<Result<Vec<_>>>()?;
        Ok(json!({
            "text": document.text,
            "meta": Value::Object(document.meta.clone()),
            "layers": layers,
        }))
    }

    /// Decode a document payload.
    ///
    /// `tag_of` maps a layer name to its stored serialization tag.
    pub fn decode_document<F>(&self, payload: &Value, tag_of: F) -> Result<Document>
    where
        F: Fn(&str) -> Option<String>,
    {
        let object = payload
            .as_object()
            .ok_or_else(|| LayerStoreError::Serialization("document payload is not an object".into()))?;
        let text = object
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| LayerStoreError::Serialization("document payload has no text".into()))?;
        let meta = match object.get("meta") {
            Some(Value::Object(meta)) => meta.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                return Err(LayerStoreError::Serialization(format!(
                    "document meta is not an object: {}",
                    other
                )))
            }
        };

        let mut document = Document::new(text).with_meta(meta);
        if let Some(layers) = object.get("layers").and_then(Value::as_array) {
            for payload in layers {
                let name = payload
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| LayerStoreError::Serialization("layer payload has no name".into()))?;
                let tag = tag_of(name);
                let layer = self.decode_layer(tag.as_deref(), payload, &document)?;
                document.add_layer(layer)?;
            }
        }
        Ok(document)
    }

    /// True if layers with this tag can be targeted by attribute filters
    pub fn has_default_span_layout(&self, tag: Option<&str>) -> bool {
        self.resolve(tag)
            .map(|module| module.has_default_span_layout())
            .unwrap_or(false)
    }
}

// =============================================================================
// Shared payload helpers
// =============================================================================

pub(crate) fn required_str<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| LayerStoreError::Serialization(format!("layer payload has no string {:?}", key)))
}

pub(crate) fn optional_str(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn attribute_names(object: &Map<String, Value>) -> Result<Vec<String>> {
    match object.get("attributes") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    LayerStoreError::Serialization(format!("attribute name is not a string: {}", v))
                })
            })
            .collect(),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(other) => Err(LayerStoreError::Serialization(format!(
            "attributes is not a list: {}",
            other
        ))),
    }
}

pub(crate) fn as_object(payload: &Value) -> Result<&Map<String, Value>> {
    payload
        .as_object()
        .ok_or_else(|| LayerStoreError::Serialization("layer payload is not an object".into()))
}
