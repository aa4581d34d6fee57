//! Layer, span and annotation types

use std::fmt;

use serde_json::{Map, Value};

use crate::error::{LayerStoreError, Result};

// =============================================================================
// Layer Type
// =============================================================================

/// How a layer is stored inside a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerType {
    /// Inline inside the document row
    Attached,
    /// One row per document in `<collection>__<layer>__layer`
    Detached,
    /// Detached layer whose row may be absent for a document
    Sparse,
    /// Detached layer split into fragments (`<collection>__<layer>__fragment`)
    Fragmented,
}

impl LayerType {
    /// Value stored in the `layer_type` column of the structure table
    ///
    /// Sparse layers are stored as `detached` with the sparse flag set.
    pub fn as_stored_str(&self) -> &'static str {
        match self {
            LayerType::Attached => "attached",
            LayerType::Detached | LayerType::Sparse => "detached",
            LayerType::Fragmented => "fragmented",
        }
    }

    /// Parse the stored `layer_type` and sparse flag
    pub fn from_stored(layer_type: &str, sparse: bool) -> Result<Self> {
        match (layer_type, sparse) {
            ("attached", false) => Ok(LayerType::Attached),
            ("detached", false) => Ok(LayerType::Detached),
            ("detached", true) => Ok(LayerType::Sparse),
            ("fragmented", false) => Ok(LayerType::Fragmented),
            (other, sparse) => Err(LayerStoreError::StructureMismatch(format!(
                "unknown layer type {:?} (sparse={})",
                other, sparse
            ))),
        }
    }

    /// True for layers kept in their own table
    pub fn is_tabled(&self) -> bool {
        !matches!(self, LayerType::Attached)
    }

    /// True for layers joined into subcollection queries
    pub fn is_joined(&self) -> bool {
        matches!(self, LayerType::Detached | LayerType::Sparse)
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerType::Attached => "attached",
            LayerType::Detached => "detached",
            LayerType::Sparse => "sparse",
            LayerType::Fragmented => "fragmented",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Spans
// =============================================================================

/// Position of a span in the base text
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BaseSpan {
    /// Character range `[start, end)`
    Plain { start: usize, end: usize },
    /// Ordered group of sub-spans
    Enveloping(Vec<BaseSpan>),
}

impl BaseSpan {
    pub fn plain(start: usize, end: usize) -> Self {
        BaseSpan::Plain { start, end }
    }

    pub fn enveloping(spans: Vec<BaseSpan>) -> Self {
        BaseSpan::Enveloping(spans)
    }

    /// First character offset
    pub fn start(&self) -> usize {
        match self {
            BaseSpan::Plain { start, .. } => *start,
            BaseSpan::Enveloping(spans) => spans.first().map(|s| s.start()).unwrap_or(0),
        }
    }

    /// Last character offset (exclusive)
    pub fn end(&self) -> usize {
        match self {
            BaseSpan::Plain { end, .. } => *end,
            BaseSpan::Enveloping(spans) => spans.last().map(|s| s.end()).unwrap_or(0),
        }
    }

    /// Nesting depth: 0 for plain spans
    pub fn level(&self) -> usize {
        match self {
            BaseSpan::Plain { .. } => 0,
            BaseSpan::Enveloping(spans) => 1 + spans.iter().map(|s| s.level()).max().unwrap_or(0),
        }
    }

    /// Ordering key: by (start, end), then structural order
    fn sort_key(&self) -> (usize, usize) {
        (self.start(), self.end())
    }
}

/// One annotation: a value for every attribute of the layer, in schema order
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    values: Vec<Value>,
}

impl Annotation {
    /// Build from attribute/value pairs, validated against the attribute schema.
    ///
    /// Attributes missing from `pairs` are set to null; unknown attributes are rejected.
    pub fn from_pairs(attributes: &[String], pairs: &Map<String, Value>) -> Result<Self> {
        for key in pairs.keys() {
            if !attributes.iter().any(|a| a == key) {
                return Err(LayerStoreError::InvalidArgument(format!(
                    "attribute {:?} is not in the layer schema {:?}",
                    key, attributes
                )));
            }
        }
        let values = attributes
            .iter()
            .map(|a| pairs.get(a).cloned().unwrap_or(Value::Null))
            .collect();
        Ok(Self { values })
    }

    /// Build from values already in schema order
    pub fn from_values(attributes: &[String], values: Vec<Value>) -> Result<Self> {
        if values.len() != attributes.len() {
            return Err(LayerStoreError::InvalidArgument(format!(
                "annotation has {} values, schema has {} attributes",
                values.len(),
                attributes.len()
            )));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Annotation as an attribute -> value map
    pub fn to_map(&self, attributes: &[String]) -> Map<String, Value> {
        attributes
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

/// A base span with its annotations
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub base_span: BaseSpan,
    pub annotations: Vec<Annotation>,
}

// =============================================================================
// Dependency Navigation
// =============================================================================

/// Parent/children pointers of one span in a dependency layer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyNode {
    /// Index of the head span, None for sentence roots
    pub parent: Option<usize>,
    /// Indexes of dependent spans
    pub children: Vec<usize>,
    /// Sentence number (0-based)
    pub sentence: usize,
}

/// Navigation rebuilt from `id`/`head` attributes; one node per span
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyTree {
    pub nodes: Vec<DependencyNode>,
}

impl DependencyTree {
    /// Indexes of spans without a head
    pub fn roots(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(i, _)| i)
            .collect()
    }
}

// =============================================================================
// Layer
// =============================================================================

/// A named annotation layer over a document's text
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub attributes: Vec<String>,
    pub parent: Option<String>,
    pub enveloping: Option<String>,
    pub ambiguous: bool,
    pub serialisation_module: Option<String>,
    pub meta: Map<String, Value>,
    spans: Vec<Span>,
    navigation: Option<DependencyTree>,
}

/// Navigation is derived data and does not take part in equality
impl PartialEq for Layer {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.attributes == other.attributes
            && self.parent == other.parent
            && self.enveloping == other.enveloping
            && self.ambiguous == other.ambiguous
            && self.serialisation_module == other.serialisation_module
            && self.meta == other.meta
            && self.spans == other.spans
    }
}

impl Layer {
    /// Create an empty layer with the given attribute schema
    pub fn new<S: Into<String>>(name: impl Into<String>, attributes: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            attributes: attributes.into_iter().map(Into::into).collect(),
            parent: None,
            enveloping: None,
            ambiguous: false,
            serialisation_module: None,
            meta: Map::new(),
            spans: Vec::new(),
            navigation: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_enveloping(mut self, enveloping: impl Into<String>) -> Self {
        self.enveloping = Some(enveloping.into());
        self
    }

    pub fn with_ambiguous(mut self, ambiguous: bool) -> Self {
        self.ambiguous = ambiguous;
        self
    }

    pub fn with_serialisation_module(mut self, tag: impl Into<String>) -> Self {
        self.serialisation_module = Some(tag.into());
        self
    }

    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    /// Add an annotation on a base span.
    ///
    /// Spans are kept ordered by position. A non-ambiguous layer holds at most
    /// one annotation per span.
    pub fn add_annotation(&mut self, base_span: BaseSpan, pairs: &Map<String, Value>) -> Result<()> {
        let annotation = Annotation::from_pairs(&self.attributes, pairs)?;
        self.push_annotation(base_span, annotation)
    }

    /// Add an already validated annotation
    pub fn push_annotation(&mut self, base_span: BaseSpan, annotation: Annotation) -> Result<()> {
        if annotation.values().len() != self.attributes.len() {
            return Err(LayerStoreError::InvalidArgument(format!(
                "annotation does not match the schema of layer {:?}",
                self.name
            )));
        }
        if let Some(span) = self.spans.iter_mut().find(|s| s.base_span == base_span) {
            if !self.ambiguous && !span.annotations.is_empty() {
                return Err(LayerStoreError::InvalidArgument(format!(
                    "layer {:?} is not ambiguous, span {:?} is already annotated",
                    self.name, base_span
                )));
            }
            span.annotations.push(annotation);
            self.navigation = None;
            return Ok(());
        }

        let key = base_span.sort_key();
        let position = self
            .spans
            .iter()
            .position(|s| s.base_span.sort_key() > key)
            .unwrap_or(self.spans.len());
        self.spans.insert(
            position,
            Span {
                base_span,
                annotations: vec![annotation],
            },
        );
        self.navigation = None;
        Ok(())
    }

    /// Append a span exactly as given (used by decoders; order is preserved)
    pub(crate) fn push_span_unchecked(&mut self, span: Span) {
        self.spans.push(span);
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Position of an attribute in the schema
    pub fn attribute_index(&self, attribute: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a == attribute)
    }

    /// Value of `attribute` in annotation `annotation` of span `span`
    pub fn annotation_value(&self, span: usize, annotation: usize, attribute: &str) -> Option<&Value> {
        let index = self.attribute_index(attribute)?;
        self.spans.get(span)?.annotations.get(annotation)?.value(index)
    }

    /// Same layer without spans (used as the template of sparse layers)
    pub fn empty_copy(&self) -> Layer {
        Layer {
            spans: Vec::new(),
            navigation: None,
            ..self.clone()
        }
    }

    /// Keep only the spans at the given (ascending) indexes
    pub fn retain_spans(&mut self, keep: &[usize]) {
        let mut index = 0;
        self.spans.retain(|_| {
            let retained = keep.binary_search(&index).is_ok();
            index += 1;
            retained
        });
        self.navigation = None;
    }

    /// True if the layer carries dependency relations (`id` and `head`)
    pub fn has_dependency_attributes(&self) -> bool {
        self.attribute_index("id").is_some() && self.attribute_index("head").is_some()
    }

    pub fn navigation(&self) -> Option<&DependencyTree> {
        self.navigation.as_ref()
    }

    pub(crate) fn set_navigation(&mut self, tree: Option<DependencyTree>) {
        self.navigation = tree;
    }
}
