//! Taggers: injected functions that produce a layer for a document
//!
//! The annotation algorithms live outside this crate. A collection only
//! needs to know which layers a tagger reads, what the output layer looks
//! like, and how to obtain the output for one document.

use serde_json::{Map, Value};

use crate::error::Result;
use crate::model::{Document, Layer};

pub trait Tagger {
    /// Empty layer describing the output: name, attributes, relations, tag
    fn template(&self) -> Layer;

    /// Layers that must be present in the document before tagging
    fn input_layers(&self) -> Vec<String>;

    /// Produce the output layer for `document`.
    ///
    /// `status` collects per-document values for the layer table's meta
    /// columns; it is cleared before every call.
    fn make_layer(&self, document: &Document, status: &mut Map<String, Value>) -> Result<Layer>;

    /// Name of the output layer
    fn output_layer(&self) -> String {
        self.template().name
    }
}

/// Tagger built from a closure
pub struct FnTagger<F> {
    template: Layer,
    input_layers: Vec<String>,
    make: F,
}

impl<F> FnTagger<F>
where
    F: Fn(&Document, &mut Map<String, Value>) -> Result<Layer>,
{
    pub fn new<S: Into<String>>(template: Layer, input_layers: impl IntoIterator<Item = S>, make: F) -> Self {
        Self {
            template,
            input_layers: input_layers.into_iter().map(Into::into).collect(),
            make,
        }
    }
}

impl<F> Tagger for FnTagger<F>
where
    F: Fn(&Document, &mut Map<String, Value>) -> Result<Layer>,
{
    fn template(&self) -> Layer {
        self.template.clone()
    }

    fn input_layers(&self) -> Vec<String> {
        self.input_layers.clone()
    }

    fn make_layer(&self, document: &Document, status: &mut Map<String, Value>) -> Result<Layer> {
        (self.make)(document, status)
    }

    fn output_layer(&self) -> String {
        self.template.name.clone()
    }
}
