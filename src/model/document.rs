//! Document: base text, metadata and layers

use serde_json::{Map, Value};

use crate::error::{LayerStoreError, Result};

use super::Layer;

/// A stored text with its annotation layers
///
/// Layers are kept in insertion order; a layer can only be added once the
/// layers it depends on (parent, enveloping) are present.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub text: String,
    pub meta: Map<String, Value>,
    layers: Vec<Layer>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            meta: Map::new(),
            layers: Vec::new(),
        }
    }

    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    /// Add a layer, checking that its dependencies are present
    pub fn add_layer(&mut self, layer: Layer) -> Result<()> {
        if self.layer(&layer.name).is_some() {
            return Err(LayerStoreError::AlreadyExists(format!(
                "layer {:?} in document",
                layer.name
            )));
        }
        for dependency in layer.parent.iter().chain(layer.enveloping.iter()) {
            if self.layer(dependency).is_none() {
                return Err(LayerStoreError::MissingDependency {
                    layer: layer.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        self.layers.push(layer);
        Ok(())
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn layer_mut(&mut self, name: &str) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.name == name)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name.as_str()).collect()
    }

    /// Split into text, meta and layers
    pub fn into_parts(self) -> (String, Map<String, Value>, Vec<Layer>) {
        (self.text, self.meta, self.layers)
    }

    /// Swap a layer in place, keeping its position
    pub fn replace_layer(&mut self, layer: Layer) -> Result<()> {
        match self.layers.iter_mut().find(|l| l.name == layer.name) {
            Some(slot) => {
                *slot = layer;
                Ok(())
            }
            None => Err(LayerStoreError::InvalidArgument(format!(
                "document has no layer {:?}",
                layer.name
            ))),
        }
    }

    /// Remove a layer; fails if another layer depends on it
    pub fn remove_layer(&mut self, name: &str) -> Result<Layer> {
        if let Some(dependent) = self
            .layers
            .iter()
            .find(|l| l.parent.as_deref() == Some(name) || l.enveloping.as_deref() == Some(name))
        {
            return Err(LayerStoreError::HasDependents {
                layer: name.to_string(),
                dependent: dependent.name.clone(),
            });
        }
        let position = self
            .layers
            .iter()
            .position(|l| l.name == name)
            .ok_or_else(|| LayerStoreError::InvalidArgument(format!("document has no layer {:?}", name)))?;
        Ok(self.layers.remove(position))
    }
}
