//! Collection Structure
//!
//! Per-collection metadata describing every layer: its storage type,
//! attribute schema, relations and serialization tag.
//!
//! ## Structure table generations
//!
//! ```text
//! version  columns
//! ───────  ─────────────────────────────────────────────────────────────
//! 0.0      layer_name, detached, attributes, ambiguous, parent,
//!          enveloping, _base                   (global legacy codec)
//! 1.0      layer_type replaces detached, + meta (global legacy codec)
//! 2.0      + serialisation_module               (per-layer codec)
//! 3.0      + sparse
//! 4.0      + layer_meta (static layer meta, jsonb)
//! ```
//!
//! Layers are kept in dependency-first order: every layer appears after the
//! layers named by its `parent` and `enveloping` references. This is also
//! the order in which documents are reconstructed.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use postgres::GenericClient;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{LayerStoreError, Result};
use crate::model::{Layer, LayerType};
use crate::query::{qualified, Sql, SqlParam};
use crate::serialization::LEGACY_TAG;
use crate::storage::naming::structure_table;

// =============================================================================
// Structure Version
// =============================================================================

/// Generation of the structure table schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StructureVersion {
    V0,
    V1,
    V2,
    V3,
    V4,
}

impl StructureVersion {
    /// Version used for new collections
    pub const CURRENT: StructureVersion = StructureVersion::V4;

    pub fn as_str(&self) -> &'static str {
        match self {
            StructureVersion::V0 => "0.0",
            StructureVersion::V1 => "1.0",
            StructureVersion::V2 => "2.0",
            StructureVersion::V3 => "3.0",
            StructureVersion::V4 => "4.0",
        }
    }

    /// Versions before 2.0 use one legacy codec for every layer
    pub fn has_global_serialisation(&self) -> bool {
        *self < StructureVersion::V2
    }

    pub fn supports_sparse(&self) -> bool {
        *self >= StructureVersion::V3
    }

    /// Columns of the structure table, after `layer_name`
    fn column_definitions(&self) -> Vec<&'static str> {
        let mut columns = Vec::new();
        if *self == StructureVersion::V0 {
            columns.push("detached bool");
        } else {
            columns.push("layer_type text");
        }
        columns.extend(["attributes text[]", "ambiguous bool", "parent text", "enveloping text", "_base text"]);
        if *self >= StructureVersion::V1 {
            columns.push("meta text[]");
        }
        if *self >= StructureVersion::V2 {
            columns.push("serialisation_module text");
        }
        if *self >= StructureVersion::V3 {
            columns.push("sparse bool");
        }
        if *self >= StructureVersion::V4 {
            columns.push("layer_meta jsonb");
        }
        columns
    }
}

impl FromStr for StructureVersion {
    type Err = LayerStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "0.0" => Ok(StructureVersion::V0),
            "1.0" => Ok(StructureVersion::V1),
            "2.0" => Ok(StructureVersion::V2),
            "3.0" => Ok(StructureVersion::V3),
            "4.0" => Ok(StructureVersion::V4),
            other => Err(LayerStoreError::StructureMismatch(format!(
                "unknown structure version {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for StructureVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for StructureVersion {
    fn default() -> Self {
        StructureVersion::CURRENT
    }
}

// =============================================================================
// Layer Structure
// =============================================================================

/// Metadata of one layer of a collection
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStructure {
    pub name: String,
    pub layer_type: LayerType,
    pub attributes: Vec<String>,
    pub parent: Option<String>,
    pub enveloping: Option<String>,
    /// Layer whose spans this layer's spans rest on
    pub base: String,
    pub ambiguous: bool,
    /// Serialization tag; `None` selects the default module
    pub serialisation_module: Option<String>,
    /// Meta columns of the layer table
    pub meta: Vec<String>,
    /// Static layer meta, copied into the template
    pub layer_meta: Map<String, Value>,
    template: Layer,
}

impl LayerStructure {
    /// Describe a layer from an (empty or full) example layer
    pub fn from_layer(layer: &Layer, layer_type: LayerType, meta: Vec<String>) -> Self {
        let base = layer.name.clone();
        Self::build(
            layer.name.clone(),
            layer_type,
            layer.attributes.clone(),
            layer.parent.clone(),
            layer.enveloping.clone(),
            base,
            layer.ambiguous,
            layer.serialisation_module.clone(),
            meta,
            layer.meta.clone(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        name: String,
        layer_type: LayerType,
        attributes: Vec<String>,
        parent: Option<String>,
        enveloping: Option<String>,
        base: String,
        ambiguous: bool,
        serialisation_module: Option<String>,
        meta: Vec<String>,
        layer_meta: Map<String, Value>,
    ) -> Self {
        let mut template = Layer::new(name.clone(), attributes.clone()).with_ambiguous(ambiguous);
        template.parent = parent.clone();
        template.enveloping = enveloping.clone();
        template.serialisation_module = serialisation_module.clone();
        template.meta = layer_meta.clone();

        Self {
            name,
            layer_type,
            attributes,
            parent,
            enveloping,
            base,
            ambiguous,
            serialisation_module,
            meta,
            layer_meta,
            template,
        }
    }

    /// Empty layer used when a sparse layer has no row for a document
    pub fn template(&self) -> &Layer {
        &self.template
    }

    pub fn is_sparse(&self) -> bool {
        self.layer_type == LayerType::Sparse
    }

    /// Names this layer references (parent, enveloping, base)
    fn references(&self) -> impl Iterator<Item = &String> {
        self.parent
            .iter()
            .chain(self.enveloping.iter())
            .chain(std::iter::once(&self.base).filter(move |b| **b != self.name))
    }

    /// Parent and enveloping layers
    fn dependencies(&self) -> impl Iterator<Item = &String> {
        self.parent.iter().chain(self.enveloping.iter())
    }

    /// True if the schema and relations match `layer`
    pub fn describes(&self, layer: &Layer, default_tag: &str) -> bool {
        let tag = |t: &Option<String>| t.clone().unwrap_or_else(|| default_tag.to_string());
        self.name == layer.name
            && self.attributes == layer.attributes
            && self.parent == layer.parent
            && self.enveloping == layer.enveloping
            && self.ambiguous == layer.ambiguous
            && tag(&self.serialisation_module) == tag(&layer.serialisation_module)
    }
}

// =============================================================================
// Structure
// =============================================================================

/// Layer metadata of one collection
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    collection: String,
    version: StructureVersion,
    layers: Vec<LayerStructure>,
}

impl Structure {
    /// Structure without layers
    pub fn empty(collection: impl Into<String>, version: StructureVersion) -> Self {
        Self {
            collection: collection.into(),
            version,
            layers: Vec::new(),
        }
    }

    /// Build from layers in any order; they are put in dependency-first order
    pub fn from_layers(
        collection: impl Into<String>,
        version: StructureVersion,
        layers: Vec<LayerStructure>,
    ) -> Result<Self> {
        let collection = collection.into();
        let layers = order_layers(&collection, layers)?;
        Ok(Self {
            collection,
            version,
            layers,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn version(&self) -> StructureVersion {
        self.version
    }

    pub fn layers(&self) -> &[LayerStructure] {
        &self.layers
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn has_layer(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&LayerStructure> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Metadata of a layer, `UnknownLayer` if absent
    pub fn layer(&self, name: &str) -> Result<&LayerStructure> {
        self.get(name)
            .ok_or_else(|| LayerStoreError::unknown_layer(&self.collection, name))
    }

    pub fn is_sparse(&self, name: &str) -> Result<bool> {
        Ok(self.layer(name)?.is_sparse())
    }

    pub fn layer_type(&self, name: &str) -> Result<LayerType> {
        Ok(self.layer(name)?.layer_type)
    }

    pub fn attached_layers(&self) -> Vec<String> {
        self.layers
            .iter()
            .filter(|l| l.layer_type == LayerType::Attached)
            .map(|l| l.name.clone())
            .collect()
    }

    pub fn tabled_layers(&self) -> Vec<String> {
        self.layers
            .iter()
            .filter(|l| l.layer_type.is_tabled())
            .map(|l| l.name.clone())
            .collect()
    }

    /// Serialization tag for decoding a layer
    pub fn serialisation_tag(&self, name: &str) -> Option<String> {
        if self.version.has_global_serialisation() {
            return Some(LEGACY_TAG.to_string());
        }
        self.get(name).and_then(|l| l.serialisation_module.clone())
    }

    /// Close `requested` under parent/enveloping references.
    ///
    /// The result includes the requested layers and is in dependency-first
    /// order, so every layer comes after the layers it depends on.
    pub fn dependent_layers<S: AsRef<str>>(&self, requested: &[S]) -> Result<Vec<String>> {
        let mut closure: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();
        for name in requested {
            let layer = self.layer(name.as_ref())?;
            stack.push(&layer.name);
        }
        while let Some(name) = stack.pop() {
            if !closure.insert(name) {
                continue;
            }
            let layer = self.layer(name)?;
            for dependency in layer.dependencies() {
                stack.push(dependency);
            }
        }
        Ok(self
            .layers
            .iter()
            .filter(|l| closure.contains(l.name.as_str()))
            .map(|l| l.name.clone())
            .collect())
    }

    /// Layers that reference `name` directly
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.layers
            .iter()
            .filter(|l| l.name != name && l.references().any(|r| r == name))
            .map(|l| l.name.clone())
            .collect()
    }

    /// `name` and every layer depending on it, deepest dependents first
    pub fn deletion_order(&self, name: &str) -> Result<Vec<String>> {
        self.layer(name)?;
        let mut doomed: HashSet<String> = HashSet::from([name.to_string()]);
        let mut changed = true;
        while changed {
            changed = false;
            for layer in &self.layers {
                if !doomed.contains(&layer.name) && layer.references().any(|r| doomed.contains(r)) {
                    doomed.insert(layer.name.clone());
                    changed = true;
                }
            }
        }
        Ok(self
            .layers
            .iter()
            .rev()
            .filter(|l| doomed.contains(&l.name))
            .map(|l| l.name.clone())
            .collect())
    }

    /// Check that `layer` can be added: new name, references present,
    /// type supported by this structure version
    pub fn validate_new_layer(&self, layer: &LayerStructure) -> Result<()> {
        if self.has_layer(&layer.name) {
            return Err(LayerStoreError::AlreadyExists(format!(
                "layer {:?} in collection {:?}",
                layer.name, self.collection
            )));
        }
        for reference in layer.references() {
            if !self.has_layer(reference) {
                return Err(LayerStoreError::MissingDependency {
                    layer: layer.name.clone(),
                    dependency: reference.clone(),
                });
            }
        }
        let unsupported = match (self.version, layer.layer_type) {
            (v, LayerType::Sparse) => !v.supports_sparse(),
            (StructureVersion::V0, LayerType::Fragmented) => true,
            _ => false,
        };
        if unsupported {
            return Err(LayerStoreError::UnsupportedLayerType {
                layer: layer.name.clone(),
                layer_type: format!("{} (structure {})", layer.layer_type, self.version),
            });
        }
        if self.version.has_global_serialisation() {
            if let Some(tag) = &layer.serialisation_module {
                if tag != LEGACY_TAG {
                    return Err(LayerStoreError::StructureMismatch(format!(
                        "structure {} stores every layer with {:?}, layer {:?} uses {:?}",
                        self.version, LEGACY_TAG, layer.name, tag
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolve `_base` for a new layer: a parent's base, otherwise itself
    pub fn with_resolved_base(&self, mut layer: LayerStructure) -> LayerStructure {
        if let Some(parent) = layer.parent.as_ref().and_then(|p| self.get(p)) {
            layer.base = parent.base.clone();
        }
        if self.version.has_global_serialisation() {
            layer.serialisation_module = Some(LEGACY_TAG.to_string());
            layer.template.serialisation_module = layer.serialisation_module.clone();
        }
        layer
    }

    /// Add a validated layer to the in-memory structure
    pub fn insert(&mut self, layer: LayerStructure) -> Result<()> {
        self.validate_new_layer(&layer)?;
        let mut layers = std::mem::take(&mut self.layers);
        layers.push(layer);
        self.layers = order_layers(&self.collection, layers)?;
        Ok(())
    }

    /// Remove a layer from the in-memory structure
    pub fn remove(&mut self, name: &str) -> Result<LayerStructure> {
        let position = self
            .layers
            .iter()
            .position(|l| l.name == name)
            .ok_or_else(|| LayerStoreError::unknown_layer(&self.collection, name))?;
        if let Some(dependent) = self.dependents_of(name).into_iter().next() {
            return Err(LayerStoreError::HasDependents {
                layer: name.to_string(),
                dependent,
            });
        }
        Ok(self.layers.remove(position))
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Create the structure table for a new collection
    pub fn create_table<C: GenericClient>(
        client: &mut C,
        schema: &str,
        collection: &str,
        version: StructureVersion,
    ) -> Result<()> {
        let mut columns = vec!["layer_name text PRIMARY KEY"];
        columns.extend(version.column_definitions());
        let statement = format!(
            "CREATE TABLE {} ({})",
            qualified(schema, &structure_table(collection)),
            columns.join(", ")
        );
        debug!(sql = %statement, "creating structure table");
        client.batch_execute(&statement)?;
        Ok(())
    }

    /// Load the structure of a collection stored with `version`
    pub fn load<C: GenericClient>(
        client: &mut C,
        schema: &str,
        collection: &str,
        version: StructureVersion,
    ) -> Result<Self> {
        let statement = format!(
            "SELECT * FROM {}",
            qualified(schema, &structure_table(collection))
        );
        debug!(sql = %statement, "loading structure");
        let rows = client.query(statement.as_str(), &[])?;

        let mut layers = Vec::with_capacity(rows.len());
        for row in rows {
            layers.push(layer_from_row(&row, version)?);
        }
        Self::from_layers(collection, version, layers)
    }

    /// Insert one layer row
    pub fn insert_row<C: GenericClient>(
        client: &mut C,
        schema: &str,
        collection: &str,
        version: StructureVersion,
        layer: &LayerStructure,
    ) -> Result<()> {
        let mut columns: Vec<&str> = vec!["layer_name"];
        let mut values: Vec<SqlParam> = vec![SqlParam::Text(layer.name.clone())];

        if version == StructureVersion::V0 {
            columns.push("detached");
            values.push(SqlParam::Bool(layer.layer_type.is_tabled()));
        } else {
            columns.push("layer_type");
            values.push(SqlParam::Text(layer.layer_type.as_stored_str().to_string()));
        }
        columns.extend(["attributes", "ambiguous", "parent", "enveloping", "_base"]);
        values.push(SqlParam::TextArray(layer.attributes.clone()));
        values.push(SqlParam::Bool(layer.ambiguous));
        values.push(optional_text(&layer.parent));
        values.push(optional_text(&layer.enveloping));
        values.push(SqlParam::Text(layer.base.clone()));
        if version >= StructureVersion::V1 {
            columns.push("meta");
            values.push(SqlParam::TextArray(layer.meta.clone()));
        }
        if version >= StructureVersion::V2 {
            columns.push("serialisation_module");
            values.push(optional_text(&layer.serialisation_module));
        }
        if version >= StructureVersion::V3 {
            columns.push("sparse");
            values.push(SqlParam::Bool(layer.is_sparse()));
        }
        if version >= StructureVersion::V4 {
            columns.push("layer_meta");
            values.push(SqlParam::Json(Value::Object(layer.layer_meta.clone()).to_string()));
        }

        let mut sql = Sql::raw(format!(
            "INSERT INTO {} ({}) VALUES (",
            qualified(schema, &structure_table(collection)),
            columns.iter().map(|c| format!("\"{}\"", c)).collect::<Vec<_>>().join(", ")
        ));
        let placeholders = Sql::join(values.into_iter().map(Sql::param), ", ");
        sql.push_sql(&placeholders).push_str(")");

        debug!(sql = %sql.render(), "inserting structure row");
        client.execute(sql.render().as_str(), &sql.bind_params())?;
        Ok(())
    }

    /// Delete one layer row
    pub fn delete_row<C: GenericClient>(client: &mut C, schema: &str, collection: &str, layer: &str) -> Result<()> {
        let statement = format!(
            "DELETE FROM {} WHERE layer_name = $1",
            qualified(schema, &structure_table(collection))
        );
        debug!(sql = %statement, layer, "deleting structure row");
        client.execute(statement.as_str(), &[&layer])?;
        Ok(())
    }
}

fn optional_text(value: &Option<String>) -> SqlParam {
    match value {
        Some(v) => SqlParam::Text(v.clone()),
        None => SqlParam::Null,
    }
}

fn layer_from_row(row: &postgres::Row, version: StructureVersion) -> Result<LayerStructure> {
    let name: String = row.try_get("layer_name")?;
    let sparse = if version >= StructureVersion::V3 {
        row.try_get::<_, Option<bool>>("sparse")?.unwrap_or(false)
    } else {
        false
    };
    let layer_type = if version == StructureVersion::V0 {
        if row.try_get::<_, Option<bool>>("detached")?.unwrap_or(false) {
            LayerType::Detached
        } else {
            LayerType::Attached
        }
    } else {
        let stored: String = row.try_get("layer_type")?;
        LayerType::from_stored(&stored, sparse)?
    };
    let attributes: Vec<String> = row.try_get::<_, Option<Vec<String>>>("attributes")?.unwrap_or_default();
    let ambiguous = row.try_get::<_, Option<bool>>("ambiguous")?.unwrap_or(false);
    let parent: Option<String> = row.try_get("parent")?;
    let enveloping: Option<String> = row.try_get("enveloping")?;
    let base: Option<String> = row.try_get("_base")?;
    let meta = if version >= StructureVersion::V1 {
        row.try_get::<_, Option<Vec<String>>>("meta")?.unwrap_or_default()
    } else {
        Vec::new()
    };
    let serialisation_module = if version.has_global_serialisation() {
        Some(LEGACY_TAG.to_string())
    } else {
        row.try_get::<_, Option<String>>("serialisation_module")?
    };
    let layer_meta = if version >= StructureVersion::V4 {
        match row.try_get::<_, Option<Value>>("layer_meta")? {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        }
    } else {
        Map::new()
    };

    Ok(LayerStructure::build(
        name.clone(),
        layer_type,
        attributes,
        parent,
        enveloping,
        base.unwrap_or(name),
        ambiguous,
        serialisation_module,
        meta,
        layer_meta,
    ))
}

/// Dependency-first order, ties broken by name
fn order_layers(collection: &str, layers: Vec<LayerStructure>) -> Result<Vec<LayerStructure>> {
    let mut by_name: BTreeMap<String, LayerStructure> =
        layers.into_iter().map(|l| (l.name.clone(), l)).collect();
    let names: Vec<String> = by_name.keys().cloned().collect();

    let mut ordered: Vec<String> = Vec::with_capacity(names.len());
    let mut done: HashSet<String> = HashSet::new();
    let mut visiting: HashSet<String> = HashSet::new();

    fn visit(
        collection: &str,
        name: &str,
        by_name: &BTreeMap<String, LayerStructure>,
        done: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
        ordered: &mut Vec<String>,
    ) -> Result<()> {
        if done.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name.to_string()) {
            return Err(LayerStoreError::StructureMismatch(format!(
                "cyclic layer dependency through {:?} in collection {:?}",
                name, collection
            )));
        }
        let layer = by_name.get(name).ok_or_else(|| {
            LayerStoreError::StructureMismatch(format!(
                "collection {:?} references missing layer {:?}",
                collection, name
            ))
        })?;
        let mut dependencies: Vec<&String> = layer.dependencies().collect();
        dependencies.sort();
        for dependency in dependencies {
            visit(collection, dependency, by_name, done, visiting, ordered)?;
        }
        visiting.remove(name);
        done.insert(name.to_string());
        ordered.push(name.to_string());
        Ok(())
    }

    for name in &names {
        visit(collection, name, &by_name, &mut done, &mut visiting, &mut ordered)?;
    }

    Ok(ordered
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect())
}
