//! Filter expressions
//!
//! A `Filter` is an immutable boolean tree of predicates over one
//! collection. Combining returns a new tree; subtrees are shared, so a
//! partially built filter can be reused freely.
//!
//! ## Predicates
//! - meta column comparison (`=, <>, <, <=, >, >=`)
//! - attribute equality (jsonb containment on the layer payload)
//! - attribute substring (`LIKE`) and numeric range
//! - layer missing for a document
//! - document id set
//! - n-gram fingerprint containment (OR of AND-sets)
//! - id block (`id % modulus = remainder`)
//!
//! Values always travel as bind parameters; only validated, quoted
//! identifiers are written into the statement text.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::{LayerStoreError, Result};
use crate::model::LayerType;

use super::sql::{escape_like, quote_ident};
use super::{QueryContext, Sql, SqlParam};

/// Comparison operator of a meta predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Meta {
        column: String,
        op: CompareOp,
        value: SqlParam,
    },
    AttributeEquals {
        layer: String,
        attribute: String,
        value: Value,
    },
    AttributeContains {
        layer: String,
        attribute: String,
        substring: String,
    },
    AttributeRange {
        layer: String,
        attribute: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    MissingLayer {
        layer: String,
    },
    Keys(Vec<i64>),
    Ngram {
        layer: String,
        column: String,
        /// OR of AND-sets of n-grams (tokens already joined with `-`)
        sets: Vec<Vec<String>>,
    },
    Block {
        modulus: i64,
        remainder: i64,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(Predicate),
    And(Arc<Node>, Arc<Node>),
    Or(Arc<Node>, Arc<Node>),
}

/// Immutable filter over one collection
#[derive(Debug, Clone)]
pub struct Filter {
    context: Arc<QueryContext>,
    node: Arc<Node>,
}

impl Filter {
    fn leaf(context: &Arc<QueryContext>, predicate: Predicate) -> Self {
        Self {
            context: Arc::clone(context),
            node: Arc::new(Node::Leaf(predicate)),
        }
    }

    // =========================================================================
    // Leaves
    // =========================================================================

    /// Compare a meta column of the collection with a value
    pub fn meta(context: &Arc<QueryContext>, column: &str, op: CompareOp, value: Value) -> Result<Self> {
        let meta_type = context.meta_type(column)?;
        let value = meta_type.to_param(column, &value)?;
        if value == SqlParam::Null && !matches!(op, CompareOp::Eq | CompareOp::Ne) {
            return Err(LayerStoreError::InvalidArgument(format!(
                "cannot compare meta column {:?} with null using {}",
                column, op
            )));
        }
        Ok(Self::leaf(
            context,
            Predicate::Meta {
                column: column.to_string(),
                op,
                value,
            },
        ))
    }

    /// Some annotation of `layer` has `attribute == value`
    pub fn attribute_equals(context: &Arc<QueryContext>, layer: &str, attribute: &str, value: Value) -> Result<Self> {
        check_attribute(context, layer, attribute)?;
        Ok(Self::leaf(
            context,
            Predicate::AttributeEquals {
                layer: layer.to_string(),
                attribute: attribute.to_string(),
                value,
            },
        ))
    }

    /// Some annotation of `layer` has a text `attribute` containing `substring`
    pub fn attribute_contains(context: &Arc<QueryContext>, layer: &str, attribute: &str, substring: &str) -> Result<Self> {
        check_attribute(context, layer, attribute)?;
        Ok(Self::leaf(
            context,
            Predicate::AttributeContains {
                layer: layer.to_string(),
                attribute: attribute.to_string(),
                substring: substring.to_string(),
            },
        ))
    }

    /// Some annotation of `layer` has a numeric `attribute` in `[min, max]`
    pub fn attribute_range(
        context: &Arc<QueryContext>,
        layer: &str,
        attribute: &str,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<Self> {
        check_attribute(context, layer, attribute)?;
        if min.is_none() && max.is_none() {
            return Err(LayerStoreError::InvalidArgument(
                "attribute range needs a lower or an upper bound".into(),
            ));
        }
        Ok(Self::leaf(
            context,
            Predicate::AttributeRange {
                layer: layer.to_string(),
                attribute: attribute.to_string(),
                min,
                max,
            },
        ))
    }

    /// Documents without content for `layer`
    pub fn missing_layer(context: &Arc<QueryContext>, layer: &str) -> Result<Self> {
        let layer_type = context.structure().layer_type(layer)?;
        if layer_type == LayerType::Fragmented {
            return Err(unsupported(layer, layer_type));
        }
        Ok(Self::leaf(
            context,
            Predicate::MissingLayer {
                layer: layer.to_string(),
            },
        ))
    }

    /// Documents whose id is in `keys`
    pub fn keys<I: IntoIterator<Item = i64>>(context: &Arc<QueryContext>, keys: I) -> Self {
        Self::leaf(context, Predicate::Keys(keys.into_iter().collect()))
    }

    /// Documents whose n-gram column contains every n-gram of at least one set
    pub fn ngram<S: AsRef<str>>(
        context: &Arc<QueryContext>,
        layer: &str,
        column: &str,
        query: Vec<Vec<Vec<S>>>,
    ) -> Result<Self> {
        let layer_type = context.structure().layer_type(layer)?;
        if !layer_type.is_joined() {
            return Err(unsupported(layer, layer_type));
        }
        crate::storage::naming::validate_column_name(column)?;
        if query.is_empty() || query.iter().any(Vec::is_empty) {
            return Err(LayerStoreError::InvalidArgument("n-gram query has an empty set".into()));
        }
        let sets = query
            .into_iter()
            .map(|set| {
                set.into_iter()
                    .map(|ngram| ngram.iter().map(|t| t.as_ref()).collect::<Vec<_>>().join("-"))
                    .collect()
            })
            .collect();
        Ok(Self::leaf(
            context,
            Predicate::Ngram {
                layer: layer.to_string(),
                column: column.to_string(),
                sets,
            },
        ))
    }

    /// Documents with `id % modulus == remainder`
    pub fn block(context: &Arc<QueryContext>, modulus: i64, remainder: i64) -> Result<Self> {
        if modulus <= 0 || remainder < 0 || remainder >= modulus {
            return Err(LayerStoreError::InvalidArgument(format!(
                "invalid block ({}, {}): need 0 <= remainder < modulus",
                modulus, remainder
            )));
        }
        Ok(Self::leaf(context, Predicate::Block { modulus, remainder }))
    }

    // =========================================================================
    // Composition
    // =========================================================================

    pub fn and(&self, other: &Filter) -> Result<Filter> {
        self.combine(other, Node::And)
    }

    pub fn or(&self, other: &Filter) -> Result<Filter> {
        self.combine(other, Node::Or)
    }

    fn combine(&self, other: &Filter, make: fn(Arc<Node>, Arc<Node>) -> Node) -> Result<Filter> {
        if self.context.identity() != other.context.identity() {
            return Err(LayerStoreError::IncompatibleCollections {
                left: self.context.identity(),
                right: other.context.identity(),
            });
        }
        Ok(Filter {
            context: Arc::clone(&self.context),
            node: Arc::new(make(Arc::clone(&self.node), Arc::clone(&other.node))),
        })
    }

    /// Collection the filter is written against (`schema.collection`)
    pub fn collection(&self) -> String {
        self.context.identity()
    }

    /// Tabled layers whose table must be joined for the filter to render
    pub fn required_layers(&self) -> Vec<String> {
        let mut layers = BTreeSet::new();
        collect_layers(&self.node, &self.context, &mut layers);
        layers.into_iter().collect()
    }

    /// Render as a WHERE-clause fragment
    pub fn to_sql(&self) -> Result<Sql> {
        render_node(&self.node, &self.context)
    }
}

// =============================================================================
// Rendering
// =============================================================================

fn render_node(node: &Node, context: &QueryContext) -> Result<Sql> {
    match node {
        Node::Leaf(predicate) => render_predicate(predicate, context),
        Node::And(left, right) => Ok(Sql::join(
            [render_node(left, context)?, render_node(right, context)?],
            " AND ",
        )
        .wrap("(", ")")),
        Node::Or(left, right) => Ok(Sql::join(
            [render_node(left, context)?, render_node(right, context)?],
            " OR ",
        )
        .wrap("(", ")")),
    }
}

fn render_predicate(predicate: &Predicate, context: &QueryContext) -> Result<Sql> {
    let collection = context.collection_table();
    match predicate {
        Predicate::Meta { column, op, value } => {
            let mut sql = Sql::raw(format!("{}.{}", collection, quote_ident(column)));
            match (value, op) {
                (SqlParam::Null, CompareOp::Eq) => sql.push_str(" IS NULL"),
                (SqlParam::Null, _) => sql.push_str(" IS NOT NULL"),
                (value, op) => sql
                    .push_str(&format!(" {} ", op.as_sql()))
                    .push_param(value.clone()),
            };
            Ok(sql)
        }
        Predicate::AttributeEquals {
            layer,
            attribute,
            value,
        } => {
            let pattern = json!({"spans": [{"annotations": [{attribute.as_str(): value}]}]});
            let mut sql = layer_data(context, layer)?;
            sql.push_str(" @> ")
                .push_param(SqlParam::Json(pattern.to_string()));
            Ok(sql)
        }
        Predicate::AttributeContains {
            layer,
            attribute,
            substring,
        } => {
            let mut sql = annotations_exists(context, layer)?;
            sql.push_str("a.value->>")
                .push_param(SqlParam::Text(attribute.clone()))
                .push_str(" LIKE ")
                .push_param(SqlParam::Text(format!("%{}%", escape_like(substring))))
                .push_str(")");
            Ok(sql)
        }
        Predicate::AttributeRange {
            layer,
            attribute,
            min,
            max,
        } => {
            let mut value = Sql::raw("CASE WHEN jsonb_typeof(a.value->");
            value
                .push_param(SqlParam::Text(attribute.clone()))
                .push_str(") = 'number' THEN (a.value->>")
                .push_param(SqlParam::Text(attribute.clone()))
                .push_str(")::float8 END");

            let mut bounds = Vec::new();
            if let Some(min) = min {
                let mut bound = value.clone();
                bound.push_str(" >= ").push_param(SqlParam::Float(*min));
                bounds.push(bound);
            }
            if let Some(max) = max {
                let mut bound = value.clone();
                bound.push_str(" <= ").push_param(SqlParam::Float(*max));
                bounds.push(bound);
            }
            let mut sql = annotations_exists(context, layer)?;
            sql.push_sql(&Sql::join(bounds, " AND ")).push_str(")");
            Ok(sql)
        }
        Predicate::MissingLayer { layer } => {
            if context.structure().layer_type(layer)? == LayerType::Attached {
                let mut sql = Sql::raw(format!(
                    "NOT EXISTS (SELECT 1 FROM jsonb_array_elements({}.\"data\"->'layers') AS l \
                     WHERE l.value->>'name' = ",
                    collection
                ));
                sql.push_param(SqlParam::Text(layer.clone())).push_str(")");
                Ok(sql)
            } else {
                Ok(Sql::raw(format!(
                    "{}.\"id\" NOT IN (SELECT \"text_id\" FROM {})",
                    collection,
                    context.layer_table(layer)?
                )))
            }
        }
        Predicate::Keys(keys) => {
            let mut sql = Sql::raw(format!("{}.\"id\" = ANY(", collection));
            sql.push_param(SqlParam::IntArray(keys.clone())).push_str(")");
            Ok(sql)
        }
        Predicate::Ngram {
            layer,
            column,
            sets,
        } => {
            let target = format!("{}.{}", context.layer_table(layer)?, quote_ident(column));
            let alternatives = sets.iter().map(|set| {
                let mut sql = Sql::raw(format!("{} @> ", target));
                sql.push_param(SqlParam::TextArray(set.clone()));
                sql
            });
            Ok(Sql::join(alternatives, " OR ").wrap("(", ")"))
        }
        Predicate::Block { modulus, remainder } => {
            let mut sql = Sql::raw(format!("{}.\"id\" % ", collection));
            sql.push_param(SqlParam::Int(*modulus))
                .push_str(" = ")
                .push_param(SqlParam::Int(*remainder));
            Ok(sql)
        }
    }
}

/// Expression yielding the jsonb payload of `layer` for the current document
fn layer_data(context: &QueryContext, layer: &str) -> Result<Sql> {
    match context.structure().layer_type(layer)? {
        LayerType::Attached => {
            let mut sql = Sql::raw(format!(
                "(SELECT l.value FROM jsonb_array_elements({}.\"data\"->'layers') AS l WHERE l.value->>'name' = ",
                context.collection_table()
            ));
            sql.push_param(SqlParam::Text(layer.to_string())).push_str(")");
            Ok(sql)
        }
        LayerType::Detached | LayerType::Sparse => {
            Ok(Sql::raw(format!("{}.\"data\"", context.layer_table(layer)?)))
        }
        other => Err(unsupported(layer, other)),
    }
}

/// `EXISTS (SELECT 1 FROM <spans> s, <annotations> a WHERE ` (caller closes)
fn annotations_exists(context: &QueryContext, layer: &str) -> Result<Sql> {
    let mut sql = Sql::raw("EXISTS (SELECT 1 FROM jsonb_array_elements(");
    sql.push_sql(&layer_data(context, layer)?)
        .push_str("->'spans') AS s, jsonb_array_elements(s.value->'annotations') AS a WHERE ");
    Ok(sql)
}

fn check_attribute(context: &QueryContext, layer: &str, attribute: &str) -> Result<()> {
    let structure = context.structure().layer(layer)?;
    if !structure.attributes.iter().any(|a| a == attribute) {
        return Err(LayerStoreError::InvalidArgument(format!(
            "layer {:?} has no attribute {:?}",
            layer, attribute
        )));
    }
    if structure.layer_type == LayerType::Fragmented {
        return Err(unsupported(layer, structure.layer_type));
    }
    if !context.has_default_span_layout(layer) {
        return Err(LayerStoreError::InvalidArgument(format!(
            "layer {:?} is not stored in the default span layout",
            layer
        )));
    }
    Ok(())
}

fn collect_layers(node: &Node, context: &QueryContext, layers: &mut BTreeSet<String>) {
    match node {
        Node::Leaf(predicate) => {
            let layer = match predicate {
                Predicate::AttributeEquals { layer, .. }
                | Predicate::AttributeContains { layer, .. }
                | Predicate::AttributeRange { layer, .. }
                | Predicate::Ngram { layer, .. } => layer,
                _ => return,
            };
            if matches!(context.structure().layer_type(layer), Ok(t) if t.is_joined()) {
                layers.insert(layer.clone());
            }
        }
        Node::And(left, right) | Node::Or(left, right) => {
            collect_layers(left, context, layers);
            collect_layers(right, context, layers);
        }
    }
}

fn unsupported(layer: &str, layer_type: LayerType) -> LayerStoreError {
    LayerStoreError::UnsupportedLayerType {
        layer: layer.to_string(),
        layer_type: layer_type.to_string(),
    }
}
