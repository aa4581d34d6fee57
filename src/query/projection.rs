//! Column projection
//!
//! Fixed column order, relied on when rows are decoded:
//!
//! ```text
//! "id", "data", ("<layer>__id", "<layer>__data") per detached layer, meta..
//! ```

use crate::error::Result;

use super::sql::quote_ident;
use super::{QueryContext, Sql};

/// Projected columns of a subcollection query
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedColumns {
    collection_table: String,
    /// (layer, qualified table)
    layers: Vec<(String, String)>,
    meta: Vec<String>,
}

impl SelectedColumns {
    /// `layers` are tabled layers in the order they are decoded
    pub fn new<S: AsRef<str>, M: AsRef<str>>(context: &QueryContext, layers: &[S], meta: &[M]) -> Result<Self> {
        let layers = layers
            .iter()
            .map(|l| Ok((l.as_ref().to_string(), context.layer_table(l.as_ref())?)))
            .collect::<Result<Vec<_>>>()?;
        let meta = meta
            .iter()
            .map(|m| {
                context.meta_type(m.as_ref())?;
                Ok(m.as_ref().to_string())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            collection_table: context.collection_table(),
            layers,
            meta,
        })
    }

    pub fn layers(&self) -> Vec<&str> {
        self.layers.iter().map(|(l, _)| l.as_str()).collect()
    }

    pub fn meta(&self) -> &[String] {
        &self.meta
    }

    /// Number of projected columns
    pub fn width(&self) -> usize {
        2 + 2 * self.layers.len() + self.meta.len()
    }

    /// Column index of a layer's payload
    pub fn layer_data_index(&self, layer: &str) -> Option<usize> {
        self.layers.iter().position(|(l, _)| l == layer).map(|i| 3 + 2 * i)
    }

    /// Alias of a layer's payload column
    pub fn layer_data_alias(layer: &str) -> String {
        quote_ident(&format!("{}__data", layer))
    }

    /// `SELECT c."id" AS "id", ...`
    pub fn to_sql(&self) -> Sql {
        let mut columns = vec![
            format!("{}.\"id\" AS \"id\"", self.collection_table),
            format!("{}.\"data\" AS \"data\"", self.collection_table),
        ];
        for (layer, table) in &self.layers {
            columns.push(format!(
                "{}.\"id\" AS {}",
                table,
                quote_ident(&format!("{}__id", layer))
            ));
            columns.push(format!("{}.\"data\" AS {}", table, Self::layer_data_alias(layer)));
        }
        for column in &self.meta {
            columns.push(format!(
                "to_jsonb({}.{}) AS {}",
                self.collection_table,
                quote_ident(column),
                quote_ident(column)
            ));
        }
        Sql::raw(format!("SELECT {}", columns.join(", ")))
    }
}
