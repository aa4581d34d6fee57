//! Query plan: the I/O-free description of a subcollection
//!
//! ```text
//! SELECT <columns>
//! FROM c [LEFT] JOIN <layer tables>
//! [WHERE <filter>]
//! ORDER BY c."id"
//! [LIMIT n] [OFFSET m]
//! ```
//!
//! Refinement rules:
//! - `select` with a filter is rejected once a window (head/tail) is set
//! - `head(n)` on a headed plan must not widen the window
//! - `tail` after `head` is rejected

use crate::error::{LayerStoreError, Result};
use crate::query::{Filter, JoinClause, QueryContext, SelectedColumns, SparsePolicy, Sql, SqlParam};

/// Description of a subcollection query
#[derive(Debug, Clone)]
pub struct QueryPlan {
    filter: Option<Filter>,
    layers: Vec<String>,
    meta: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    sparse_policy: SparsePolicy,
}

/// A plan resolved against a collection snapshot
#[derive(Debug, Clone)]
pub struct ResolvedPlan {
    /// Selected layers with their dependencies, in reconstruction order
    pub layers: Vec<String>,
    pub columns: SelectedColumns,
    pub joins: JoinClause,
    pub sql: Sql,
}

impl QueryPlan {
    /// Plan over every document, selecting `layers`
    pub fn new(layers: Vec<String>) -> Self {
        Self {
            filter: None,
            layers,
            meta: Vec::new(),
            limit: None,
            offset: None,
            sparse_policy: SparsePolicy::default(),
        }
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    pub fn meta(&self) -> &[String] {
        &self.meta
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn sparse_policy(&self) -> SparsePolicy {
        self.sparse_policy
    }

    pub fn is_windowed(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    /// Refine with an extra filter and/or a new layer selection
    pub fn select(&self, filter: Option<&Filter>, layers: Option<Vec<String>>) -> Result<QueryPlan> {
        let mut plan = self.clone();
        if let Some(extra) = filter {
            if self.is_windowed() {
                return Err(LayerStoreError::InvalidRefinement(
                    "cannot filter a subcollection after head or tail".into(),
                ));
            }
            plan.filter = Some(match &self.filter {
                Some(current) => current.and(extra)?,
                None => extra.clone(),
            });
        }
        if let Some(layers) = layers {
            plan.layers = layers;
        }
        Ok(plan)
    }

    pub fn with_meta(&self, meta: Vec<String>) -> QueryPlan {
        QueryPlan {
            meta,
            ..self.clone()
        }
    }

    pub fn with_sparse_policy(&self, sparse_policy: SparsePolicy) -> QueryPlan {
        QueryPlan {
            sparse_policy,
            ..self.clone()
        }
    }

    /// First `n` documents
    pub fn head(&self, n: u64) -> Result<QueryPlan> {
        if let Some(limit) = self.limit {
            if n > limit {
                return Err(LayerStoreError::InvalidRefinement(format!(
                    "head({}) would widen a window of {} documents",
                    n, limit
                )));
            }
        }
        Ok(QueryPlan {
            limit: Some(n),
            ..self.clone()
        })
    }

    /// Last `n` documents; `count` is the number of documents in this plan
    pub fn tail(&self, n: u64, count: u64) -> Result<QueryPlan> {
        if self.limit.is_some() {
            return Err(LayerStoreError::InvalidRefinement(
                "tail after head is ambiguous".into(),
            ));
        }
        let skipped = count.saturating_sub(n);
        Ok(QueryPlan {
            offset: Some(self.offset.unwrap_or(0) + skipped),
            ..self.clone()
        })
    }

    /// Resolve layers, joins and projection, and render the statement
    pub fn resolve(&self, context: &QueryContext) -> Result<ResolvedPlan> {
        if let Some(filter) = &self.filter {
            let identity = format!("{}.{}", context.schema(), context.collection());
            if filter.collection() != identity {
                return Err(LayerStoreError::IncompatibleCollections {
                    left: identity,
                    right: filter.collection(),
                });
            }
        }

        let structure = context.structure();
        let layers = structure.dependent_layers(&self.layers)?;
        let joined: Vec<String> = layers
            .iter()
            .filter(|l| matches!(structure.layer_type(l), Ok(t) if t.is_tabled()))
            .cloned()
            .collect();

        let mut joins = JoinClause::new(context, &joined, self.sparse_policy)?;
        let columns = SelectedColumns::new(context, &joined, &self.meta)?;

        let mut sql = columns.to_sql();
        sql.push_str(" ");

        let mut where_clause = None;
        if let Some(filter) = &self.filter {
            let extra: Vec<String> = filter
                .required_layers()
                .into_iter()
                .filter(|l| !joined.contains(l))
                .collect();
            if !extra.is_empty() {
                joins = joins.combine(JoinClause::new(context, &extra, self.sparse_policy)?)?;
            }
            where_clause = Some(filter.to_sql()?);
        }
        sql.push_sql(&joins.to_sql());
        if let Some(condition) = where_clause {
            sql.push_str(" WHERE ").push_sql(&condition);
        }
        sql.push_str(&format!(" ORDER BY {}.\"id\"", context.collection_table()));
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ").push_param(SqlParam::Int(limit as i64));
        }
        if let Some(offset) = self.offset {
            sql.push_str(" OFFSET ").push_param(SqlParam::Int(offset as i64));
        }

        Ok(ResolvedPlan {
            layers,
            columns,
            joins,
            sql,
        })
    }

    /// `SELECT count(*) FROM (<plan>) AS a`
    pub fn count_sql(&self, context: &QueryContext) -> Result<Sql> {
        Ok(self
            .resolve(context)?
            .sql
            .wrap("SELECT count(*) FROM (", ") AS a"))
    }
}
