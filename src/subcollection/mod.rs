//! Subcollections: filtered, windowed views over a collection
//!
//! A `Subcollection` is a description (collection + `QueryPlan`) and does no
//! I/O until it is counted or iterated.
//!
//! ```text
//!   Configured ──iter()──▶ Executing ──last batch──▶ Exhausted
//!       ▲                      │
//!       └──── iter() again ◀───┘   (new cursor, same description)
//! ```
//!
//! ## Responsibilities
//! - Refinement: `select`, `filter`, `head`, `tail`
//! - Iteration over a holdable server-side cursor, `itersize` rows per batch
//! - Tagging selected documents into a detached layer (see `tagging`)
//! - Sampling and permutation (see `crate::sampling`)

mod assemble;
mod cursor;
mod plan;
mod tagging;

use std::collections::VecDeque;
use std::sync::Arc;

use postgres::Row;
use tracing::debug;

use crate::collection::Collection;
use crate::error::{LayerStoreError, Result};
use crate::model::LayerType;
use crate::query::{Filter, QueryContext, SparsePolicy, Sql};
use crate::sampling::ReiterationGuard;

pub use assemble::Record;
pub use plan::{QueryPlan, ResolvedPlan};

pub(crate) use assemble::RowAssembler;
pub(crate) use cursor::ServerCursor;

/// Filtered and windowed view over a collection
#[derive(Debug, Clone)]
pub struct Subcollection {
    pub(crate) collection: Collection,
    pub(crate) plan: QueryPlan,
    pub(crate) itersize: usize,
    pub(crate) guard: ReiterationGuard,
}

impl Subcollection {
    pub(crate) fn new(collection: Collection, layers: Vec<String>) -> Self {
        let itersize = collection.storage().config().itersize;
        Self {
            collection,
            plan: QueryPlan::new(layers),
            itersize,
            guard: ReiterationGuard::default(),
        }
    }

    fn with_plan(&self, plan: QueryPlan) -> Self {
        Self {
            collection: self.collection.clone(),
            plan,
            itersize: self.itersize,
            guard: ReiterationGuard::default(),
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub fn selected_layers(&self) -> &[String] {
        self.plan.layers()
    }

    /// Also return these collection meta columns with every record
    pub fn with_meta<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.plan = self.plan.with_meta(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Rows fetched per cursor round trip
    pub fn with_itersize(mut self, itersize: usize) -> Self {
        self.itersize = itersize.max(1);
        self
    }

    pub fn with_sparse_policy(mut self, policy: SparsePolicy) -> Self {
        self.plan = self.plan.with_sparse_policy(policy);
        self
    }

    // =========================================================================
    // Refinement
    // =========================================================================

    /// Refine with an extra filter and/or a new layer selection
    pub fn select(&self, filter: Option<&Filter>, layers: Option<Vec<String>>) -> Result<Subcollection> {
        if let Some(layers) = &layers {
            let structure = self.collection.structure();
            for name in layers {
                let layer = structure.layer(name)?;
                if layer.layer_type == LayerType::Fragmented {
                    return Err(LayerStoreError::UnsupportedLayerType {
                        layer: name.clone(),
                        layer_type: layer.layer_type.to_string(),
                    });
                }
            }
        }
        Ok(self.with_plan(self.plan.select(filter, layers)?))
    }

    pub fn filter(&self, filter: &Filter) -> Result<Subcollection> {
        self.select(Some(filter), None)
    }

    pub fn select_layers<S: Into<String>>(&self, layers: impl IntoIterator<Item = S>) -> Result<Subcollection> {
        self.select(None, Some(layers.into_iter().map(Into::into).collect()))
    }

    /// Select every layer except fragmented ones
    pub fn select_all(&self) -> Result<Subcollection> {
        let layers = self
            .collection
            .structure()
            .layers()
            .iter()
            .filter(|l| l.layer_type != LayerType::Fragmented)
            .map(|l| l.name.clone())
            .collect::<Vec<_>>();
        self.select(None, Some(layers))
    }

    /// First `n` documents
    pub fn head(&self, n: u64) -> Result<Subcollection> {
        Ok(self.with_plan(self.plan.head(n)?))
    }

    /// Last `n` documents; costs one count query
    pub fn tail(&self, n: u64) -> Result<Subcollection> {
        if self.plan.limit().is_some() {
            return Err(LayerStoreError::InvalidRefinement(
                "tail after head is ambiguous".into(),
            ));
        }
        let count = self.len()?;
        Ok(self.with_plan(self.plan.tail(n, count)?))
    }

    // =========================================================================
    // Execution
    // =========================================================================

    pub(crate) fn resolve(&self) -> Result<(Arc<QueryContext>, ResolvedPlan)> {
        let context = self.collection.context();
        let resolved = self.plan.resolve(&context)?;
        Ok((context, resolved))
    }

    /// Number of documents (one count query)
    pub fn len(&self) -> Result<u64> {
        let context = self.collection.context();
        let sql = self.plan.count_sql(&context)?;
        let row = self.collection.storage().query_one(&sql)?;
        let count: i64 = row.try_get(0)?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Open a cursor over the subcollection
    pub fn iter(&self) -> Result<SubcollectionIter> {
        let (context, resolved) = self.resolve()?;
        let sql = resolved.sql.clone();
        self.open_iter(context, &resolved, &sql)
    }

    /// Open a cursor over `sql`, whose rows have the columns of `resolved`
    pub(crate) fn open_iter(
        &self,
        context: Arc<QueryContext>,
        resolved: &ResolvedPlan,
        sql: &Sql,
    ) -> Result<SubcollectionIter> {
        let storage = self.collection.storage();
        let assembler = RowAssembler::new(context, storage.registry().clone(), resolved, self.plan.sparse_policy());
        let cursor = ServerCursor::declare(storage, self.collection.name(), sql)?;
        debug!(collection = self.collection.name(), itersize = self.itersize, "subcollection cursor opened");
        Ok(SubcollectionIter {
            cursor,
            assembler,
            buffer: VecDeque::new(),
            itersize: self.itersize,
            failed: false,
        })
    }
}

// =============================================================================
// Iterator
// =============================================================================

/// Records of a subcollection in document id order
///
/// Dropping the iterator closes its cursor.
pub struct SubcollectionIter {
    cursor: ServerCursor,
    assembler: RowAssembler,
    buffer: VecDeque<Row>,
    itersize: usize,
    failed: bool,
}

impl SubcollectionIter {
    fn next_row(&mut self) -> Result<Option<Row>> {
        if self.buffer.is_empty() && !self.cursor.is_exhausted() {
            self.buffer.extend(self.cursor.fetch(self.itersize)?);
        }
        Ok(self.buffer.pop_front())
    }

    /// Close the cursor before the last row
    pub fn close(mut self) -> Result<()> {
        self.buffer.clear();
        self.cursor.close()
    }
}

impl Iterator for SubcollectionIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_row() {
            Ok(Some(row)) => Some(self.assembler.assemble(&row)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
