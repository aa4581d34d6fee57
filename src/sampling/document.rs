//! Document sampling with `TABLESAMPLE`
//!
//! ```text
//! SELECT subcollection.* FROM (<subcollection>) AS subcollection
//!   JOIN (SELECT "id" FROM c TABLESAMPLE BERNOULLI (p) [REPEATABLE (seed)]) AS sample_selection
//!   ON subcollection."id" = sample_selection."id"
//! ORDER BY subcollection."id"
//! ```

use tracing::debug;

use crate::error::{LayerStoreError, Result};
use crate::query::{Sql, SqlParam};
use crate::subcollection::{Subcollection, SubcollectionIter};

use super::{check_percentage, SampleAmount};

/// Server-side sampling primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingMethod {
    /// Whole pages; fast, clustered
    System,
    /// Every row independently
    #[default]
    Bernoulli,
}

impl SamplingMethod {
    fn as_sql(&self) -> &'static str {
        match self {
            SamplingMethod::System => "SYSTEM",
            SamplingMethod::Bernoulli => "BERNOULLI",
        }
    }
}

/// How the sampled ids restrict the subcollection query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleConstruction {
    #[default]
    Join,
    /// `id = ANY (<sample>)`
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleOptions {
    /// Passed to `REPEATABLE`
    pub seed: Option<f64>,
    pub method: SamplingMethod,
    pub construction: SampleConstruction,
}

impl SampleOptions {
    pub fn seed(mut self, seed: f64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn method(mut self, method: SamplingMethod) -> Self {
        self.method = method;
        self
    }

    pub fn construction(mut self, construction: SampleConstruction) -> Self {
        self.construction = construction;
        self
    }
}

/// Wrap a subcollection query with a `TABLESAMPLE` id draw
pub(crate) fn sample_sql(subcollection: &Sql, collection_table: &str, percentage: f64, options: &SampleOptions) -> Sql {
    let mut draw = Sql::raw(format!(
        "SELECT \"id\" FROM {} TABLESAMPLE {} (",
        collection_table,
        options.method.as_sql()
    ));
    draw.push_param(SqlParam::Float(percentage)).push_str(")");
    if let Some(seed) = options.seed {
        draw.push_str(" REPEATABLE (").push_param(SqlParam::Float(seed)).push_str(")");
    }

    let mut sql = Sql::raw("SELECT subcollection.* FROM (");
    sql.push_sql(subcollection).push_str(") AS subcollection");
    match options.construction {
        SampleConstruction::Join => {
            sql.push_str(" JOIN (")
                .push_sql(&draw)
                .push_str(") AS sample_selection ON subcollection.\"id\" = sample_selection.\"id\"");
        }
        SampleConstruction::Any => {
            sql.push_str(" WHERE subcollection.\"id\" = ANY (")
                .push_sql(&draw)
                .push_str(")");
        }
    }
    sql.push_str(" ORDER BY subcollection.\"id\"");
    sql
}

impl Subcollection {
    /// Iterate over a random sample of documents, in id order.
    ///
    /// A `Size` amount is turned into a percentage of the subcollection size,
    /// so the number of returned documents is approximate.
    pub fn sample(&mut self, amount: SampleAmount, options: SampleOptions) -> Result<SubcollectionIter> {
        let percentage = match amount {
            SampleAmount::Percentage(percentage) => check_percentage(percentage)?,
            SampleAmount::Size(size) => {
                let available = self.len()?;
                if available == 0 || size > available {
                    return Err(LayerStoreError::ExceedsCollectionSize {
                        requested: size,
                        available,
                    });
                }
                size as f64 * 100.0 / available as f64
            }
        };
        self.guard.check(
            "sample",
            format!("{} {}", options.method.as_sql(), percentage),
            options.seed.is_some(),
        )?;

        let (context, resolved) = self.resolve()?;
        let sql = sample_sql(&resolved.sql, &context.collection_table(), percentage, &options);
        debug!(collection = self.collection.name(), percentage = percentage, "sampling documents");
        self.open_iter(context, &resolved, &sql)
    }
}
