use tracing::debug;

use crate::error::{LayerStoreError, Result};
use crate::query::{Sql, SqlParam};
use crate::subcollection::{Subcollection, SubcollectionIter};

/// `ORDER BY random()`, after `setseed` when a seed is given
pub(crate) fn permutation_sql(subcollection: &Sql, seed: Option<f64>) -> Sql {
    let mut sql = Sql::raw("SELECT subcollection.* FROM ");
    if let Some(seed) = seed {
        sql.push_str("(SELECT setseed(")
            .push_param(SqlParam::Float(seed))
            .push_str(")) AS setting_seed, ");
    }
    sql.push_str("(")
        .push_sql(subcollection)
        .push_str(") AS subcollection ORDER BY random()");
    sql
}

impl Subcollection {
    /// Iterate over every document in random order.
    ///
    /// `seed` must lie in `[-1, 1]`.
    pub fn permutate(&mut self, seed: Option<f64>) -> Result<SubcollectionIter> {
        if let Some(seed) = seed {
            if !(-1.0..=1.0).contains(&seed) {
                return Err(LayerStoreError::InvalidArgument(format!(
                    "invalid seed {}: expected a value in [-1, 1]",
                    seed
                )));
            }
        }
        self.guard.check("permutate", String::new(), seed.is_some())?;

        let (context, resolved) = self.resolve()?;
        let sql = permutation_sql(&resolved.sql, seed);
        debug!(collection = self.collection.name(), seeded = seed.is_some(), "permutating");
        self.open_iter(context, &resolved, &sql)
    }
}
