//! Span sampling from one layer
//!
//! Every span should end up in the sample with probability `alpha`. A
//! document with `k` spans is drawn with probability `1 - (1 - alpha)^k`;
//! each span of a drawn document is then kept with probability
//! `alpha / (1 - (1 - alpha)^k)`. The product is `alpha` for every span,
//! whatever the size of its document.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::error::{LayerStoreError, Result};
use crate::model::LayerType;
use crate::query::{SelectedColumns, Sql, SqlParam};
use crate::subcollection::{Record, Subcollection, SubcollectionIter};

use super::{check_percentage, SampleAmount};

/// Used when the requested size covers the whole layer
const FULL_LAYER_ALPHA: f64 = 0.999_999_999;

/// Draw the spans to keep from a layer of `span_count` spans.
///
/// `None` means the document is not in the sample. Kept indexes are ascending.
pub fn thin_spans<R: Rng + ?Sized>(span_count: usize, alpha: f64, rng: &mut R) -> Option<Vec<usize>> {
    if span_count == 0 || alpha <= 0.0 {
        return None;
    }
    let document_threshold = 1.0 - (1.0 - alpha).powi(span_count as i32);
    if rng.gen::<f64>() > document_threshold {
        return None;
    }
    let span_threshold = alpha / document_threshold;
    Some((0..span_count).filter(|_| rng.gen::<f64>() <= span_threshold).collect())
}

/// Inclusion probability for `size` spans out of `total`
///
/// A size of `total` or more covers the whole layer.
pub(crate) fn size_alpha(size: u64, total: u64) -> f64 {
    if size < total {
        size as f64 / total as f64
    } else {
        FULL_LAYER_ALPHA
    }
}

/// Records whose sampled layer holds only the drawn spans
///
/// Documents with no drawn span are skipped.
pub struct LayerSampleIter {
    inner: SubcollectionIter,
    layer: String,
    alpha: f64,
    rng: StdRng,
}

impl LayerSampleIter {
    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl Iterator for LayerSampleIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut record = match self.inner.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };
            let layer = match record.document.layer_mut(&self.layer) {
                Some(layer) => layer,
                None => continue,
            };
            match thin_spans(layer.len(), self.alpha, &mut self.rng) {
                Some(keep) if !keep.is_empty() => {
                    layer.retain_spans(&keep);
                    return Some(Ok(record));
                }
                _ => continue,
            }
        }
    }
}

impl Subcollection {
    /// Iterate over documents with a random subset of the spans of `layer`.
    ///
    /// For a `Size` amount the layer is measured first; asking for more
    /// spans than the layer has, or exactly as many, yields (almost) the full
    /// layer.
    pub fn sample_from_layer(&mut self, layer: &str, amount: SampleAmount, seed: Option<u64>) -> Result<LayerSampleIter> {
        if !self.plan.layers().iter().any(|l| l == layer) {
            return Err(LayerStoreError::InvalidArgument(format!(
                "layer {:?} is not selected by the subcollection",
                layer
            )));
        }

        let alpha = match amount {
            SampleAmount::Percentage(percentage) => check_percentage(percentage)? / 100.0,
            SampleAmount::Size(size) => {
                let total = self.layer_size(layer)?;
                if total == 0 {
                    return Err(LayerStoreError::InvalidArgument(format!(
                        "layer {:?} is empty, nothing to sample",
                        layer
                    )));
                }
                let alpha = size_alpha(size, total);
                if alpha == FULL_LAYER_ALPHA {
                    warn!(layer = layer, requested = size, available = total, "sample size covers the layer, yielding the full layer");
                }
                alpha
            }
        };
        self.guard
            .check("sample_from_layer", format!("{} {}", layer, alpha), seed.is_some())?;

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        debug!(collection = self.collection.name(), layer = layer, alpha = alpha, "sampling spans");
        Ok(LayerSampleIter {
            inner: self.iter()?,
            layer: layer.to_string(),
            alpha,
            rng,
        })
    }

    /// Total number of spans of a selected layer over the subcollection
    fn layer_size(&self, layer: &str) -> Result<u64> {
        let (context, resolved) = self.resolve()?;
        let sql = layer_size_sql(&resolved.sql, layer, context.structure().layer_type(layer)?);
        let row = self.collection.storage().query_one(&sql)?;
        let size: i64 = row.try_get(0)?;
        Ok(size as u64)
    }
}

pub(crate) fn layer_size_sql(subcollection: &Sql, layer: &str, layer_type: LayerType) -> Sql {
    let mut sql = Sql::raw("SELECT COALESCE(SUM(");
    if layer_type == LayerType::Attached {
        sql.push_str(
            "(SELECT jsonb_array_length(l->'spans') FROM jsonb_array_elements(a.\"data\"->'layers') AS l \
             WHERE l->>'name' = ",
        )
        .push_param(SqlParam::Text(layer.to_string()))
        .push_str(")");
    } else {
        sql.push_str(&format!(
            "jsonb_array_length(a.{}->'spans')",
            SelectedColumns::layer_data_alias(layer)
        ));
    }
    sql.push_str("), 0)::bigint FROM (")
        .push_sql(subcollection)
        .push_str(") AS a");
    sql
}
