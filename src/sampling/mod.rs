//! Random subsets and orderings of a subcollection
//!
//! ## Modes
//! - `sample`: documents, drawn by `TABLESAMPLE` on the server
//! - `sample_from_layer`: spans of one layer, thinned on the client
//! - `permutate`: every document in random order
//!
//! A draw without a seed cannot be repeated: running the same unseeded draw
//! twice on one subcollection fails with `NonReproducibleReiteration`.

mod document;
mod guard;
mod layer;
mod permutation;

pub use document::{SampleConstruction, SampleOptions, SamplingMethod};
pub use layer::{thin_spans, LayerSampleIter};

pub(crate) use guard::ReiterationGuard;

use crate::error::{LayerStoreError, Result};

/// How much to sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleAmount {
    /// Percentage in `[0, 100]`
    Percentage(f64),
    /// Approximate number of documents (or spans)
    Size(u64),
}

pub(crate) fn check_percentage(percentage: f64) -> Result<f64> {
    if !(0.0..=100.0).contains(&percentage) {
        return Err(LayerStoreError::InvalidArgument(format!(
            "invalid percentage {}: expected a value in [0, 100]",
            percentage
        )));
    }
    Ok(percentage)
}
