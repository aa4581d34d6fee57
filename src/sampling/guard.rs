use std::collections::HashMap;

use crate::error::{LayerStoreError, Result};

/// Rejects a second unseeded run of the same random draw
///
/// One slot per sampling mode holds the parameters of the last run and
/// whether it was seeded.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReiterationGuard {
    last: HashMap<&'static str, (String, bool)>,
}

impl ReiterationGuard {
    pub(crate) fn check(&mut self, mode: &'static str, params: String, seeded: bool) -> Result<()> {
        if !seeded {
            if let Some((last_params, false)) = self.last.get(mode) {
                if *last_params == params {
                    return Err(LayerStoreError::NonReproducibleReiteration(format!(
                        "{} ({}) was already drawn without a seed; pass a seed to repeat it",
                        mode, params
                    )));
                }
            }
        }
        self.last.insert(mode, (params, seeded));
        Ok(())
    }
}
