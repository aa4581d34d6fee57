//! Holdable server-side cursor
//!
//! `DECLARE .. NO SCROLL CURSOR WITH HOLD` keeps the cursor valid across
//! transaction boundaries, so rows can be fetched while the same connection
//! commits inserts in between. The cursor is closed on drop.
//!
//! A held cursor is materialized when declared, so dropping the collection
//! afterwards would not break it. Before every fetch the registry is asked
//! whether the collection is still registered; if not the fetch fails with
//! `CollectionGone` instead of returning a silently truncated result.

use postgres::Row;
use tracing::{debug, warn};

use crate::error::{LayerStoreError, Result};
use crate::query::{quote_ident, Sql};
use crate::storage::Storage;

pub(crate) struct ServerCursor {
    storage: Storage,
    collection: String,
    name: String,
    open: bool,
    exhausted: bool,
}

impl ServerCursor {
    /// Declare a cursor over `sql`
    pub(crate) fn declare(storage: &Storage, collection: &str, sql: &Sql) -> Result<Self> {
        if !storage.is_registered(collection)? {
            return Err(LayerStoreError::CollectionGone(collection.to_string()));
        }

        let name = storage.next_cursor_name();
        let statement = format!(
            "DECLARE {} NO SCROLL CURSOR WITH HOLD FOR {}",
            quote_ident(&name),
            sql.render()
        );
        debug!(cursor = %name, sql = %statement, "declaring cursor");

        storage
            .with_client(|client| Ok(client.execute(statement.as_str(), &sql.bind_params())?))
            .map_err(|e| gone_if_undefined(e, collection))?;

        Ok(Self {
            storage: storage.clone(),
            collection: collection.to_string(),
            name,
            open: true,
            exhausted: false,
        })
    }

    /// Fetch up to `n` rows; an empty batch means the cursor is exhausted
    pub(crate) fn fetch(&mut self, n: usize) -> Result<Vec<Row>> {
        if !self.open || self.exhausted {
            return Ok(Vec::new());
        }
        if !self.storage.is_registered(&self.collection)? {
            self.close_quietly();
            return Err(LayerStoreError::CollectionGone(self.collection.clone()));
        }

        let statement = format!("FETCH FORWARD {} FROM {}", n.max(1), quote_ident(&self.name));
        let rows = self
            .storage
            .with_client(|client| Ok(client.query(statement.as_str(), &[])?))
            .map_err(|e| gone_if_undefined(e, &self.collection))?;

        debug!(cursor = %self.name, rows = rows.len(), "fetched batch");
        if rows.len() < n.max(1) {
            self.exhausted = true;
        }
        Ok(rows)
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let statement = format!("CLOSE {}", quote_ident(&self.name));
        debug!(cursor = %self.name, "closing cursor");
        self.storage.with_client(|client| {
            client.batch_execute(&statement)?;
            Ok(())
        })
    }

    fn close_quietly(&mut self) {
        if let Err(e) = self.close() {
            warn!(cursor = %self.name, error = %e, "failed to close cursor");
        }
    }
}

impl Drop for ServerCursor {
    fn drop(&mut self) {
        if self.open && !self.storage.is_closed() {
            self.close_quietly();
        }
    }
}

fn gone_if_undefined(error: LayerStoreError, collection: &str) -> LayerStoreError {
    match &error {
        LayerStoreError::Database(e) if LayerStoreError::is_undefined_table(e) => {
            LayerStoreError::CollectionGone(collection.to_string())
        }
        _ => error,
    }
}
