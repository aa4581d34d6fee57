//! Buffered multi-row insert
//!
//! Rows accumulate in memory and are written with one `INSERT ... VALUES
//! (..), (..)` statement, committed on its own, whenever either trigger fires:
//!
//! ```text
//! rows >= min(buffer_size, 65535 / columns)     (bind parameter limit)
//! estimated statement length >= query_length_limit
//! ```
//!
//! plus once more on `close`. A failed flush is logged with the buffered row
//! count and estimated length and returned; rows from earlier flushes stay
//! committed.

use tracing::{debug, error, warn};

use crate::error::{LayerStoreError, Result};
use crate::query::{quote_ident, Sql, SqlParam};

/// Max bind parameters in one statement (wire protocol limit)
const MAX_BIND_PARAMS: usize = 65_535;

/// Executes one insert statement and commits it
pub trait InsertExecutor {
    fn execute_insert(&self, sql: &Sql) -> Result<u64>;
}

impl<E: InsertExecutor + ?Sized> InsertExecutor for &E {
    fn execute_insert(&self, sql: &Sql) -> Result<u64> {
        (**self).execute_insert(sql)
    }
}

/// One value of a buffered row
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Param(SqlParam),
    /// The column's default (`DEFAULT` keyword)
    Default,
}

impl Cell {
    fn estimated_len(&self) -> usize {
        match self {
            Cell::Param(param) => param.estimated_len() + param.cast().len() + 4,
            Cell::Default => 7,
        }
    }

    fn push_to(&self, sql: &mut Sql) {
        match self {
            Cell::Param(param) => {
                sql.push_param(param.clone());
            }
            Cell::Default => {
                sql.push_str("DEFAULT");
            }
        }
    }
}

impl From<SqlParam> for Cell {
    fn from(param: SqlParam) -> Self {
        Cell::Param(param)
    }
}

/// Buffered insert into one table
pub struct BufferedTableInsert<E: InsertExecutor> {
    executor: E,
    table: String,
    columns: Vec<String>,
    buffer: Vec<Vec<Cell>>,
    max_rows: usize,
    query_length_limit: usize,
    header_len: usize,
    estimated_len: usize,
    rows_written: u64,
    closed: bool,
}

impl<E: InsertExecutor> BufferedTableInsert<E> {
    /// `table` is an already qualified and quoted table name
    pub fn new(
        executor: E,
        table: impl Into<String>,
        columns: Vec<String>,
        buffer_size: usize,
        query_length_limit: usize,
    ) -> Self {
        let table = table.into();
        let max_rows = buffer_size
            .min(MAX_BIND_PARAMS / columns.len().max(1))
            .max(1);
        let mut writer = Self {
            executor,
            table,
            columns,
            buffer: Vec::with_capacity(max_rows.min(1024)),
            max_rows,
            query_length_limit,
            header_len: 0,
            estimated_len: 0,
            rows_written: 0,
            closed: false,
        };
        writer.header_len = writer.header().text().len();
        writer.estimated_len = writer.header_len;
        writer
    }

    fn header(&self) -> Sql {
        let columns: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        Sql::raw(format!(
            "INSERT INTO {} ({}) VALUES ",
            self.table,
            columns.join(", ")
        ))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows per flush after the bind-parameter cap
    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    pub fn buffered_rows(&self) -> usize {
        self.buffer.len()
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Buffer a row, flushing if a trigger fires
    pub fn insert(&mut self, row: Vec<Cell>) -> Result<()> {
        if self.closed {
            return Err(LayerStoreError::InvalidArgument(format!(
                "insert into {} after close",
                self.table
            )));
        }
        if row.len() != self.columns.len() {
            return Err(LayerStoreError::InvalidArgument(format!(
                "row has {} values, {} has {} columns",
                row.len(),
                self.table,
                self.columns.len()
            )));
        }

        self.estimated_len += row.iter().map(Cell::estimated_len).sum::<usize>() + 4;
        self.buffer.push(row);

        if self.buffer.len() >= self.max_rows || self.estimated_len >= self.query_length_limit {
            self.flush()?;
        }
        Ok(())
    }

    /// Write buffered rows
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let rows = std::mem::take(&mut self.buffer);
        let estimated_len = std::mem::replace(&mut self.estimated_len, self.header_len);

        let mut sql = self.header();
        let values = rows.iter().map(|row| {
            let mut tuple = Sql::raw("(");
            for (i, cell) in row.iter().enumerate() {
                if i > 0 {
                    tuple.push_str(", ");
                }
                cell.push_to(&mut tuple);
            }
            tuple.push_str(")");
            tuple
        });
        sql.push_sql(&Sql::join(values, ", "));

        match self.executor.execute_insert(&sql) {
            Ok(_) => {
                self.rows_written += rows.len() as u64;
                debug!(table = %self.table, rows = rows.len(), estimated_len, "flushed");
                Ok(())
            }
            Err(e) => {
                error!(
                    table = %self.table,
                    rows = rows.len(),
                    estimated_len,
                    error = %e,
                    "flush failed"
                );
                Err(e)
            }
        }
    }

    /// Flush what is left; returns the total number of rows written
    pub fn close(mut self) -> Result<u64> {
        self.closed = true;
        self.flush()?;
        Ok(self.rows_written)
    }
}

impl<E: InsertExecutor> Drop for BufferedTableInsert<E> {
    fn drop(&mut self) {
        if self.closed || self.buffer.is_empty() {
            return;
        }
        warn!(table = %self.table, rows = self.buffer.len(), "insert buffer dropped without close, flushing");
        // errors are already logged by flush
        let _ = self.flush();
    }
}
