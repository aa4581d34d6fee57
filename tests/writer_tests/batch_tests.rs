//! Tests for BufferedTableInsert
//!
//! These tests verify:
//! - Flushing on the row count and on the estimated statement length
//! - The bind-parameter cap on rows per statement
//! - close() flushes the rest and reports the total
//! - Failed flushes are returned, earlier flushes stay counted

use std::cell::{Cell as Counter, RefCell};

use layerstore::query::{Sql, SqlParam};
use layerstore::writer::{BufferedTableInsert, Cell, InsertExecutor};
use layerstore::{LayerStoreError, Result};

// =============================================================================
// Helper Functions
// =============================================================================

/// Records every statement; fails from the `fail_from`-th call on
#[derive(Default)]
struct Recorder {
    statements: RefCell<Vec<Sql>>,
    calls: Counter<usize>,
    fail_from: Option<usize>,
}

impl InsertExecutor for Recorder {
    fn execute_insert(&self, sql: &Sql) -> Result<u64> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        if matches!(self.fail_from, Some(n) if call >= n) {
            return Err(LayerStoreError::InvalidArgument("insert rejected".into()));
        }
        self.statements.borrow_mut().push(sql.clone());
        Ok(sql.params().len() as u64)
    }
}

fn columns(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("c{}", i)).collect()
}

fn row(values: &[i64]) -> Vec<Cell> {
    values.iter().map(|v| Cell::Param(SqlParam::Int(*v))).collect()
}

// =============================================================================
// Flush Trigger Tests
// =============================================================================

#[test]
fn test_flush_on_buffer_size() {
    let recorder = Recorder::default();
    let mut writer = BufferedTableInsert::new(&recorder, "\"public\".\"t\"", columns(2), 3, usize::MAX);

    for i in 0..7 {
        writer.insert(row(&[i, i])).unwrap();
    }
    assert_eq!(recorder.statements.borrow().len(), 2);
    assert_eq!(writer.buffered_rows(), 1);
    assert_eq!(writer.rows_written(), 6);

    assert_eq!(writer.close().unwrap(), 7);
    assert_eq!(recorder.statements.borrow().len(), 3);
}

#[test]
fn test_statement_layout() {
    let recorder = Recorder::default();
    let mut writer = BufferedTableInsert::new(&recorder, "\"public\".\"t\"", columns(2), 10, usize::MAX);
    writer.insert(row(&[1, 2])).unwrap();
    writer
        .insert(vec![Cell::Default, Cell::Param(SqlParam::Null)])
        .unwrap();
    writer.close().unwrap();

    let statements = recorder.statements.borrow();
    assert_eq!(
        statements[0].render(),
        "INSERT INTO \"public\".\"t\" (\"c0\", \"c1\") VALUES ($1::bigint, $2::bigint), (DEFAULT, NULL)"
    );
    assert_eq!(statements[0].params().len(), 2);
}

#[test]
fn test_flush_on_query_length() {
    let recorder = Recorder::default();
    let mut writer = BufferedTableInsert::new(&recorder, "t", vec!["data".to_string()], 1_000, 200);

    for _ in 0..3 {
        writer
            .insert(vec![Cell::Param(SqlParam::Text("x".repeat(200)))])
            .unwrap();
    }
    // every row pushes the estimate past the limit on its own
    assert_eq!(recorder.statements.borrow().len(), 3);
    assert_eq!(writer.close().unwrap(), 3);
}

#[test]
fn test_bind_parameter_cap() {
    let recorder = Recorder::default();
    let writer = BufferedTableInsert::new(&recorder, "t", columns(1_000), 10_000, usize::MAX);

    assert_eq!(writer.max_rows(), 65);
}

#[test]
fn test_empty_close_writes_nothing() {
    let recorder = Recorder::default();
    let writer = BufferedTableInsert::new(&recorder, "t", columns(1), 10, usize::MAX);

    assert_eq!(writer.close().unwrap(), 0);
    assert_eq!(recorder.calls.get(), 0);
}

// =============================================================================
// Error Tests
// =============================================================================

#[test]
fn test_row_length_mismatch() {
    let recorder = Recorder::default();
    let mut writer = BufferedTableInsert::new(&recorder, "t", columns(2), 10, usize::MAX);

    assert!(matches!(
        writer.insert(row(&[1])),
        Err(LayerStoreError::InvalidArgument(_))
    ));
    assert_eq!(writer.buffered_rows(), 0);
}

#[test]
fn test_failed_flush_keeps_earlier_rows() {
    let recorder = Recorder {
        fail_from: Some(1),
        ..Recorder::default()
    };
    let mut writer = BufferedTableInsert::new(&recorder, "t", columns(1), 2, usize::MAX);

    writer.insert(row(&[1])).unwrap();
    writer.insert(row(&[2])).unwrap();
    writer.insert(row(&[3])).unwrap();
    assert!(writer.insert(row(&[4])).is_err());
    assert_eq!(writer.rows_written(), 2);

    writer.insert(row(&[5])).unwrap();
    assert!(writer.close().is_err());
    assert_eq!(recorder.statements.borrow().len(), 1);
}

#[test]
fn test_drop_flushes_buffer() {
    let recorder = Recorder::default();
    {
        let mut writer = BufferedTableInsert::new(&recorder, "t", columns(1), 10, usize::MAX);
        writer.insert(row(&[1])).unwrap();
    }

    assert_eq!(recorder.statements.borrow().len(), 1);
}
