//! Batched writes

mod batch;

pub use batch::{BufferedTableInsert, Cell, InsertExecutor};
