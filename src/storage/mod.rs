//! Storage layer
//!
//! The storage manager owns the PostgreSQL connection and the collections
//! registry; `naming` fixes the table naming convention and `ops` holds the
//! DDL shared with collections.

mod manager;
pub mod naming;
pub(crate) mod ops;

pub use manager::{CollectionOptions, Storage};
