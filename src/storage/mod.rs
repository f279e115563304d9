//! Storage module
//!
//! This module contains the in-memory row store:
//! - Values, tuples and row identifiers
//! - Slot-addressed tables
//! - The shared database of tables

pub mod database;
pub mod table;
pub mod tuple;

pub use database::Database;
pub use table::Table;
pub use tuple::{RowId, Tuple, Value};
