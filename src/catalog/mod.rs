//! Catalog module
//!
//! This module contains the system catalog, schema definitions, and data types.

pub mod catalog;
pub mod schema;
pub mod types;

pub use catalog::{Catalog, Relation};
pub use schema::{Column, Schema, TableDef, ViewDef};
pub use types::DataType;
