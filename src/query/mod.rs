//! Query module
//!
//! Query templates (parsed with `nom`) and the query engine boundary the
//! cursor engine and the DML path read rows through.

pub mod engine;
pub mod template;

pub use engine::{MemoryQueryEngine, QueryEngine, RowStream, StreamRow};
pub use template::{Bindings, Predicate, QueryTemplate, RowContext, SourceColumn};
