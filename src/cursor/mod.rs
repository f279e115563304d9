//! Cursor module
//!
//! Cursor definitions, per-session cursor handles and the engine that opens,
//! fetches from and closes them.

pub mod definition;
pub mod engine;
pub mod handle;

pub use definition::{CursorDefinition, CursorDefinitionBuilder, CursorParam, LockMode};
pub use engine::{CursorEngine, LockAcquisition};
pub use handle::{CursorAttributes, CursorHandle, CursorId, CursorRow, CursorState};
