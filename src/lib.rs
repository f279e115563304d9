//! ArcProc - a session-scoped procedural runtime written in Rust
//!
//! This library provides the runtime pieces behind stored procedural code:
//! - Package instances with per-session state
//! - Explicit cursors with FOR UPDATE row locking and `WHERE CURRENT OF`
//! - Simple and compound DML triggers with statement-level rollback
//! - An in-memory row store, query engine and row lock manager
//! - A JSON line protocol TCP server

pub mod catalog;
pub mod config;
pub mod cursor;
pub mod error;
pub mod package;
pub mod query;
pub mod server;
pub mod session;
pub mod storage;
pub mod transaction;
pub mod trigger;

pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use session::{Assignments, Runtime, Selection, Session};
