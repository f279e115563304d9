//! Package module
//!
//! Package definitions, per-session package instances and the manager that
//! creates them on first reference.

pub mod definition;
pub mod instance;
pub mod manager;

pub use definition::{InitRoutine, PackageDefinition, VarDecl};
pub use instance::{PackageInstance, StateBlock};
pub use manager::PackageInstanceManager;
