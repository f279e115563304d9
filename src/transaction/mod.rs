//! Transaction module
//!
//! Transactions with undo logs and savepoints, and the row lock coordinator.

pub mod lock;
pub mod transaction;

pub use lock::{LockManager, LockOutcome, RowLockCoordinator, SessionId, WaitPolicy};
pub use transaction::{Savepoint, Transaction, TransactionManager, TransactionState, UndoRecord};
