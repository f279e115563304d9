//! Transaction Manager
//!
//! Handles transaction lifecycle (Begin, Commit, Rollback) and the undo log
//! that statement savepoints roll back to.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use tracing::{info, warn};

use super::lock::{RowLockCoordinator, SessionId};
use crate::error::{Error, Result};
use crate::storage::{Database, RowId, Tuple};

/// Transaction State
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

/// Inverse of one row change
#[derive(Debug, Clone, PartialEq)]
pub enum UndoRecord {
    Insert(RowId),
    Update { row_id: RowId, before: Tuple },
    Delete { row_id: RowId, before: Tuple },
}

impl UndoRecord {
    fn row_id(&self) -> &RowId {
        match self {
            UndoRecord::Insert(row_id) => row_id,
            UndoRecord::Update { row_id, .. } | UndoRecord::Delete { row_id, .. } => row_id,
        }
    }

    fn apply(&self, db: &Database) -> Result<()> {
        match self {
            UndoRecord::Insert(row_id) => db.delete(row_id).map(|_| ()),
            UndoRecord::Update { row_id, before } => db.update(row_id, before.clone()).map(|_| ()),
            UndoRecord::Delete { row_id, before } => db.restore(row_id, before.clone()),
        }
    }
}

/// Position in a transaction's undo log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(usize);

/// Transaction Context
#[derive(Debug)]
pub struct Transaction {
    pub id: u64,
    pub state: TransactionState,
    undo: Vec<UndoRecord>,
    named: Vec<(String, Savepoint)>,
}

impl Transaction {
    fn new(id: u64) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            undo: Vec::new(),
            named: Vec::new(),
        }
    }

    pub fn record(&mut self, record: UndoRecord) {
        self.undo.push(record);
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint(self.undo.len())
    }

    /// Establish a named savepoint; reusing a name moves it
    pub fn set_named(&mut self, name: &str) {
        self.named.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.named.push((name.to_string(), self.savepoint()));
    }

    pub fn named(&self, name: &str) -> Result<Savepoint> {
        self.named
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, sp)| *sp)
            .ok_or_else(|| Error::UnknownSavepoint(name.to_string()))
    }

    /// Undo every change recorded after the savepoint, newest first
    pub fn rollback_to(&mut self, savepoint: Savepoint, db: &Database) -> Result<usize> {
        let mut first_error = None;
        let mut undone = 0;
        while self.undo.len() > savepoint.0 {
            let Some(record) = self.undo.pop() else {
                break;
            };
            if let Err(e) = record.apply(db) {
                warn!(txn = self.id, row = %record.row_id(), error = %e, "undo failed");
                first_error.get_or_insert(e);
            }
            undone += 1;
        }
        self.named.retain(|(_, sp)| sp.0 <= savepoint.0);
        match first_error {
            Some(e) => Err(e),
            None => Ok(undone),
        }
    }

    /// Whether this transaction changed the row
    pub fn has_modified(&self, row: &RowId) -> bool {
        self.undo.iter().any(|r| r.row_id() == row)
    }

    pub fn change_count(&self) -> usize {
        self.undo.len()
    }
}

/// Transaction Manager
#[derive(Debug)]
pub struct TransactionManager {
    /// Active transactions and the session running each
    active: RwLock<HashMap<u64, SessionId>>,
    /// Next Transaction ID
    next_trans_id: Mutex<u64>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            next_trans_id: Mutex::new(1),
        }
    }

    /// Begin a new transaction
    pub fn begin(&self, session: SessionId) -> Transaction {
        let mut trans_id_guard = self.next_trans_id.lock().unwrap();
        let trans_id = *trans_id_guard;
        *trans_id_guard += 1;

        self.active.write().unwrap().insert(trans_id, session);
        Transaction::new(trans_id)
    }

    /// Commit a transaction and release its session's row locks
    pub fn commit(
        &self,
        txn: &mut Transaction,
        session: SessionId,
        locks: &dyn RowLockCoordinator,
    ) -> Result<()> {
        self.finish(txn, TransactionState::Committed)?;
        locks.release_all(session);
        info!(txn = txn.id, session, changes = txn.undo.len(), "transaction committed");
        txn.undo.clear();
        txn.named.clear();
        Ok(())
    }

    /// Undo every change of a transaction and release its session's row locks
    pub fn rollback(
        &self,
        txn: &mut Transaction,
        session: SessionId,
        db: &Database,
        locks: &dyn RowLockCoordinator,
    ) -> Result<()> {
        self.finish(txn, TransactionState::Aborted)?;
        let undone = txn.rollback_to(Savepoint(0), db);
        locks.release_all(session);
        info!(txn = txn.id, session, "transaction rolled back");
        undone.map(|_| ())
    }

    fn finish(&self, txn: &mut Transaction, state: TransactionState) -> Result<()> {
        if txn.state != TransactionState::Active {
            return Err(Error::Internal(format!("transaction {} not active", txn.id)));
        }
        self.active.write().unwrap().remove(&txn.id);
        txn.state = state;
        Ok(())
    }

    /// Check if transaction is active
    pub fn is_active(&self, trans_id: u64) -> bool {
        self.active.read().unwrap().contains_key(&trans_id)
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
