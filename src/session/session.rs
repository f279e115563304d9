//! Database session
//!
//! A [`Session`] is one connection's view of the runtime. It owns the
//! session's transaction, its cursors and its mutating-table stack, and it
//! reaches the session's package instances through the shared manager.
//! Sessions are not shared between threads; each thread or connection works
//! with its own.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use super::runtime::Runtime;
use crate::cursor::{CursorAttributes, CursorDefinition, CursorEngine, CursorId, CursorRow};
use crate::error::{Error, Result};
use crate::package::PackageInstance;
use crate::query::{Bindings, Predicate, QueryTemplate};
use crate::storage::{RowId, Tuple, Value};
use crate::transaction::{SessionId, Transaction};
use crate::trigger::dispatcher::{self, DmlStatement, MutatingFrame};

/// `SET` clause of an UPDATE, column name to new value
pub type Assignments = IndexMap<String, Value>;

/// Rows an UPDATE or DELETE applies to
#[derive(Debug, Clone)]
pub enum Selection {
    All,
    Where { predicate: Predicate, binds: Bindings },
    /// The row last fetched by a cursor (`WHERE CURRENT OF`)
    CurrentOf(CursorId),
}

impl Selection {
    /// Rows matching a filter such as `"deptno = 10 AND sal > 1000"`
    pub fn filter(text: &str) -> Result<Self> {
        Ok(Selection::Where {
            predicate: Predicate::parse(text)?,
            binds: Bindings::new(),
        })
    }

    /// Rows matching a filter with `:name` bind parameters
    pub fn filter_with(text: &str, binds: &[(&str, Value)]) -> Result<Self> {
        Ok(Selection::Where {
            predicate: Predicate::parse(text)?,
            binds: normalize(binds),
        })
    }
}

fn normalize(binds: &[(&str, Value)]) -> Bindings {
    binds
        .iter()
        .map(|(name, value)| (name.to_lowercase(), value.clone()))
        .collect()
}

pub struct Session {
    pub(crate) id: SessionId,
    principal: String,
    pub(crate) runtime: Runtime,
    pub(crate) txn: Transaction,
    pub(crate) cursors: CursorEngine,
    package_cursors: HashMap<(String, String), CursorId>,
    pub(crate) frames: Vec<MutatingFrame>,
    /// Row locks taken by DML since the transaction began, in order
    pub(crate) statement_locks: Vec<RowId>,
    closed: bool,
}

impl Session {
    pub(crate) fn new(id: SessionId, principal: String, runtime: Runtime) -> Self {
        let config = runtime.config();
        let cursors = CursorEngine::new(
            id,
            runtime.query_engine().clone(),
            runtime.locks().clone(),
            config.lock_wait,
            config.lock_acquisition,
        );
        let txn = runtime.transactions().begin(id);
        info!(session = id, principal = %principal, "session opened");
        Self {
            id,
            principal,
            txn,
            cursors,
            package_cursors: HashMap::new(),
            frames: Vec::new(),
            statement_locks: Vec::new(),
            closed: false,
            runtime,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn transaction(&self) -> &Transaction {
        &self.txn
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed(self.id));
        }
        Ok(())
    }

    /// Transaction control is refused while a statement's handlers run
    fn ensure_no_statement(&self, action: &'static str) -> Result<()> {
        if !self.frames.is_empty() {
            return Err(Error::TransactionControlInTrigger(action));
        }
        Ok(())
    }

    // ========== DML ==========

    /// Insert rows given positionally in column order
    pub fn insert(&mut self, relation: &str, rows: Vec<Tuple>) -> Result<usize> {
        self.ensure_open()?;
        dispatcher::execute(
            self,
            DmlStatement::Insert {
                relation: relation.to_string(),
                rows,
            },
        )
    }

    pub fn insert_row(&mut self, relation: &str, values: Vec<Value>) -> Result<usize> {
        self.insert(relation, vec![Tuple::new(values)])
    }

    pub fn update(&mut self, relation: &str, set: Assignments, selection: Selection) -> Result<usize> {
        self.ensure_open()?;
        dispatcher::execute(
            self,
            DmlStatement::Update {
                relation: relation.to_string(),
                set,
                selection,
            },
        )
    }

    pub fn delete(&mut self, relation: &str, selection: Selection) -> Result<usize> {
        self.ensure_open()?;
        dispatcher::execute(
            self,
            DmlStatement::Delete {
                relation: relation.to_string(),
                selection,
            },
        )
    }

    /// `UPDATE ... WHERE CURRENT OF cursor`
    pub fn update_current(&mut self, cursor: CursorId, set: Assignments) -> Result<usize> {
        self.ensure_open()?;
        let table = self.cursors.target_table(cursor)?;
        self.update(&table, set, Selection::CurrentOf(cursor))
    }

    /// `DELETE ... WHERE CURRENT OF cursor`
    pub fn delete_current(&mut self, cursor: CursorId) -> Result<usize> {
        self.ensure_open()?;
        let table = self.cursors.target_table(cursor)?;
        self.delete(&table, Selection::CurrentOf(cursor))
    }

    /// Single-row query (`SELECT ... INTO`)
    pub fn select_into(&mut self, query: &str, binds: &[(&str, Value)]) -> Result<CursorRow> {
        self.ensure_open()?;
        let template = QueryTemplate::parse(query)?;
        let mut stream = self
            .runtime
            .query_engine()
            .execute(&template, &normalize(binds))?;
        let columns = Arc::new(stream.columns().to_vec());

        let mut first = None;
        let mut count = 0;
        while let Some(row) = stream.next_row()? {
            count += 1;
            if first.is_none() {
                first = Some(row);
            }
        }
        match (first, count) {
            (None, _) => Err(Error::NoDataFound),
            (Some(row), 1) => Ok(CursorRow::new(row.row_id, columns, row.values)),
            (Some(_), n) => Err(Error::TooManyRows(n)),
        }
    }

    // ========== Cursors ==========

    pub fn declare_cursor(&mut self, definition: CursorDefinition) -> Result<CursorId> {
        self.ensure_open()?;
        Ok(self.cursors.declare(Arc::new(definition)))
    }

    pub fn open(&mut self, cursor: CursorId, args: &[Value]) -> Result<()> {
        self.ensure_open()?;
        self.cursors.open(cursor, args)
    }

    pub fn fetch(&mut self, cursor: CursorId) -> Result<Option<CursorRow>> {
        self.ensure_open()?;
        self.cursors.fetch(cursor)
    }

    pub fn fetch_batch(&mut self, cursor: CursorId, limit: usize) -> Result<Vec<CursorRow>> {
        self.ensure_open()?;
        self.cursors.fetch_batch(cursor, limit)
    }

    pub fn close_cursor(&mut self, cursor: CursorId) -> Result<()> {
        self.ensure_open()?;
        self.cursors.close(cursor, &self.txn)
    }

    /// Close a cursor if needed and discard its handle
    pub fn release_cursor(&mut self, cursor: CursorId) -> Result<()> {
        self.ensure_open()?;
        self.cursors.release(cursor, &self.txn)
    }

    pub fn cursor_attributes(&self, cursor: CursorId) -> Result<CursorAttributes> {
        self.ensure_open()?;
        self.cursors.attributes(cursor)
    }

    // ========== Packages ==========

    /// The session's instance of a package, initialized on first reference
    pub fn package(&mut self, name: &str) -> Result<Arc<PackageInstance>> {
        self.ensure_open()?;
        let definition = self.runtime.catalog().get_package(name)?;
        self.runtime.packages().get_or_create(&definition, self.id)
    }

    pub fn get_var(&mut self, package: &str, variable: &str) -> Result<Value> {
        self.package(package)?.get(variable)
    }

    pub fn set_var(&mut self, package: &str, variable: &str, value: impl Into<Value>) -> Result<()> {
        self.package(package)?.set(variable, value)
    }

    /// Handle for a cursor declared in a package. Its open/closed state
    /// persists across calls for the life of the package instance.
    pub fn package_cursor(&mut self, package: &str, cursor: &str) -> Result<CursorId> {
        let instance = self.package(package)?;
        let key = (package.to_lowercase(), cursor.to_lowercase());
        if let Some(id) = self.package_cursors.get(&key) {
            return Ok(*id);
        }
        let definition = instance
            .definition()
            .get_cursor(cursor)
            .cloned()
            .ok_or_else(|| Error::PackageCursorNotFound(cursor.to_string(), package.to_string()))?;
        let id = self.cursors.declare(definition);
        self.package_cursors.insert(key, id);
        Ok(id)
    }

    /// Discard the session's instance of a package; the next reference
    /// initializes a fresh one
    pub fn reset_package(&mut self, package: &str) -> Result<()> {
        self.ensure_open()?;
        let owner = package.to_lowercase();
        let ids: Vec<CursorId> = self
            .package_cursors
            .iter()
            .filter(|((p, _), _)| *p == owner)
            .map(|(_, id)| *id)
            .collect();
        for id in ids {
            self.cursors.release(id, &self.txn)?;
        }
        self.package_cursors.retain(|(p, _), _| *p != owner);
        self.runtime.packages().reset(package, self.id);
        Ok(())
    }

    // ========== Transactions ==========

    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.ensure_no_statement("commit")?;
        let transactions = self.runtime.transactions().clone();
        transactions.commit(&mut self.txn, self.id, self.runtime.locks().as_ref())?;
        self.cursors.forget_locks();
        self.statement_locks.clear();
        self.txn = transactions.begin(self.id);
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.ensure_no_statement("roll back")?;
        self.end_with_rollback(true)
    }

    pub fn savepoint(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.ensure_no_statement("establish a savepoint")?;
        self.txn.set_named(name);
        debug!(session = self.id, savepoint = name, "savepoint established");
        Ok(())
    }

    /// Undo changes made after a named savepoint; row locks stay held
    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.ensure_no_statement("roll back to a savepoint")?;
        let savepoint = self.txn.named(name)?;
        let undone = self.txn.rollback_to(savepoint, self.runtime.database())?;
        debug!(session = self.id, savepoint = name, undone, "rolled back to savepoint");
        Ok(())
    }

    fn end_with_rollback(&mut self, restart: bool) -> Result<()> {
        let transactions = self.runtime.transactions().clone();
        let result = transactions.rollback(
            &mut self.txn,
            self.id,
            self.runtime.database(),
            self.runtime.locks().as_ref(),
        );
        self.cursors.forget_locks();
        self.statement_locks.clear();
        if restart {
            self.txn = transactions.begin(self.id);
        }
        result
    }

    // ========== Teardown ==========

    /// Close every cursor, roll back the open transaction, release all row
    /// locks and discard the session's package instances. Closing twice is
    /// a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.ensure_no_statement("close the session")?;
        self.closed = true;
        let cursors = self.cursors.close_all(&self.txn);
        let rollback = self.end_with_rollback(false);
        self.package_cursors.clear();
        let packages = self.runtime.packages().teardown(self.id);
        info!(session = self.id, packages, "session closed");
        cursors.and(rollback)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(session = self.id, error = %e, "session teardown incomplete");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("principal", &self.principal)
            .field("txn", &self.txn.id)
            .field("open_cursors", &self.cursors.open_count())
            .field("closed", &self.closed)
            .finish()
    }
}
