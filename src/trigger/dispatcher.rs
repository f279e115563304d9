//! Trigger Dispatcher
//!
//! Every INSERT, UPDATE and DELETE a session issues runs through here. A
//! statement fires its BEFORE STATEMENT handlers, then for each affected row
//! the BEFORE EACH ROW handlers, the mutation itself (or the INSTEAD OF
//! handlers on a view) and the AFTER EACH ROW handlers, and finally its AFTER
//! STATEMENT handlers. Handlers fire in registration order.
//!
//! The statement takes a savepoint on entry. Any error, from a handler or
//! from the mutation, rolls the transaction back to that savepoint, so a
//! failed statement leaves no row changes behind. It also releases the row
//! locks it took, including those of nested statements its handlers ran.
//! Locks of a statement that completes are kept until the transaction ends.
//! Handlers may not commit or roll back the transaction.
//!
//! Each statement pushes a frame onto the session's mutating-table stack.
//! While a row-level handler runs, its table is mutating: any statement
//! against it other than a `WHERE CURRENT OF` update or delete fails with
//! [`Error::MutatingTable`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info_span, warn};

use super::context::{RowImage, TriggerInvocationContext, TriggerScope};
use super::definition::{DmlEvent, Trigger, TriggerTiming};
use super::lookup::TriggerTable;
use crate::catalog::{Relation, TableDef, ViewDef};
use crate::error::{Error, Result};
use crate::package::StateBlock;
use crate::query::{Bindings, Predicate, RowContext, SourceColumn};
use crate::session::{Assignments, Selection, Session};
use crate::storage::{Database, RowId, Tuple};
use crate::transaction::{UndoRecord, WaitPolicy};

/// A statement on the session's mutating-table stack
#[derive(Debug, Clone)]
pub(crate) struct MutatingFrame {
    relation: String,
    row_level_active: bool,
}

pub(crate) enum DmlStatement {
    Insert {
        relation: String,
        rows: Vec<Tuple>,
    },
    Update {
        relation: String,
        set: Assignments,
        selection: Selection,
    },
    Delete {
        relation: String,
        selection: Selection,
    },
}

impl DmlStatement {
    fn relation(&self) -> &str {
        match self {
            DmlStatement::Insert { relation, .. }
            | DmlStatement::Update { relation, .. }
            | DmlStatement::Delete { relation, .. } => relation,
        }
    }

    fn event(&self) -> DmlEvent {
        match self {
            DmlStatement::Insert { .. } => DmlEvent::Insert,
            DmlStatement::Update { .. } => DmlEvent::Update,
            DmlStatement::Delete { .. } => DmlEvent::Delete,
        }
    }

    fn selection(&self) -> Option<&Selection> {
        match self {
            DmlStatement::Insert { .. } => None,
            DmlStatement::Update { selection, .. } | DmlStatement::Delete { selection, .. } => {
                Some(selection)
            }
        }
    }

    fn set_columns(&self) -> Vec<String> {
        match self {
            DmlStatement::Update { set, .. } => set.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

/// Execute one DML statement and return the number of affected rows
pub(crate) fn execute(session: &mut Session, stmt: DmlStatement) -> Result<usize> {
    let relation = session.runtime.catalog().relation(stmt.relation())?;
    let name = relation.name().to_string();

    let current_of = matches!(stmt.selection(), Some(Selection::CurrentOf(_)));
    if !current_of
        && session
            .frames
            .iter()
            .any(|f| f.row_level_active && f.relation.eq_ignore_ascii_case(&name))
    {
        return Err(Error::MutatingTable(name));
    }
    let max_depth = session.runtime.config().max_trigger_depth;
    if session.frames.len() >= max_depth {
        return Err(Error::TriggerDepthExceeded(max_depth));
    }

    let span = info_span!("dml", session = session.id, op = %stmt.event(), relation = %name);
    let _guard = span.enter();

    let savepoint = session.txn.savepoint();
    let lock_mark = session.statement_locks.len();
    session.frames.push(MutatingFrame {
        relation: name,
        row_level_active: false,
    });
    let result = run_statement(session, &relation, stmt);
    session.frames.pop();

    match result {
        Ok(rows) => {
            debug!(rows, "statement complete");
            Ok(rows)
        }
        Err(e) => {
            warn!(error = %e, "statement failed, rolling back to statement start");
            if let Err(undo) = session.txn.rollback_to(savepoint, session.runtime.database()) {
                warn!(error = %undo, "statement rollback incomplete");
            }
            release_statement_locks(session, lock_mark);
            Err(e)
        }
    }
}

fn run_statement(session: &mut Session, relation: &Relation, stmt: DmlStatement) -> Result<usize> {
    let name = relation.name().to_string();
    let triggers = session.runtime.catalog().trigger_table(&name);
    let columns = Arc::new(relation_columns(session, relation)?);
    let event = stmt.event();

    if let DmlStatement::Update { set, .. } = &stmt {
        for column in set.keys() {
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                return Err(Error::ColumnNotFound(column.clone(), name));
            }
        }
    }
    let source = source_columns(&name, &columns);
    if let Some(Selection::Where { predicate, .. }) = stmt.selection() {
        if let Some(column) = predicate.unknown_columns(&source).into_iter().next() {
            return Err(Error::ColumnNotFound(column, name));
        }
    }

    let mut run = StatementRun::new(&triggers, event, stmt.set_columns(), &name, session);
    if relation.is_view() && run.applicable(TriggerTiming::InsteadOf).is_empty() {
        return Err(Error::ViewNotUpdatable(name));
    }

    run.fire_statement(session, TriggerTiming::BeforeStatement)?;
    match relation {
        Relation::Table(def) => run.apply_to_table(session, def, &columns, &source, stmt)?,
        Relation::View(view) => run.apply_to_view(session, view, &columns, &source, stmt)?,
    }
    run.fire_statement(session, TriggerTiming::AfterStatement)?;
    Ok(run.context.rows_affected())
}

/// Lock a row for the running statement. Returns whether the lock is new to
/// the session; new locks are logged so a failed statement can give them back.
fn lock_row(session: &mut Session, row_id: &RowId) -> Result<bool> {
    let locks = session.runtime.locks().clone();
    if locks.holds(row_id, session.id) {
        return Ok(false);
    }
    locks.acquire(row_id, session.id, session.runtime.config().lock_wait)?;
    session.statement_locks.push(row_id.clone());
    Ok(true)
}

fn release_statement_locks(session: &mut Session, mark: usize) {
    let mark = mark.min(session.statement_locks.len());
    let rows = session.statement_locks.split_off(mark);
    let locks = session.runtime.locks().clone();
    let mut released = 0;
    for row_id in &rows {
        if session.txn.has_modified(row_id) || session.cursors.relies_on(row_id) {
            continue;
        }
        locks.release(row_id, session.id);
        released += 1;
    }
    debug!(released, "statement row locks released");
}

fn relation_columns(session: &Session, relation: &Relation) -> Result<Vec<String>> {
    match relation {
        Relation::Table(def) => Ok(def.schema().column_names()),
        Relation::View(view) => {
            let stream = session
                .runtime
                .query_engine()
                .execute(&view.query, &Bindings::new())?;
            Ok(stream.columns().to_vec())
        }
    }
}

fn source_columns(relation: &str, columns: &[String]) -> Vec<SourceColumn> {
    columns
        .iter()
        .map(|c| SourceColumn {
            table: relation.to_string(),
            name: c.clone(),
        })
        .collect()
}

fn qualifies(filter: Option<(&Predicate, &Bindings)>, source: &[SourceColumn], tuple: &Tuple) -> Result<bool> {
    match filter {
        None => Ok(true),
        Some((predicate, binds)) => predicate.matches(
            &RowContext {
                columns: source,
                values: tuple.values(),
            },
            binds,
        ),
    }
}

fn filter_of(selection: &Selection) -> Option<(&Predicate, &Bindings)> {
    match selection {
        Selection::Where { predicate, binds } => Some((predicate, binds)),
        _ => None,
    }
}

fn read_row(db: &Database, row_id: &RowId) -> Result<Tuple> {
    db.read(row_id)?
        .ok_or_else(|| Error::Internal(format!("row {} vanished during statement", row_id)))
}

fn check_arity(relation: &str, columns: &[String], values: &Tuple) -> Result<()> {
    if values.len() != columns.len() {
        return Err(Error::ArityMismatch {
            table: relation.to_string(),
            expected: columns.len(),
            found: values.len(),
        });
    }
    Ok(())
}

fn apply_set(image: &mut RowImage, set: &Assignments) -> Result<()> {
    for (column, value) in set {
        image.set(column, value.clone())?;
    }
    Ok(())
}

fn set_row_level(session: &mut Session, active: bool) {
    if let Some(frame) = session.frames.last_mut() {
        frame.row_level_active = active;
    }
}

fn handler_error(trigger: &Trigger, source: Error) -> Error {
    Error::Handler {
        trigger: trigger.name().to_string(),
        source: Box::new(source),
    }
}

/// State of one statement while it runs: its invocation context and the
/// private state of each compound trigger it fires
struct StatementRun<'t> {
    triggers: &'t TriggerTable,
    event: DmlEvent,
    set_columns: Vec<String>,
    context: TriggerInvocationContext,
    states: HashMap<String, StateBlock>,
}

impl<'t> StatementRun<'t> {
    fn new(
        triggers: &'t TriggerTable,
        event: DmlEvent,
        set_columns: Vec<String>,
        relation: &str,
        session: &Session,
    ) -> Self {
        let states = triggers
            .compound(event)
            .iter()
            .filter(|t| t.is_enabled() && t.events().fires_for(event, &set_columns))
            .filter_map(|t| t.new_state().map(|s| (t.name().to_lowercase(), s)))
            .collect();
        Self {
            triggers,
            event,
            context: TriggerInvocationContext::new(
                event,
                relation,
                session.principal(),
                session.frames.len(),
            ),
            set_columns,
            states,
        }
    }

    /// Enabled triggers that fire for this statement at a timing
    fn applicable(&self, timing: TriggerTiming) -> Vec<Arc<Trigger>> {
        self.triggers
            .lookup(timing, self.event)
            .iter()
            .filter(|t| t.is_enabled() && t.events().fires_for(self.event, &self.set_columns))
            .cloned()
            .collect()
    }

    fn fire_statement(&mut self, session: &mut Session, timing: TriggerTiming) -> Result<()> {
        for trigger in self.applicable(timing) {
            let Some(handler) = trigger.handler(timing).cloned() else {
                continue;
            };
            debug!(trigger = %trigger.name(), %timing, "firing statement trigger");
            let state = self.states.get_mut(&trigger.name().to_lowercase());
            let mut scope =
                TriggerScope::new(session, trigger.name(), timing, &self.context, None, None, state);
            handler(&mut scope).map_err(|e| handler_error(&trigger, e))?;
        }
        Ok(())
    }

    fn fire_row(
        &mut self,
        session: &mut Session,
        timing: TriggerTiming,
        old: Option<&RowImage>,
        mut new: Option<&mut RowImage>,
    ) -> Result<()> {
        for trigger in self.applicable(timing) {
            if let Some(when) = trigger.when() {
                if !when(old, new.as_deref()) {
                    continue;
                }
            }
            let Some(handler) = trigger.handler(timing).cloned() else {
                continue;
            };
            debug!(trigger = %trigger.name(), %timing, row = self.context.rows_affected(), "firing row trigger");

            set_row_level(session, true);
            let result = {
                let state = self.states.get_mut(&trigger.name().to_lowercase());
                let mut scope = TriggerScope::new(
                    session,
                    trigger.name(),
                    timing,
                    &self.context,
                    old,
                    new.as_deref_mut(),
                    state,
                );
                handler(&mut scope)
            };
            set_row_level(session, false);
            result.map_err(|e| handler_error(&trigger, e))?;
        }
        Ok(())
    }

    fn apply_to_table(
        &mut self,
        session: &mut Session,
        def: &TableDef,
        columns: &Arc<Vec<String>>,
        source: &[SourceColumn],
        stmt: DmlStatement,
    ) -> Result<()> {
        let db = session.runtime.database().clone();
        let locks = session.runtime.locks().clone();

        match stmt {
            DmlStatement::Insert { rows, .. } => {
                for values in rows {
                    check_arity(def.name(), columns, &values)?;
                    let mut new = RowImage::new(columns.clone(), values);
                    self.fire_row(session, TriggerTiming::BeforeRow, None, Some(&mut new))?;

                    let id = session.id;
                    let row_id = db.insert_with(def.name(), new.into_values(), |row_id| {
                        locks.acquire(row_id, id, WaitPolicy::NoWait)
                    })?;
                    session.statement_locks.push(row_id.clone());
                    session.txn.record(UndoRecord::Insert(row_id.clone()));
                    self.context.count_row();

                    let mut stored = RowImage::new(columns.clone(), read_row(&db, &row_id)?);
                    self.fire_row(session, TriggerTiming::AfterRow, None, Some(&mut stored))?;
                }
            }
            DmlStatement::Update { set, selection, .. } => {
                for row_id in self.target_rows(session, def, source, &selection)? {
                    let Some(current) = db.read(&row_id)? else {
                        continue;
                    };
                    let old = RowImage::new(columns.clone(), current);
                    let mut new = old.clone();
                    apply_set(&mut new, &set)?;
                    self.fire_row(session, TriggerTiming::BeforeRow, Some(&old), Some(&mut new))?;

                    let before = db.update(&row_id, new.into_values())?;
                    session.txn.record(UndoRecord::Update {
                        row_id: row_id.clone(),
                        before,
                    });
                    self.context.count_row();

                    let mut stored = RowImage::new(columns.clone(), read_row(&db, &row_id)?);
                    self.fire_row(session, TriggerTiming::AfterRow, Some(&old), Some(&mut stored))?;
                }
            }
            DmlStatement::Delete { selection, .. } => {
                for row_id in self.target_rows(session, def, source, &selection)? {
                    let Some(current) = db.read(&row_id)? else {
                        continue;
                    };
                    let old = RowImage::new(columns.clone(), current);
                    self.fire_row(session, TriggerTiming::BeforeRow, Some(&old), None)?;

                    let before = db.delete(&row_id)?;
                    session.txn.record(UndoRecord::Delete { row_id, before });
                    self.context.count_row();

                    self.fire_row(session, TriggerTiming::AfterRow, Some(&old), None)?;
                }
            }
        }
        Ok(())
    }

    /// Lock and collect the rows an UPDATE or DELETE targets. A row that
    /// changed while the session waited for its lock is re-checked and
    /// dropped if it no longer qualifies.
    fn target_rows(
        &self,
        session: &mut Session,
        def: &TableDef,
        source: &[SourceColumn],
        selection: &Selection,
    ) -> Result<Vec<RowId>> {
        let db = session.runtime.database().clone();
        let locks = session.runtime.locks().clone();

        if let Selection::CurrentOf(cursor) = selection {
            let row_id = session.cursors.current_row_id(*cursor)?;
            if !row_id.table.eq_ignore_ascii_case(def.name()) {
                let name = session.cursors.handle(*cursor)?.name().to_string();
                return Err(Error::NotUpdatable(name));
            }
            lock_row(session, &row_id)?;
            return Ok(vec![row_id]);
        }

        let filter = filter_of(selection);
        let mut rows = Vec::new();
        for slot in db.slots(def.name())? {
            let row_id = RowId::new(def.name(), slot);
            let Some(tuple) = db.read(&row_id)? else {
                continue;
            };
            if !qualifies(filter, source, &tuple)? {
                continue;
            }

            let newly_locked = lock_row(session, &row_id)?;
            match db.read(&row_id)? {
                Some(tuple) if qualifies(filter, source, &tuple)? => rows.push(row_id),
                _ => {
                    if newly_locked {
                        locks.release(&row_id, session.id);
                        session.statement_locks.pop();
                    }
                }
            }
        }
        Ok(rows)
    }

    fn apply_to_view(
        &mut self,
        session: &mut Session,
        view: &ViewDef,
        columns: &Arc<Vec<String>>,
        source: &[SourceColumn],
        stmt: DmlStatement,
    ) -> Result<()> {
        match stmt {
            DmlStatement::Insert { rows, .. } => {
                for values in rows {
                    check_arity(&view.name, columns, &values)?;
                    let mut new = RowImage::new(columns.clone(), values);
                    self.fire_row(session, TriggerTiming::InsteadOf, None, Some(&mut new))?;
                    self.context.count_row();
                }
            }
            DmlStatement::Update { set, selection, .. } => {
                for values in self.view_rows(session, view, source, &selection)? {
                    let old = RowImage::new(columns.clone(), values);
                    let mut new = old.clone();
                    apply_set(&mut new, &set)?;
                    self.fire_row(session, TriggerTiming::InsteadOf, Some(&old), Some(&mut new))?;
                    self.context.count_row();
                }
            }
            DmlStatement::Delete { selection, .. } => {
                for values in self.view_rows(session, view, source, &selection)? {
                    let old = RowImage::new(columns.clone(), values);
                    self.fire_row(session, TriggerTiming::InsteadOf, Some(&old), None)?;
                    self.context.count_row();
                }
            }
        }
        Ok(())
    }

    /// Rows of a view matching a selection, read before any handler runs
    fn view_rows(
        &self,
        session: &Session,
        view: &ViewDef,
        source: &[SourceColumn],
        selection: &Selection,
    ) -> Result<Vec<Tuple>> {
        if let Selection::CurrentOf(_) = selection {
            return Err(Error::ViewNotUpdatable(view.name.clone()));
        }
        let filter = filter_of(selection);
        let mut stream = session
            .runtime
            .query_engine()
            .execute(&view.query, &Bindings::new())?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next_row()? {
            if qualifies(filter, source, &row.values)? {
                rows.push(row.values);
            }
        }
        Ok(rows)
    }
}
