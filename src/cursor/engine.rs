//! Cursor Engine
//!
//! Drives cursor handles for one session: open binds arguments and starts a
//! row stream, fetch advances it one row at a time, close discards it.
//!
//! FOR UPDATE cursors lock rows through the row lock coordinator. With
//! [`LockAcquisition::OnFetch`] each row is locked as it is fetched, so a
//! session only waits on rows it actually reaches and two sessions scanning
//! in the same order block rather than deadlock. With
//! [`LockAcquisition::OnOpen`] the whole result set is locked when the cursor
//! opens; open either locks every row or fails holding none of the new locks.
//! After a lock is granted the row is re-read; rows deleted or no longer
//! qualifying while the session waited are skipped.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use super::definition::CursorDefinition;
use super::handle::{CursorAttributes, CursorHandle, CursorId, CursorRow, CursorState, RowSource};
use crate::error::{Error, Result};
use crate::query::{QueryEngine, RowStream, StreamRow};
use crate::storage::{RowId, Value};
use crate::transaction::{RowLockCoordinator, SessionId, Transaction, WaitPolicy};

/// When FOR UPDATE cursors acquire their row locks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockAcquisition {
    #[default]
    OnFetch,
    OnOpen,
}

struct LockContext<'a> {
    session: SessionId,
    locks: &'a dyn RowLockCoordinator,
    wait: WaitPolicy,
}

struct LockedRow {
    row_id: RowId,
    row: StreamRow,
    newly_locked: bool,
}

/// Lock a row produced by a stream and re-read it under the lock
fn lock_and_refresh(
    ctx: &LockContext<'_>,
    cursor: &str,
    stream: &mut dyn RowStream,
    row: &StreamRow,
) -> Result<Option<LockedRow>> {
    let row_id = row
        .row_id
        .clone()
        .ok_or_else(|| Error::NotUpdatable(cursor.to_string()))?;
    let held_before = ctx.locks.holds(&row_id, ctx.session);
    ctx.locks.acquire(&row_id, ctx.session, ctx.wait)?;

    match stream.refresh(&row_id)? {
        Some(values) => Ok(Some(LockedRow {
            row: StreamRow {
                row_id: Some(row_id.clone()),
                values,
            },
            row_id,
            newly_locked: !held_before,
        })),
        None => {
            if !held_before {
                ctx.locks.release(&row_id, ctx.session);
            }
            debug!(cursor, row = %row_id, "row changed while locking, skipped");
            Ok(None)
        }
    }
}

pub struct CursorEngine {
    session: SessionId,
    query_engine: Arc<dyn QueryEngine>,
    locks: Arc<dyn RowLockCoordinator>,
    wait: WaitPolicy,
    acquisition: LockAcquisition,
    handles: HashMap<CursorId, CursorHandle>,
    next_id: CursorId,
}

impl CursorEngine {
    pub fn new(
        session: SessionId,
        query_engine: Arc<dyn QueryEngine>,
        locks: Arc<dyn RowLockCoordinator>,
        wait: WaitPolicy,
        acquisition: LockAcquisition,
    ) -> Self {
        Self {
            session,
            query_engine,
            locks,
            wait,
            acquisition,
            handles: HashMap::new(),
            next_id: 1,
        }
    }

    /// Create an unopened handle for a definition
    pub fn declare(&mut self, definition: Arc<CursorDefinition>) -> CursorId {
        let id = self.next_id;
        self.next_id += 1;
        self.handles.insert(id, CursorHandle::new(id, definition));
        id
    }

    pub fn handle(&self, id: CursorId) -> Result<&CursorHandle> {
        self.handles.get(&id).ok_or(Error::UnknownCursor(id))
    }

    pub fn open(&mut self, id: CursorId, args: &[Value]) -> Result<()> {
        let handle = self.handle(id)?;
        if handle.state.is_open() {
            return Err(Error::AlreadyOpen(handle.name().to_string()));
        }
        let definition = handle.definition().clone();
        if definition.is_locking() && !definition.query().has_single_target() {
            return Err(Error::NotUpdatable(definition.name().to_string()));
        }

        let binds = definition.bind(args)?;
        let mut stream = self.query_engine.execute(definition.query(), &binds)?;
        let columns = stream.columns().to_vec();

        let (source, locked) = if definition.is_locking() && self.acquisition == LockAcquisition::OnOpen {
            let (rows, locked) = self.lock_result_set(definition.name(), stream.as_mut())?;
            (RowSource::Buffered(rows), locked)
        } else {
            (RowSource::Stream(stream), Vec::new())
        };

        let handle = self.handles.get_mut(&id).ok_or(Error::UnknownCursor(id))?;
        handle.reset(source, columns);
        handle.locked_rows.extend(locked);
        debug!(
            session = self.session,
            cursor = %definition.name(),
            locked = handle.locked_rows.len(),
            "cursor opened"
        );
        Ok(())
    }

    /// Read and lock every row of a stream. On failure the locks taken here
    /// are released again.
    fn lock_result_set(
        &self,
        cursor: &str,
        stream: &mut dyn RowStream,
    ) -> Result<(VecDeque<StreamRow>, Vec<RowId>)> {
        let ctx = LockContext {
            session: self.session,
            locks: self.locks.as_ref(),
            wait: self.wait,
        };
        let mut rows = VecDeque::new();
        let mut relied = Vec::new();
        let mut acquired = Vec::new();

        let result = (|| -> Result<()> {
            while let Some(row) = stream.next_row()? {
                if let Some(locked) = lock_and_refresh(&ctx, cursor, &mut *stream, &row)? {
                    if locked.newly_locked {
                        acquired.push(locked.row_id.clone());
                    }
                    relied.push(locked.row_id);
                    rows.push_back(locked.row);
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => Ok((rows, relied)),
            Err(e) => {
                for row_id in &acquired {
                    self.locks.release(row_id, self.session);
                }
                Err(e)
            }
        }
    }

    /// Fetch the next row. Returns `None` once the cursor is exhausted, and
    /// keeps returning `None` on later calls. A fetch that fails to lock its
    /// row leaves the cursor positioned before that row.
    pub fn fetch(&mut self, id: CursorId) -> Result<Option<CursorRow>> {
        let ctx = LockContext {
            session: self.session,
            locks: self.locks.as_ref(),
            wait: self.wait,
        };
        let handle = self.handles.get_mut(&id).ok_or(Error::UnknownCursor(id))?;
        match handle.state {
            CursorState::Unopened | CursorState::Closed => {
                return Err(Error::CursorNotOpen(handle.name().to_string()))
            }
            CursorState::Exhausted => return Ok(None),
            CursorState::Open => {}
        }

        let name = handle.name().to_string();
        let locking = handle.definition().is_locking();
        let fetched = loop {
            match handle.source.as_mut() {
                Some(RowSource::Stream(stream)) => {
                    let row = match handle.pending.take() {
                        Some(row) => row,
                        None => match stream.next_row()? {
                            Some(row) => row,
                            None => break None,
                        },
                    };
                    if !locking {
                        break Some(row);
                    }
                    match lock_and_refresh(&ctx, &name, &mut **stream, &row) {
                        Ok(Some(locked)) => {
                            handle.locked_rows.insert(locked.row_id);
                            break Some(locked.row);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            // retried first by the next fetch
                            handle.pending = Some(row);
                            return Err(e);
                        }
                    }
                }
                Some(RowSource::Buffered(rows)) => break rows.pop_front(),
                None => break None,
            }
        };

        match fetched {
            Some(row) => Ok(Some(handle.advance(row))),
            None => {
                handle.mark_exhausted();
                debug!(cursor = %name, rows = handle.row_count, "cursor exhausted");
                Ok(None)
            }
        }
    }

    /// Fetch up to `limit` rows (BULK COLLECT ... LIMIT)
    pub fn fetch_batch(&mut self, id: CursorId, limit: usize) -> Result<Vec<CursorRow>> {
        let mut rows = Vec::with_capacity(limit.min(64));
        while rows.len() < limit {
            match self.fetch(id)? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    /// Close a cursor and release the locks it holds. Rows changed by the
    /// transaction, or still relied on by another open cursor of the session,
    /// stay locked. Closing a cursor that is not open does nothing.
    pub fn close(&mut self, id: CursorId, txn: &Transaction) -> Result<()> {
        let handle = self.handles.get_mut(&id).ok_or(Error::UnknownCursor(id))?;
        if !handle.state.is_open() {
            if handle.state == CursorState::Unopened {
                handle.state = CursorState::Closed;
            }
            return Ok(());
        }

        let rows: Vec<RowId> = handle.locked_rows.drain().collect();
        handle.state = CursorState::Closed;
        handle.source = None;
        handle.pending = None;
        handle.current = None;
        let name = handle.name().to_string();

        let mut released = 0;
        for row_id in &rows {
            if txn.has_modified(row_id) || self.relied_on_elsewhere(id, row_id) {
                continue;
            }
            self.locks.release(row_id, self.session);
            released += 1;
        }
        debug!(session = self.session, cursor = %name, released, "cursor closed");
        Ok(())
    }

    /// Close a cursor if it is still open and discard its handle. The id is
    /// unknown afterwards.
    pub fn release(&mut self, id: CursorId, txn: &Transaction) -> Result<()> {
        self.close(id, txn)?;
        self.handles.remove(&id);
        Ok(())
    }

    /// Whether an open cursor of the session keeps the row locked
    pub(crate) fn relies_on(&self, row_id: &RowId) -> bool {
        self.handles
            .values()
            .any(|h| h.state.is_open() && h.locked_rows.contains(row_id))
    }

    fn relied_on_elsewhere(&self, id: CursorId, row_id: &RowId) -> bool {
        self.handles
            .values()
            .any(|h| h.id() != id && h.state.is_open() && h.locked_rows.contains(row_id))
    }

    pub fn attributes(&self, id: CursorId) -> Result<CursorAttributes> {
        Ok(self.handle(id)?.attributes())
    }

    /// Row last fetched by the cursor, the target of `WHERE CURRENT OF`
    pub fn current_row_id(&self, id: CursorId) -> Result<RowId> {
        let handle = self.handle(id)?;
        if !handle.state.is_open() {
            return Err(Error::CursorNotOpen(handle.name().to_string()));
        }
        let current = handle
            .current()
            .ok_or_else(|| Error::NoCurrentRow(handle.name().to_string()))?;
        current
            .row_id
            .clone()
            .ok_or_else(|| Error::NotUpdatable(handle.name().to_string()))
    }

    /// Table a cursor's rows come from
    pub fn target_table(&self, id: CursorId) -> Result<String> {
        Ok(self.handle(id)?.definition().query().from.clone())
    }

    /// Drop lock bookkeeping after commit or rollback released every lock
    pub fn forget_locks(&mut self) {
        for handle in self.handles.values_mut() {
            handle.locked_rows.clear();
        }
    }

    /// Close every open cursor of the session
    pub fn close_all(&mut self, txn: &Transaction) -> Result<()> {
        let ids: Vec<CursorId> = self
            .handles
            .values()
            .filter(|h| h.state.is_open())
            .map(|h| h.id())
            .collect();
        for id in ids {
            self.close(id, txn)?;
        }
        Ok(())
    }

    pub fn open_count(&self) -> usize {
        self.handles.values().filter(|h| h.state.is_open()).count()
    }

    /// Handles declared and not yet released, open or not
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }
}
