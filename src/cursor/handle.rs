//! Cursor handles
//!
//! The open, stateful side of a cursor: its row source, the current row, the
//! `%FOUND` / `%ROWCOUNT` attributes and the rows it keeps locked.

use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use super::definition::CursorDefinition;
use crate::query::{RowStream, StreamRow};
use crate::storage::{RowId, Tuple, Value};

/// Cursor handle identifier, unique within a session
pub type CursorId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Unopened,
    Open,
    /// Open, but the row source has reported end of data
    Exhausted,
    Closed,
}

impl CursorState {
    pub fn is_open(&self) -> bool {
        matches!(self, CursorState::Open | CursorState::Exhausted)
    }
}

/// A fetched row
#[derive(Debug, Clone, PartialEq)]
pub struct CursorRow {
    pub row_id: Option<RowId>,
    columns: Arc<Vec<String>>,
    values: Tuple,
}

impl CursorRow {
    pub(crate) fn new(row_id: Option<RowId>, columns: Arc<Vec<String>>, values: Tuple) -> Self {
        Self {
            row_id,
            columns,
            values,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Tuple {
        &self.values
    }

    pub fn into_values(self) -> Tuple {
        self.values
    }

    /// Value of a column by name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
    }
}

/// `%ISOPEN`, `%FOUND`, `%NOTFOUND` and `%ROWCOUNT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CursorAttributes {
    pub is_open: bool,
    /// `None` until the first fetch after open
    pub found: Option<bool>,
    pub not_found: Option<bool>,
    pub row_count: usize,
}

pub(crate) enum RowSource {
    Stream(Box<dyn RowStream>),
    /// Rows read and locked when the cursor was opened
    Buffered(VecDeque<StreamRow>),
}

pub struct CursorHandle {
    id: CursorId,
    definition: Arc<CursorDefinition>,
    pub(crate) state: CursorState,
    pub(crate) source: Option<RowSource>,
    /// Row read from the source whose lock could not be taken yet
    pub(crate) pending: Option<StreamRow>,
    pub(crate) columns: Arc<Vec<String>>,
    pub(crate) current: Option<CursorRow>,
    pub(crate) found: Option<bool>,
    pub(crate) row_count: usize,
    pub(crate) locked_rows: HashSet<RowId>,
}

impl CursorHandle {
    pub(crate) fn new(id: CursorId, definition: Arc<CursorDefinition>) -> Self {
        Self {
            id,
            definition,
            state: CursorState::Unopened,
            source: None,
            pending: None,
            columns: Arc::new(Vec::new()),
            current: None,
            found: None,
            row_count: 0,
            locked_rows: HashSet::new(),
        }
    }

    pub fn id(&self) -> CursorId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn definition(&self) -> &Arc<CursorDefinition> {
        &self.definition
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn current(&self) -> Option<&CursorRow> {
        self.current.as_ref()
    }

    /// Rows this handle locked and has not yet released
    pub fn locked_rows(&self) -> &HashSet<RowId> {
        &self.locked_rows
    }

    pub fn attributes(&self) -> CursorAttributes {
        CursorAttributes {
            is_open: self.state.is_open(),
            found: self.found,
            not_found: self.found.map(|f| !f),
            row_count: self.row_count,
        }
    }

    /// Reset to a freshly opened state over a new row source
    pub(crate) fn reset(&mut self, source: RowSource, columns: Vec<String>) {
        self.state = CursorState::Open;
        self.source = Some(source);
        self.pending = None;
        self.columns = Arc::new(columns);
        self.current = None;
        self.found = None;
        self.row_count = 0;
    }

    /// Record a fetched row and advance the attributes
    pub(crate) fn advance(&mut self, row: StreamRow) -> CursorRow {
        let row = CursorRow::new(row.row_id, self.columns.clone(), row.values);
        self.found = Some(true);
        self.row_count += 1;
        self.current = Some(row.clone());
        row
    }

    pub(crate) fn mark_exhausted(&mut self) {
        self.state = CursorState::Exhausted;
        self.found = Some(false);
        self.current = None;
        self.source = None;
        self.pending = None;
    }
}

impl std::fmt::Debug for CursorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorHandle")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("state", &self.state)
            .field("row_count", &self.row_count)
            .field("locked_rows", &self.locked_rows.len())
            .finish()
    }
}
