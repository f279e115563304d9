//! Trigger invocation context and the scope handed to handler bodies

use std::sync::Arc;

use super::definition::{DmlEvent, TriggerTiming};
use crate::error::{Error, Result};
use crate::package::StateBlock;
use crate::session::Session;
use crate::storage::{Tuple, Value};

/// A row as seen by a trigger (`:OLD` or `:NEW`)
#[derive(Debug, Clone, PartialEq)]
pub struct RowImage {
    columns: Arc<Vec<String>>,
    values: Tuple,
}

impl RowImage {
    pub fn new(columns: Arc<Vec<String>>, values: Tuple) -> Self {
        Self { columns, values }
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

    fn index(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .ok_or_else(|| Error::ColumnNotFound(column.to_string(), "row".to_string()))
    }

    pub fn get(&self, column: &str) -> Result<&Value> {
        let idx = self.index(column)?;
        self.values
            .get(idx)
            .ok_or_else(|| Error::ColumnNotFound(column.to_string(), "row".to_string()))
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> Result<()> {
        let idx = self.index(column)?;
        self.values.set(idx, value.into());
        Ok(())
    }
}

/// Per-statement facts shared by every handler the statement fires
#[derive(Debug, Clone)]
pub struct TriggerInvocationContext {
    operation: DmlEvent,
    relation: String,
    principal: String,
    rows_affected: usize,
    depth: usize,
}

impl TriggerInvocationContext {
    pub(crate) fn new(operation: DmlEvent, relation: &str, principal: &str, depth: usize) -> Self {
        Self {
            operation,
            relation: relation.to_string(),
            principal: principal.to_string(),
            rows_affected: 0,
            depth,
        }
    }

    pub fn operation(&self) -> DmlEvent {
        self.operation
    }

    pub fn inserting(&self) -> bool {
        self.operation == DmlEvent::Insert
    }

    pub fn updating(&self) -> bool {
        self.operation == DmlEvent::Update
    }

    pub fn deleting(&self) -> bool {
        self.operation == DmlEvent::Delete
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Principal the triggering session acts as
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Rows the statement has affected so far
    pub fn rows_affected(&self) -> usize {
        self.rows_affected
    }

    /// Nesting level of the statement; 1 for a top-level statement
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn count_row(&mut self) {
        self.rows_affected += 1;
    }
}

/// What a handler body can reach while it runs
pub struct TriggerScope<'a> {
    session: &'a mut Session,
    trigger: &'a str,
    timing: TriggerTiming,
    context: &'a TriggerInvocationContext,
    old: Option<&'a RowImage>,
    new: Option<&'a mut RowImage>,
    state: Option<&'a mut StateBlock>,
}

impl<'a> TriggerScope<'a> {
    pub(crate) fn new(
        session: &'a mut Session,
        trigger: &'a str,
        timing: TriggerTiming,
        context: &'a TriggerInvocationContext,
        old: Option<&'a RowImage>,
        new: Option<&'a mut RowImage>,
        state: Option<&'a mut StateBlock>,
    ) -> Self {
        Self {
            session,
            trigger,
            timing,
            context,
            old,
            new,
            state,
        }
    }

    /// The triggering session; DML, cursors and package state go through it
    pub fn session(&mut self) -> &mut Session {
        &mut *self.session
    }

    pub fn trigger_name(&self) -> &str {
        self.trigger
    }

    pub fn timing(&self) -> TriggerTiming {
        self.timing
    }

    pub fn context(&self) -> &TriggerInvocationContext {
        self.context
    }

    /// `:OLD`, absent on INSERT and in statement-level phases
    pub fn old(&self) -> Result<&RowImage> {
        self.old.ok_or(Error::BindingUnavailable("OLD"))
    }

    /// `:NEW`, absent on DELETE and in statement-level phases
    pub fn new_row(&self) -> Result<&RowImage> {
        self.new.as_deref().ok_or(Error::BindingUnavailable("NEW"))
    }

    /// Assign a column of `:NEW`; only before-row and instead-of handlers may
    pub fn set_new(&mut self, column: &str, value: impl Into<Value>) -> Result<()> {
        if !self.timing.writes_new() {
            return Err(Error::ReadOnlyBinding(self.timing.as_str()));
        }
        self.new
            .as_deref_mut()
            .ok_or(Error::BindingUnavailable("NEW"))?
            .set(column, value)
    }

    /// Statement-scoped state of the compound trigger being fired
    pub fn state(&mut self) -> Result<&mut StateBlock> {
        let trigger = self.trigger;
        self.state.as_deref_mut().ok_or_else(|| {
            Error::Internal(format!("trigger '{}' has no compound state", trigger))
        })
    }
}
