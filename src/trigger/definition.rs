//! Trigger definitions
//!
//! Simple triggers carry one handler for one timing. Compound triggers carry
//! up to four timing sections plus the declarations of a state block that
//! lives for one triggering statement.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::context::{RowImage, TriggerScope};
use crate::error::Result;
use crate::package::{StateBlock, VarDecl};
use crate::storage::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerTiming {
    BeforeStatement,
    BeforeRow,
    AfterRow,
    AfterStatement,
    InsteadOf,
}

impl TriggerTiming {
    /// Phases in which handlers may assign to `:NEW`
    pub fn writes_new(&self) -> bool {
        matches!(self, TriggerTiming::BeforeRow | TriggerTiming::InsteadOf)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerTiming::BeforeStatement => "BEFORE STATEMENT",
            TriggerTiming::BeforeRow => "BEFORE EACH ROW",
            TriggerTiming::AfterRow => "AFTER EACH ROW",
            TriggerTiming::AfterStatement => "AFTER STATEMENT",
            TriggerTiming::InsteadOf => "INSTEAD OF",
        }
    }
}

impl fmt::Display for TriggerTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DmlEvent {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for DmlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmlEvent::Insert => write!(f, "INSERT"),
            DmlEvent::Update => write!(f, "UPDATE"),
            DmlEvent::Delete => write!(f, "DELETE"),
        }
    }
}

/// Events a trigger listens to. An UPDATE event may be restricted to a list
/// of columns (`UPDATE OF`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerEvents {
    insert: bool,
    update: Option<Vec<String>>,
    delete: bool,
}

impl TriggerEvents {
    pub fn insert() -> Self {
        Self::default().or_insert()
    }

    pub fn update() -> Self {
        Self::default().or_update()
    }

    pub fn update_of(columns: &[&str]) -> Self {
        Self::default().or_update_of(columns)
    }

    pub fn delete() -> Self {
        Self::default().or_delete()
    }

    pub fn all() -> Self {
        Self::insert().or_update().or_delete()
    }

    pub fn or_insert(mut self) -> Self {
        self.insert = true;
        self
    }

    pub fn or_update(mut self) -> Self {
        self.update = Some(Vec::new());
        self
    }

    pub fn or_update_of(mut self, columns: &[&str]) -> Self {
        self.update = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn or_delete(mut self) -> Self {
        self.delete = true;
        self
    }

    pub fn contains(&self, event: DmlEvent) -> bool {
        match event {
            DmlEvent::Insert => self.insert,
            DmlEvent::Update => self.update.is_some(),
            DmlEvent::Delete => self.delete,
        }
    }

    /// Columns named by `UPDATE OF`; empty when any update fires
    pub fn update_columns(&self) -> &[String] {
        self.update.as_deref().unwrap_or(&[])
    }

    /// Whether a statement with this event and SET list fires the trigger
    pub fn fires_for(&self, event: DmlEvent, set_columns: &[String]) -> bool {
        match (event, &self.update) {
            (DmlEvent::Update, Some(columns)) if !columns.is_empty() => columns
                .iter()
                .any(|c| set_columns.iter().any(|s| s.eq_ignore_ascii_case(c))),
            _ => self.contains(event),
        }
    }
}

/// Handler body
pub type TriggerHandler = Arc<dyn Fn(&mut TriggerScope<'_>) -> Result<()> + Send + Sync>;

/// Row-level `WHEN` condition over `:OLD` and `:NEW`
pub type WhenCondition = Arc<dyn Fn(Option<&RowImage>, Option<&RowImage>) -> bool + Send + Sync>;

/// Trigger with a single timing
#[derive(Clone)]
pub struct TriggerDefinition {
    pub name: String,
    pub target: String,
    pub timing: TriggerTiming,
    pub events: TriggerEvents,
    when: Option<WhenCondition>,
    handler: TriggerHandler,
}

impl TriggerDefinition {
    pub fn new<F>(
        name: impl Into<String>,
        target: impl Into<String>,
        timing: TriggerTiming,
        events: TriggerEvents,
        handler: F,
    ) -> Self
    where
        F: Fn(&mut TriggerScope<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            target: target.into(),
            timing,
            events,
            when: None,
            handler: Arc::new(handler),
        }
    }

    /// Restrict row-level firing to rows satisfying a condition
    pub fn when<F>(mut self, condition: F) -> Self
    where
        F: Fn(Option<&RowImage>, Option<&RowImage>) -> bool + Send + Sync + 'static,
    {
        self.when = Some(Arc::new(condition));
        self
    }
}

impl fmt::Debug for TriggerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerDefinition")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("timing", &self.timing)
            .field("events", &self.events)
            .field("when", &self.when.is_some())
            .finish()
    }
}

/// Trigger bundling per-timing sections and statement-scoped state
#[derive(Clone)]
pub struct CompoundTriggerDefinition {
    pub name: String,
    pub target: String,
    pub events: TriggerEvents,
    state: Vec<VarDecl>,
    when: Option<WhenCondition>,
    before_statement: Option<TriggerHandler>,
    before_each_row: Option<TriggerHandler>,
    after_each_row: Option<TriggerHandler>,
    after_statement: Option<TriggerHandler>,
}

impl CompoundTriggerDefinition {
    pub fn new(name: impl Into<String>, target: impl Into<String>, events: TriggerEvents) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            events,
            state: Vec::new(),
            when: None,
            before_statement: None,
            before_each_row: None,
            after_each_row: None,
            after_statement: None,
        }
    }

    /// Declare a variable of the statement-scoped state block
    pub fn state_var(mut self, name: impl Into<String>, initial: impl Into<Value>) -> Self {
        self.state.push(VarDecl::new(name, initial));
        self
    }

    pub fn when<F>(mut self, condition: F) -> Self
    where
        F: Fn(Option<&RowImage>, Option<&RowImage>) -> bool + Send + Sync + 'static,
    {
        self.when = Some(Arc::new(condition));
        self
    }

    pub fn before_statement<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut TriggerScope<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.before_statement = Some(Arc::new(f));
        self
    }

    pub fn before_each_row<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut TriggerScope<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.before_each_row = Some(Arc::new(f));
        self
    }

    pub fn after_each_row<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut TriggerScope<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.after_each_row = Some(Arc::new(f));
        self
    }

    pub fn after_statement<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut TriggerScope<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.after_statement = Some(Arc::new(f));
        self
    }

    fn section(&self, timing: TriggerTiming) -> Option<&TriggerHandler> {
        match timing {
            TriggerTiming::BeforeStatement => self.before_statement.as_ref(),
            TriggerTiming::BeforeRow => self.before_each_row.as_ref(),
            TriggerTiming::AfterRow => self.after_each_row.as_ref(),
            TriggerTiming::AfterStatement => self.after_statement.as_ref(),
            TriggerTiming::InsteadOf => None,
        }
    }
}

impl fmt::Debug for CompoundTriggerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompoundTriggerDefinition")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("events", &self.events)
            .field("state", &self.state)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum TriggerBody {
    Simple(TriggerDefinition),
    Compound(CompoundTriggerDefinition),
}

impl From<TriggerDefinition> for TriggerBody {
    fn from(def: TriggerDefinition) -> Self {
        TriggerBody::Simple(def)
    }
}

impl From<CompoundTriggerDefinition> for TriggerBody {
    fn from(def: CompoundTriggerDefinition) -> Self {
        TriggerBody::Compound(def)
    }
}

/// A registered trigger
#[derive(Debug)]
pub struct Trigger {
    body: TriggerBody,
    enabled: AtomicBool,
}

impl Trigger {
    pub fn new(body: TriggerBody) -> Self {
        Self {
            body,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        match &self.body {
            TriggerBody::Simple(def) => &def.name,
            TriggerBody::Compound(def) => &def.name,
        }
    }

    pub fn target(&self) -> &str {
        match &self.body {
            TriggerBody::Simple(def) => &def.target,
            TriggerBody::Compound(def) => &def.target,
        }
    }

    pub fn events(&self) -> &TriggerEvents {
        match &self.body {
            TriggerBody::Simple(def) => &def.events,
            TriggerBody::Compound(def) => &def.events,
        }
    }

    pub fn when(&self) -> Option<&WhenCondition> {
        match &self.body {
            TriggerBody::Simple(def) => def.when.as_ref(),
            TriggerBody::Compound(def) => def.when.as_ref(),
        }
    }

    pub fn is_compound(&self) -> bool {
        matches!(self.body, TriggerBody::Compound(_))
    }

    /// Timings this trigger has a handler for
    pub fn timings(&self) -> Vec<TriggerTiming> {
        match &self.body {
            TriggerBody::Simple(def) => vec![def.timing],
            TriggerBody::Compound(def) => [
                TriggerTiming::BeforeStatement,
                TriggerTiming::BeforeRow,
                TriggerTiming::AfterRow,
                TriggerTiming::AfterStatement,
            ]
            .into_iter()
            .filter(|t| def.section(*t).is_some())
            .collect(),
        }
    }

    pub fn handler(&self, timing: TriggerTiming) -> Option<&TriggerHandler> {
        match &self.body {
            TriggerBody::Simple(def) if def.timing == timing => Some(&def.handler),
            TriggerBody::Simple(_) => None,
            TriggerBody::Compound(def) => def.section(timing),
        }
    }

    /// Fresh statement-scoped state for a compound trigger
    pub fn new_state(&self) -> Option<StateBlock> {
        match &self.body {
            TriggerBody::Compound(def) => Some(StateBlock::declare(&def.name, &def.state)),
            TriggerBody::Simple(_) => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}
