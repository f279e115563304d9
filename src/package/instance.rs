//! Package instances and their state blocks

use indexmap::IndexMap;
use std::sync::{Arc, Mutex};

use super::definition::{PackageDefinition, VarDecl};
use crate::error::{Error, Result};
use crate::storage::Value;
use crate::transaction::SessionId;

/// Named variables owned by one package instance or one compound trigger
/// firing. Lookups are case-insensitive; only declared names can be read or
/// assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct StateBlock {
    owner: String,
    vars: IndexMap<String, Value>,
}

impl StateBlock {
    pub fn declare(owner: &str, decls: &[VarDecl]) -> Self {
        Self {
            owner: owner.to_string(),
            vars: decls
                .iter()
                .map(|d| (d.name.to_lowercase(), d.initial.clone()))
                .collect(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        self.vars
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| self.unknown(name))
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        match self.vars.get_mut(&name.to_lowercase()) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(self.unknown(name)),
        }
    }

    /// Add `delta` to an integer variable, treating NULL as zero
    pub fn increment(&mut self, name: &str, delta: i64) -> Result<i64> {
        let current = self.get(name)?;
        let next = match current {
            Value::Null => delta,
            other => other.as_i64().ok_or_else(|| {
                Error::Internal(format!(
                    "variable '{}' holds {}, not an integer",
                    name,
                    other.type_name()
                ))
            })? + delta,
        };
        self.set(name, next)?;
        Ok(next)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    fn unknown(&self, name: &str) -> Error {
        Error::UnknownVariable(name.to_string(), self.owner.clone())
    }
}

/// One session's live copy of a package's variables
#[derive(Debug)]
pub struct PackageInstance {
    definition: Arc<PackageDefinition>,
    session: SessionId,
    state: Mutex<StateBlock>,
}

impl PackageInstance {
    pub(crate) fn new(definition: Arc<PackageDefinition>, session: SessionId, state: StateBlock) -> Self {
        Self {
            definition,
            session,
            state: Mutex::new(state),
        }
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn definition(&self) -> &Arc<PackageDefinition> {
        &self.definition
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        self.state.lock().unwrap().get(name)
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.state.lock().unwrap().set(name, value)
    }

    /// Run `f` with exclusive access to the whole state block
    pub fn with_state<R>(&self, f: impl FnOnce(&mut StateBlock) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }
}
