//! Package definitions
//!
//! A package definition is registered once and shared by every session. It
//! declares the package's variables, its cursors and an optional
//! initialization routine run once per session instance.

use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

use super::instance::StateBlock;
use crate::cursor::CursorDefinition;
use crate::error::Result;
use crate::storage::Value;

/// Initialization routine of a package body
pub type InitRoutine = Arc<dyn Fn(&mut StateBlock) -> Result<()> + Send + Sync>;

/// Declared variable with its initial value
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub initial: Value,
}

impl VarDecl {
    pub fn new(name: impl Into<String>, initial: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            initial: initial.into(),
        }
    }
}

/// Immutable, process-wide package definition
pub struct PackageDefinition {
    name: String,
    variables: Vec<VarDecl>,
    cursors: IndexMap<String, Arc<CursorDefinition>>,
    initializer: Option<InitRoutine>,
}

impl PackageDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: Vec::new(),
            cursors: IndexMap::new(),
            initializer: None,
        }
    }

    /// Declare a variable
    pub fn variable(mut self, name: impl Into<String>, initial: impl Into<Value>) -> Self {
        self.variables.push(VarDecl::new(name, initial));
        self
    }

    /// Declare a package cursor
    pub fn cursor(mut self, definition: CursorDefinition) -> Self {
        self.cursors
            .insert(definition.name().to_lowercase(), Arc::new(definition));
        self
    }

    /// Set the initialization routine
    pub fn initializer<F>(mut self, init: F) -> Self
    where
        F: Fn(&mut StateBlock) -> Result<()> + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(init));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variables(&self) -> &[VarDecl] {
        &self.variables
    }

    pub fn get_cursor(&self, name: &str) -> Option<&Arc<CursorDefinition>> {
        self.cursors.get(&name.to_lowercase())
    }

    pub fn cursor_names(&self) -> Vec<String> {
        self.cursors.values().map(|c| c.name().to_string()).collect()
    }

    /// Build a fresh state block holding every declared variable at its
    /// initial value
    pub fn declare_state(&self) -> StateBlock {
        StateBlock::declare(&self.name, &self.variables)
    }

    /// Run the initialization routine, if any
    pub fn initialize(&self, state: &mut StateBlock) -> Result<()> {
        match &self.initializer {
            Some(init) => init(state),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for PackageDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageDefinition")
            .field("name", &self.name)
            .field("variables", &self.variables)
            .field("cursors", &self.cursors.keys().collect::<Vec<_>>())
            .field("initializer", &self.initializer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_state() {
        let def = PackageDefinition::new("emp_pkg")
            .variable("g_count", 0)
            .variable("g_label", Value::Null)
            .initializer(|state| state.set("g_label", "ready"));

        let mut state = def.declare_state();
        assert_eq!(state.get("g_count").unwrap(), Value::Integer(0));
        assert_eq!(state.get("G_LABEL").unwrap(), Value::Null);

        def.initialize(&mut state).unwrap();
        assert_eq!(state.get("g_label").unwrap(), Value::from("ready"));
    }

    #[test]
    fn test_package_cursor_lookup() {
        let cursor = CursorDefinition::builder("c_emp", "SELECT * FROM emp")
            .build()
            .unwrap();
        let def = PackageDefinition::new("p").cursor(cursor);
        assert!(def.get_cursor("C_EMP").is_some());
        assert!(def.get_cursor("other").is_none());
        assert_eq!(def.cursor_names(), vec!["c_emp".to_string()]);
    }
}
