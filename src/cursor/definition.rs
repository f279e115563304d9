//! Cursor definitions
//!
//! A cursor definition is a query template, its formal parameters and a lock
//! mode. Definitions are validated when built: every bind parameter used by
//! the query must be a declared formal, and FOR UPDATE requires a query whose
//! rows map to a single table.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::query::{Bindings, QueryTemplate};
use crate::storage::Value;

/// Row locking mode of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    #[default]
    None,
    ForUpdate,
}

/// Formal cursor parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorParam {
    pub name: String,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct CursorDefinition {
    name: String,
    query: QueryTemplate,
    params: Vec<CursorParam>,
    lock_mode: LockMode,
}

impl CursorDefinition {
    pub fn builder(name: impl Into<String>, query: impl Into<String>) -> CursorDefinitionBuilder {
        CursorDefinitionBuilder {
            name: name.into(),
            query: query.into(),
            params: Vec::new(),
            lock_mode: LockMode::None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn query(&self) -> &QueryTemplate {
        &self.query
    }

    pub fn params(&self) -> &[CursorParam] {
        &self.params
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    pub fn is_locking(&self) -> bool {
        self.lock_mode == LockMode::ForUpdate
    }

    /// Bind actual arguments positionally, falling back to parameter defaults
    pub fn bind(&self, args: &[Value]) -> Result<Bindings> {
        if args.len() > self.params.len() {
            return Err(Error::ParameterCount {
                cursor: self.name.clone(),
                expected: self.params.len(),
                found: args.len(),
            });
        }

        let mut binds = Bindings::new();
        for (i, param) in self.params.iter().enumerate() {
            let value = match (args.get(i), &param.default) {
                (Some(value), _) => value.clone(),
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(Error::MissingArgument {
                        cursor: self.name.clone(),
                        param: param.name.clone(),
                    })
                }
            };
            binds.insert(param.name.to_lowercase(), value);
        }
        Ok(binds)
    }

    fn validate(&self) -> Result<()> {
        if self.is_locking() && !self.query.has_single_target() {
            return Err(Error::NotUpdatable(self.name.clone()));
        }
        for used in self.query.params() {
            if !self.params.iter().any(|p| p.name.eq_ignore_ascii_case(&used)) {
                return Err(Error::UnknownBindParameter(used));
            }
        }
        Ok(())
    }
}

/// Builder for [`CursorDefinition`]
#[derive(Debug, Clone)]
pub struct CursorDefinitionBuilder {
    name: String,
    query: String,
    params: Vec<CursorParam>,
    lock_mode: LockMode,
}

impl CursorDefinitionBuilder {
    /// Declare a required parameter
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(CursorParam {
            name: name.into(),
            default: None,
        });
        self
    }

    /// Declare a parameter with a default value
    pub fn param_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.params.push(CursorParam {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    pub fn params(mut self, params: Vec<CursorParam>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn for_update(mut self) -> Self {
        self.lock_mode = LockMode::ForUpdate;
        self
    }

    pub fn lock_mode(mut self, mode: LockMode) -> Self {
        self.lock_mode = mode;
        self
    }

    pub fn build(self) -> Result<CursorDefinition> {
        let definition = CursorDefinition {
            query: QueryTemplate::parse(&self.query)?,
            name: self.name,
            params: self.params,
            lock_mode: self.lock_mode,
        };
        definition.validate()?;
        Ok(definition)
    }
}
