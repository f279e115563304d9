//! Schema definitions for ArcProc
//!
//! This module defines relation schemas, column metadata and view definitions.

use super::types::DataType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::query::QueryTemplate;

/// Column definition in a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Data type
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Is this column nullable?
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Is this part of the primary key?
    #[serde(default)]
    pub primary_key: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    /// Create a new nullable column
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
        }
    }

    /// Set nullable flag
    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Set primary key flag
    pub fn primary_key(mut self, pk: bool) -> Self {
        self.primary_key = pk;
        if pk {
            self.nullable = false;
        }
        self
    }
}

/// Table schema - defines the structure of a relation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Column>", into = "Vec<Column>")]
pub struct Schema {
    /// Ordered list of columns
    columns: Vec<Column>,
    /// Column name to index mapping
    name_to_index: HashMap<String, usize>,
}

impl Schema {
    /// Create a new empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a schema from a list of columns
    pub fn from_columns(columns: Vec<Column>) -> Self {
        let mut schema = Self::new();
        for col in columns {
            schema.add_column(col);
        }
        schema
    }

    /// Add a column to the schema
    pub fn add_column(&mut self, column: Column) {
        self.name_to_index
            .insert(column.name.to_lowercase(), self.columns.len());
        self.columns.push(column);
    }

    /// Column names are matched case-insensitively
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.get_column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(&name.to_lowercase()).copied()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column_index(name).is_some()
    }

    /// Positions of the primary key columns
    pub fn primary_key_indices(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

impl From<Vec<Column>> for Schema {
    fn from(columns: Vec<Column>) -> Self {
        Self::from_columns(columns)
    }
}

impl From<Schema> for Vec<Column> {
    fn from(schema: Schema) -> Self {
        schema.columns
    }
}

/// Table definition - full table metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name
    pub name: String,
    /// Table schema
    pub columns: Schema,
}

impl TableDef {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            columns: schema,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.columns
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.get_column(name)
    }
}

/// View definition: a named query whose rows can only be changed through
/// INSTEAD OF triggers
#[derive(Debug, Clone)]
pub struct ViewDef {
    pub name: String,
    pub query: QueryTemplate,
}

impl ViewDef {
    pub fn new(name: impl Into<String>, query: QueryTemplate) -> Self {
        Self {
            name: name.into(),
            query,
        }
    }
}
