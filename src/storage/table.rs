//! Table storage for ArcProc
//!
//! Rows live in numbered slots. A slot number is never reused, so a `RowId`
//! keeps addressing the same row for as long as it exists, whatever happens to
//! its column values.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::tuple::{RowId, Tuple, Value};
use crate::catalog::{Schema, TableDef};
use crate::error::{Error, Result};

/// A table combining schema and in-memory row storage
#[derive(Debug)]
pub struct Table {
    /// Table definition (metadata)
    def: Arc<TableDef>,
    /// Live rows by slot
    rows: BTreeMap<u64, Tuple>,
    /// Primary key values -> slot
    pk_index: HashMap<Vec<Value>, u64>,
    next_slot: u64,
}

impl Table {
    pub fn new(def: Arc<TableDef>) -> Self {
        Self {
            def,
            rows: BTreeMap::new(),
            pk_index: HashMap::new(),
            next_slot: 1,
        }
    }

    pub fn name(&self) -> &str {
        self.def.name()
    }

    pub fn schema(&self) -> &Schema {
        self.def.schema()
    }

    pub fn definition(&self) -> &Arc<TableDef> {
        &self.def
    }

    pub fn row_id(&self, slot: u64) -> RowId {
        RowId::new(self.def.name(), slot)
    }

    /// Slots of all live rows, in storage order
    pub fn slots(&self) -> Vec<u64> {
        self.rows.keys().copied().collect()
    }

    pub fn get(&self, slot: u64) -> Option<&Tuple> {
        self.rows.get(&slot)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Insert a new row, returning its slot
    pub fn insert(&mut self, tuple: Tuple) -> Result<u64> {
        let tuple = self.validate(tuple)?;
        let key = self.primary_key(&tuple);
        if let Some(key) = &key {
            if self.pk_index.contains_key(key) {
                return Err(Error::PrimaryKeyViolation(self.name().to_string()));
            }
        }

        let slot = self.next_slot;
        self.next_slot += 1;
        if let Some(key) = key {
            self.pk_index.insert(key, slot);
        }
        self.rows.insert(slot, tuple);
        Ok(slot)
    }

    /// Replace a row's values, returning the before image
    pub fn update(&mut self, slot: u64, tuple: Tuple) -> Result<Tuple> {
        let tuple = self.validate(tuple)?;
        let before = self
            .rows
            .get(&slot)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("row {} does not exist", self.row_id(slot))))?;

        let old_key = self.primary_key(&before);
        let new_key = self.primary_key(&tuple);
        if new_key != old_key {
            if let Some(key) = &new_key {
                if self.pk_index.contains_key(key) {
                    return Err(Error::PrimaryKeyViolation(self.name().to_string()));
                }
            }
            if let Some(key) = old_key {
                self.pk_index.remove(&key);
            }
            if let Some(key) = new_key {
                self.pk_index.insert(key, slot);
            }
        }

        self.rows.insert(slot, tuple);
        Ok(before)
    }

    /// Remove a row, returning its values
    pub fn delete(&mut self, slot: u64) -> Result<Tuple> {
        let before = self
            .rows
            .remove(&slot)
            .ok_or_else(|| Error::Internal(format!("row {} does not exist", self.row_id(slot))))?;
        if let Some(key) = self.primary_key(&before) {
            self.pk_index.remove(&key);
        }
        Ok(before)
    }

    /// Put a deleted row back into its original slot (undo of delete)
    pub fn restore(&mut self, slot: u64, tuple: Tuple) {
        if let Some(key) = self.primary_key(&tuple) {
            self.pk_index.insert(key, slot);
        }
        self.rows.insert(slot, tuple);
    }

    /// Check arity, types and nullability; coerce values to column types
    fn validate(&self, tuple: Tuple) -> Result<Tuple> {
        let schema = self.def.schema();
        if tuple.len() != schema.column_count() {
            return Err(Error::ArityMismatch {
                table: self.name().to_string(),
                expected: schema.column_count(),
                found: tuple.len(),
            });
        }

        let mut values = Vec::with_capacity(tuple.len());
        for (value, column) in tuple.into_values().into_iter().zip(schema.columns()) {
            if value.is_null() && !column.nullable {
                return Err(Error::NullNotAllowed(column.name.clone()));
            }
            if !column.data_type.accepts(&value) {
                return Err(Error::Internal(format!(
                    "cannot store {} in column '{}' of type {}",
                    value.type_name(),
                    column.name,
                    column.data_type
                )));
            }
            values.push(column.data_type.coerce(value));
        }
        Ok(Tuple::new(values))
    }

    fn primary_key(&self, tuple: &Tuple) -> Option<Vec<Value>> {
        let indices = self.def.schema().primary_key_indices();
        if indices.is_empty() {
            return None;
        }
        Some(
            indices
                .iter()
                .map(|&i| tuple.get(i).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};

    fn emp_table() -> Table {
        let schema = Schema::from_columns(vec![
            Column::new("id", DataType::Integer).primary_key(true),
            Column::new("salary", DataType::Float),
        ]);
        Table::new(Arc::new(TableDef::new("emp", schema)))
    }

    fn row(id: i64, salary: f64) -> Tuple {
        Tuple::new(vec![Value::Integer(id), Value::Float(salary)])
    }

    #[test]
    fn test_insert_and_get() {
        let mut table = emp_table();
        let slot = table.insert(row(1, 100.0)).unwrap();
        assert_eq!(table.get(slot), Some(&row(1, 100.0)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_primary_key_violation() {
        let mut table = emp_table();
        table.insert(row(1, 100.0)).unwrap();
        assert!(matches!(
            table.insert(row(1, 200.0)),
            Err(Error::PrimaryKeyViolation(_))
        ));
    }

    #[test]
    fn test_update_keeps_slot_when_key_changes() {
        let mut table = emp_table();
        let slot = table.insert(row(1, 100.0)).unwrap();
        let before = table.update(slot, row(7, 100.0)).unwrap();
        assert_eq!(before, row(1, 100.0));
        assert_eq!(table.get(slot), Some(&row(7, 100.0)));

        // old key is free again
        table.insert(row(1, 5.0)).unwrap();
    }

    #[test]
    fn test_delete_and_restore() {
        let mut table = emp_table();
        let slot = table.insert(row(1, 100.0)).unwrap();
        let before = table.delete(slot).unwrap();
        assert!(table.get(slot).is_none());

        table.restore(slot, before);
        assert_eq!(table.get(slot), Some(&row(1, 100.0)));
        assert!(table.insert(row(1, 1.0)).is_err());
    }

    #[test]
    fn test_validation() {
        let mut table = emp_table();
        assert!(matches!(
            table.insert(Tuple::new(vec![Value::Integer(1)])),
            Err(Error::ArityMismatch { expected: 2, found: 1, .. })
        ));
        assert!(matches!(
            table.insert(Tuple::new(vec![Value::Null, Value::Null])),
            Err(Error::NullNotAllowed(c)) if c == "id"
        ));

        let slot = table
            .insert(Tuple::new(vec![Value::Integer(2), Value::Integer(10)]))
            .unwrap();
        assert_eq!(table.get(slot).unwrap().get(1), Some(&Value::Float(10.0)));
    }
}
