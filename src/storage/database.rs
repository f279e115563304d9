//! Shared row store
//!
//! The `Database` owns every table's rows. Sessions reach it concurrently;
//! each table sits behind its own mutex and every operation holds it only for
//! the duration of a single row access.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use super::table::Table;
use super::tuple::{RowId, Tuple};
use crate::catalog::TableDef;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct Database {
    tables: RwLock<HashMap<String, Arc<Mutex<Table>>>>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage for a table defined in the catalog
    pub fn create_table(&self, def: Arc<TableDef>) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let key = def.name().to_lowercase();
        if tables.contains_key(&key) {
            return Err(Error::RelationAlreadyExists(def.name().to_string()));
        }
        debug!(table = %def.name(), "table storage created");
        tables.insert(key, Arc::new(Mutex::new(Table::new(def))));
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<Arc<Mutex<Table>>> {
        self.tables
            .read()
            .unwrap()
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    pub fn table_def(&self, name: &str) -> Result<Arc<TableDef>> {
        let table = self.table(name)?;
        let def = table.lock().unwrap().definition().clone();
        Ok(def)
    }

    /// Read the current values of a row
    pub fn read(&self, row_id: &RowId) -> Result<Option<Tuple>> {
        let table = self.table(&row_id.table)?;
        let guard = table.lock().unwrap();
        Ok(guard.get(row_id.slot).cloned())
    }

    pub fn slots(&self, table: &str) -> Result<Vec<u64>> {
        let table = self.table(table)?;
        let slots = table.lock().unwrap().slots();
        Ok(slots)
    }

    pub fn insert(&self, table: &str, tuple: Tuple) -> Result<RowId> {
        self.insert_with(table, tuple, |_| Ok(()))
    }

    /// Insert a row and run `reserve` on its id before any other session can
    /// see it. If `reserve` fails the row is removed again.
    pub fn insert_with<F>(&self, table: &str, tuple: Tuple, reserve: F) -> Result<RowId>
    where
        F: FnOnce(&RowId) -> Result<()>,
    {
        let table = self.table(table)?;
        let mut guard = table.lock().unwrap();
        let slot = guard.insert(tuple)?;
        let row_id = guard.row_id(slot);
        if let Err(e) = reserve(&row_id) {
            guard.delete(slot)?;
            return Err(e);
        }
        Ok(row_id)
    }

    pub fn update(&self, row_id: &RowId, tuple: Tuple) -> Result<Tuple> {
        let table = self.table(&row_id.table)?;
        let mut guard = table.lock().unwrap();
        guard.update(row_id.slot, tuple)
    }

    pub fn delete(&self, row_id: &RowId) -> Result<Tuple> {
        let table = self.table(&row_id.table)?;
        let mut guard = table.lock().unwrap();
        guard.delete(row_id.slot)
    }

    pub fn restore(&self, row_id: &RowId, tuple: Tuple) -> Result<()> {
        let table = self.table(&row_id.table)?;
        table.lock().unwrap().restore(row_id.slot, tuple);
        Ok(())
    }

    pub fn row_count(&self, table: &str) -> Result<usize> {
        let table = self.table(table)?;
        let count = table.lock().unwrap().len();
        Ok(count)
    }
}
