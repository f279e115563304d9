//! System Catalog for ArcProc
//!
//! This module manages metadata about tables, views, packages and triggers.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::schema::{TableDef, ViewDef};
use crate::error::{Error, Result};
use crate::package::PackageDefinition;
use crate::trigger::{Trigger, TriggerBody, TriggerTable, TriggerTiming};

/// A named relation DML can target
#[derive(Debug, Clone)]
pub enum Relation {
    Table(Arc<TableDef>),
    View(Arc<ViewDef>),
}

impl Relation {
    pub fn name(&self) -> &str {
        match self {
            Relation::Table(def) => def.name(),
            Relation::View(def) => &def.name,
        }
    }

    pub fn is_view(&self) -> bool {
        matches!(self, Relation::View(_))
    }
}

/// System Catalog - manages all runtime metadata
#[derive(Debug, Default)]
pub struct Catalog {
    /// Table definitions by lowercase name
    tables: RwLock<HashMap<String, Arc<TableDef>>>,
    /// View definitions by lowercase name
    views: RwLock<HashMap<String, Arc<ViewDef>>>,
    /// Package definitions by lowercase name
    packages: RwLock<HashMap<String, Arc<PackageDefinition>>>,
    /// Triggers in registration order
    triggers: RwLock<IndexMap<String, Arc<Trigger>>>,
    /// Lookup table per relation, rebuilt when its triggers change
    trigger_tables: RwLock<HashMap<String, Arc<TriggerTable>>>,
}

impl Catalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_name_free(&self, name: &str) -> Result<()> {
        let key = name.to_lowercase();
        if self.tables.read().unwrap().contains_key(&key)
            || self.views.read().unwrap().contains_key(&key)
        {
            return Err(Error::RelationAlreadyExists(name.to_string()));
        }
        Ok(())
    }

    /// Register a table definition
    pub fn create_table(&self, def: TableDef) -> Result<Arc<TableDef>> {
        self.ensure_name_free(def.name())?;
        let def = Arc::new(def);
        self.tables
            .write()
            .unwrap()
            .insert(def.name().to_lowercase(), def.clone());
        debug!(table = %def.name(), "table registered");
        Ok(def)
    }

    /// Get a table by name
    pub fn get_table(&self, name: &str) -> Result<Arc<TableDef>> {
        self.tables
            .read()
            .unwrap()
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Register a view; the tables it reads must exist
    pub fn create_view(&self, view: ViewDef) -> Result<Arc<ViewDef>> {
        self.ensure_name_free(&view.name)?;
        self.get_table(&view.query.from)?;
        if let Some(join) = &view.query.join {
            self.get_table(&join.table)?;
        }
        let view = Arc::new(view);
        self.views
            .write()
            .unwrap()
            .insert(view.name.to_lowercase(), view.clone());
        debug!(view = %view.name, "view registered");
        Ok(view)
    }

    pub fn get_view(&self, name: &str) -> Result<Arc<ViewDef>> {
        self.views
            .read()
            .unwrap()
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Resolve a table or view
    pub fn relation(&self, name: &str) -> Result<Relation> {
        if let Ok(table) = self.get_table(name) {
            return Ok(Relation::Table(table));
        }
        self.get_view(name).map(Relation::View)
    }

    /// List all table names
    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .unwrap()
            .values()
            .map(|t| t.name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn list_views(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .views
            .read()
            .unwrap()
            .values()
            .map(|v| v.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Register a package definition
    pub fn create_package(&self, def: PackageDefinition) -> Result<Arc<PackageDefinition>> {
        let mut packages = self.packages.write().unwrap();
        let key = def.name().to_lowercase();
        if packages.contains_key(&key) {
            return Err(Error::PackageAlreadyExists(def.name().to_string()));
        }
        let def = Arc::new(def);
        packages.insert(key, def.clone());
        debug!(package = %def.name(), "package registered");
        Ok(def)
    }

    pub fn get_package(&self, name: &str) -> Result<Arc<PackageDefinition>> {
        self.packages
            .read()
            .unwrap()
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| Error::PackageNotFound(name.to_string()))
    }

    pub fn list_packages(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .packages
            .read()
            .unwrap()
            .values()
            .map(|p| p.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Register a trigger and rebuild its relation's lookup table
    pub fn create_trigger(&self, body: impl Into<TriggerBody>) -> Result<Arc<Trigger>> {
        let trigger = Trigger::new(body.into());
        let relation = self.relation(trigger.target())?;
        Self::validate_trigger(&trigger, &relation)?;

        let key = trigger.name().to_lowercase();
        let target = relation.name().to_lowercase();
        let trigger = Arc::new(trigger);
        {
            let mut triggers = self.triggers.write().unwrap();
            if triggers.contains_key(&key) {
                return Err(Error::TriggerAlreadyExists(trigger.name().to_string()));
            }
            triggers.insert(key, trigger.clone());
        }
        self.rebuild_trigger_table(&target);
        debug!(trigger = %trigger.name(), relation = %target, "trigger registered");
        Ok(trigger)
    }

    fn validate_trigger(trigger: &Trigger, relation: &Relation) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidTriggerTarget {
            trigger: trigger.name().to_string(),
            reason: reason.to_string(),
        };
        let timings = trigger.timings();
        if timings.is_empty() {
            return Err(invalid("no timing section is defined"));
        }

        match relation {
            Relation::View(_) => {
                if timings.iter().any(|t| *t != TriggerTiming::InsteadOf) {
                    return Err(invalid("views only accept INSTEAD OF triggers"));
                }
            }
            Relation::Table(def) => {
                if timings.contains(&TriggerTiming::InsteadOf) {
                    return Err(invalid("INSTEAD OF triggers require a view"));
                }
                for column in trigger.events().update_columns() {
                    if def.get_column(column).is_none() {
                        return Err(Error::ColumnNotFound(column.clone(), def.name().to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn drop_trigger(&self, name: &str) -> Result<()> {
        let removed = self
            .triggers
            .write()
            .unwrap()
            .shift_remove(&name.to_lowercase())
            .ok_or_else(|| Error::TriggerNotFound(name.to_string()))?;
        self.rebuild_trigger_table(&removed.target().to_lowercase());
        Ok(())
    }

    pub fn get_trigger(&self, name: &str) -> Result<Arc<Trigger>> {
        self.triggers
            .read()
            .unwrap()
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| Error::TriggerNotFound(name.to_string()))
    }

    /// ALTER TRIGGER ... ENABLE / DISABLE
    pub fn set_trigger_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.get_trigger(name)?.set_enabled(enabled);
        Ok(())
    }

    /// Trigger lookup table of a relation
    pub fn trigger_table(&self, relation: &str) -> Arc<TriggerTable> {
        self.trigger_tables
            .read()
            .unwrap()
            .get(&relation.to_lowercase())
            .cloned()
            .unwrap_or_else(|| Arc::new(TriggerTable::empty()))
    }

    fn rebuild_trigger_table(&self, relation: &str) {
        let table = {
            let triggers = self.triggers.read().unwrap();
            TriggerTable::build(
                triggers
                    .values()
                    .filter(|t| t.target().eq_ignore_ascii_case(relation)),
            )
        };
        let mut tables = self.trigger_tables.write().unwrap();
        if table.is_empty() {
            tables.remove(relation);
        } else {
            tables.insert(relation.to_string(), Arc::new(table));
        }
    }
}
