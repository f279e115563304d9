//! Shared runtime
//!
//! A [`Runtime`] owns everything sessions share: the catalog, the row store,
//! the query engine, the row lock coordinator, package instances and the
//! transaction manager. It is cheap to clone; every clone refers to the same
//! state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use super::session::Session;
use crate::catalog::{Catalog, Schema, TableDef, ViewDef};
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::package::{PackageDefinition, PackageInstanceManager};
use crate::query::{MemoryQueryEngine, QueryEngine, QueryTemplate};
use crate::storage::Database;
use crate::transaction::{LockManager, RowLockCoordinator, TransactionManager};
use crate::trigger::{Trigger, TriggerBody};

#[derive(Clone)]
pub struct Runtime {
    catalog: Arc<Catalog>,
    database: Arc<Database>,
    query_engine: Arc<dyn QueryEngine>,
    locks: Arc<dyn RowLockCoordinator>,
    packages: Arc<PackageInstanceManager>,
    transactions: Arc<TransactionManager>,
    config: Arc<RuntimeConfig>,
    next_session: Arc<AtomicU64>,
}

impl Runtime {
    /// Runtime over a fresh in-memory database
    pub fn new(config: RuntimeConfig) -> Self {
        let database = Arc::new(Database::new());
        let query_engine = Arc::new(MemoryQueryEngine::new(database.clone()));
        Self::with_collaborators(config, database, query_engine, Arc::new(LockManager::new()))
    }

    /// Runtime with a caller-supplied query engine and lock coordinator
    pub fn with_collaborators(
        config: RuntimeConfig,
        database: Arc<Database>,
        query_engine: Arc<dyn QueryEngine>,
        locks: Arc<dyn RowLockCoordinator>,
    ) -> Self {
        Self {
            catalog: Arc::new(Catalog::new()),
            database,
            query_engine,
            locks,
            packages: Arc::new(PackageInstanceManager::new()),
            transactions: Arc::new(TransactionManager::new()),
            config: Arc::new(config),
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn create_table(&self, name: &str, schema: Schema) -> Result<Arc<TableDef>> {
        let def = self.catalog.create_table(TableDef::new(name, schema))?;
        self.database.create_table(def.clone())?;
        info!(table = %def.name(), "table created");
        Ok(def)
    }

    pub fn create_view(&self, name: &str, query: &str) -> Result<Arc<ViewDef>> {
        let view = self
            .catalog
            .create_view(ViewDef::new(name, QueryTemplate::parse(query)?))?;
        info!(view = %view.name, "view created");
        Ok(view)
    }

    pub fn create_package(&self, definition: PackageDefinition) -> Result<Arc<PackageDefinition>> {
        self.catalog.create_package(definition)
    }

    pub fn create_trigger(&self, body: impl Into<TriggerBody>) -> Result<Arc<Trigger>> {
        let trigger = self.catalog.create_trigger(body)?;
        info!(trigger = %trigger.name(), target = %trigger.target(), "trigger created");
        Ok(trigger)
    }

    pub fn set_trigger_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.catalog.set_trigger_enabled(name, enabled)
    }

    pub fn drop_trigger(&self, name: &str) -> Result<()> {
        self.catalog.drop_trigger(name)
    }

    /// Open a session for a principal
    pub fn connect(&self, principal: impl Into<String>) -> Session {
        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        Session::new(id, principal.into(), self.clone())
    }

    /// Open a session for the configured default principal
    pub fn connect_default(&self) -> Session {
        self.connect(self.config.default_principal.clone())
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn query_engine(&self) -> &Arc<dyn QueryEngine> {
        &self.query_engine
    }

    pub fn locks(&self) -> &Arc<dyn RowLockCoordinator> {
        &self.locks
    }

    pub fn packages(&self) -> &Arc<PackageInstanceManager> {
        &self.packages
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("tables", &self.catalog.list_tables())
            .field("views", &self.catalog.list_views())
            .field("packages", &self.catalog.list_packages())
            .field("config", &self.config)
            .finish()
    }
}
