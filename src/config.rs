//! Runtime configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cursor::LockAcquisition;
use crate::error::{Error, Result};
use crate::transaction::WaitPolicy;

/// Default nesting limit for statements fired from trigger handlers
pub const DEFAULT_MAX_TRIGGER_DEPTH: usize = 32;

/// Settings shared by every session of a runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How long row lock requests may wait
    pub lock_wait: WaitPolicy,
    /// When FOR UPDATE cursors take their locks
    pub lock_acquisition: LockAcquisition,
    /// Maximum nesting of DML statements issued by trigger handlers
    pub max_trigger_depth: usize,
    /// Principal for sessions connected without one
    pub default_principal: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            lock_wait: WaitPolicy::default(),
            lock_acquisition: LockAcquisition::OnFetch,
            max_trigger_depth: DEFAULT_MAX_TRIGGER_DEPTH,
            default_principal: "ARCPROC".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_wait(mut self, wait: WaitPolicy) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn lock_acquisition(mut self, acquisition: LockAcquisition) -> Self {
        self.lock_acquisition = acquisition;
        self
    }

    pub fn max_trigger_depth(mut self, depth: usize) -> Self {
        self.max_trigger_depth = depth;
        self
    }

    pub fn default_principal(mut self, principal: impl Into<String>) -> Self {
        self.default_principal = principal.into();
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
