//! Package Instance Manager
//!
//! Instances are keyed by (package, session). Each key owns a slot with its
//! own mutex, so creation is serialized per key while unrelated packages and
//! sessions proceed independently. The slot records a failed initialization
//! and keeps reporting it instead of running the routine again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::definition::PackageDefinition;
use super::instance::PackageInstance;
use crate::error::{Error, Result};
use crate::transaction::SessionId;

type InstanceKey = (String, SessionId);

#[derive(Debug)]
enum Slot {
    Uninitialized,
    Ready(Arc<PackageInstance>),
    Failed(String),
}

/// Creates, caches and tears down per-session package instances
#[derive(Debug, Default)]
pub struct PackageInstanceManager {
    slots: Mutex<HashMap<InstanceKey, Arc<Mutex<Slot>>>>,
}

impl PackageInstanceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session's instance of a package, creating and initializing
    /// it on first reference
    pub fn get_or_create(
        &self,
        definition: &Arc<PackageDefinition>,
        session: SessionId,
    ) -> Result<Arc<PackageInstance>> {
        let key = (definition.name().to_lowercase(), session);
        let slot = {
            let mut slots = self.slots.lock().unwrap();
            slots
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(Slot::Uninitialized)))
                .clone()
        };

        let mut slot = slot.lock().unwrap();
        match &*slot {
            Slot::Ready(instance) => return Ok(instance.clone()),
            Slot::Failed(reason) => {
                return Err(Error::InitializationFailed {
                    package: definition.name().to_string(),
                    reason: reason.clone(),
                })
            }
            Slot::Uninitialized => {}
        }

        let mut state = definition.declare_state();
        match definition.initialize(&mut state) {
            Ok(()) => {
                debug!(package = %definition.name(), session, "package instance created");
                let instance = Arc::new(PackageInstance::new(definition.clone(), session, state));
                *slot = Slot::Ready(instance.clone());
                Ok(instance)
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(package = %definition.name(), session, error = %reason, "package initialization failed");
                *slot = Slot::Failed(reason.clone());
                Err(Error::InitializationFailed {
                    package: definition.name().to_string(),
                    reason,
                })
            }
        }
    }

    /// Existing instance, without creating one
    pub fn existing(&self, package: &str, session: SessionId) -> Option<Arc<PackageInstance>> {
        let slot = self
            .slots
            .lock()
            .unwrap()
            .get(&(package.to_lowercase(), session))
            .cloned()?;
        let slot = slot.lock().unwrap();
        match &*slot {
            Slot::Ready(instance) => Some(instance.clone()),
            _ => None,
        }
    }

    /// Drop one package's instance for a session; the next reference
    /// initializes a fresh one. Returns whether an instance existed.
    pub fn reset(&self, package: &str, session: SessionId) -> bool {
        let removed = self
            .slots
            .lock()
            .unwrap()
            .remove(&(package.to_lowercase(), session))
            .is_some();
        if removed {
            debug!(package, session, "package instance reset");
        }
        removed
    }

    /// Release every instance owned by a session. Safe to repeat.
    pub fn teardown(&self, session: SessionId) -> usize {
        let mut slots = self.slots.lock().unwrap();
        let before = slots.len();
        slots.retain(|(_, owner), _| *owner != session);
        let released = before - slots.len();
        if released > 0 {
            debug!(session, released, "package instances torn down");
        }
        released
    }

    /// Number of live or failed instance slots
    pub fn instance_count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}
