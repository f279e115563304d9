//! Per-relation trigger lookup table
//!
//! Built once per relation when its trigger set changes and cached by the
//! catalog. Entries are keyed by (timing, event) and keep registration order,
//! which is the order handlers fire in.

use std::collections::HashMap;
use std::sync::Arc;

use super::definition::{DmlEvent, Trigger, TriggerTiming};

#[derive(Debug, Default)]
pub struct TriggerTable {
    entries: HashMap<(TriggerTiming, DmlEvent), Vec<Arc<Trigger>>>,
    compound: HashMap<DmlEvent, Vec<Arc<Trigger>>>,
}

impl TriggerTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the table from triggers given in registration order
    pub fn build<'a>(triggers: impl IntoIterator<Item = &'a Arc<Trigger>>) -> Self {
        let mut table = Self::default();
        for trigger in triggers {
            for event in [DmlEvent::Insert, DmlEvent::Update, DmlEvent::Delete] {
                if !trigger.events().contains(event) {
                    continue;
                }
                for timing in trigger.timings() {
                    table
                        .entries
                        .entry((timing, event))
                        .or_default()
                        .push(trigger.clone());
                }
                if trigger.is_compound() {
                    table.compound.entry(event).or_default().push(trigger.clone());
                }
            }
        }
        table
    }

    /// Triggers registered for a timing and event, enabled or not
    pub fn lookup(&self, timing: TriggerTiming, event: DmlEvent) -> &[Arc<Trigger>] {
        self.entries
            .get(&(timing, event))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Compound triggers listening to an event
    pub fn compound(&self, event: DmlEvent) -> &[Arc<Trigger>] {
        self.compound.get(&event).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
