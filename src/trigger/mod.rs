//! Trigger module
//!
//! Trigger definitions, the per-relation lookup tables built from them, the
//! scope handed to handler bodies and the dispatcher that runs DML
//! statements through their triggers.

pub mod context;
pub mod definition;
pub(crate) mod dispatcher;
pub mod lookup;

pub use context::{RowImage, TriggerInvocationContext, TriggerScope};
pub use definition::{
    CompoundTriggerDefinition, DmlEvent, Trigger, TriggerBody, TriggerDefinition, TriggerEvents,
    TriggerHandler, TriggerTiming, WhenCondition,
};
pub use lookup::TriggerTable;
