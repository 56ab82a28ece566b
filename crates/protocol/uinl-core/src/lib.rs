//! UINL interpreter core (toolkit-independent).
//!
//! An application describes a tree of interactive components with small
//! declarative JSON messages. [`Engine`] keeps the live tree, applies each
//! update, runs scheduled and animated changes on a virtual clock, and reports
//! user interaction back as address-qualified messages through a
//! [`Transport`]. Rendering is left to reaction hooks registered per class and
//! property.

pub mod address;
pub mod animation;
pub mod capability;
pub mod class;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod keys;
pub mod scheduler;
pub mod transport;
pub mod tree;
mod update;
pub mod value;

pub use address::{Address, Step};
pub use animation::{AnimationOptions, AnimationState, Animator, StepOutcome};
pub use capability::{Capability, CapabilityTable};
pub use class::{ClassSpec, ClassTable, Reaction};
pub use config::{Config, TriggerMode};
pub use defaults::DefaultsScope;
pub use engine::Engine;
pub use error::{RequireError, UpdateError};
pub use scheduler::{ScheduleEntry, ScheduleKind, Scheduler};
pub use transport::{Outbox, Transport};
pub use tree::{Node, NodeId, Tree};
pub use value::{Family, Message};
