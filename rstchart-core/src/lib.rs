//! # rstchart-core
//!
//! Statechart interpreter and actor runtime for rstchart.
//!
//! This crate provides:
//! - Machine definition parsing and validation
//! - Configuration resolution, transition selection and conflict removal
//! - Microstep and macrostep execution with history and final states
//! - Action resolution with deferred effects
//! - Actors with FIFO mailboxes, delayed sends and snapshot persistence

pub mod action;
pub mod actor;
pub mod config;
pub mod configuration;
pub mod definition;
pub mod error;
pub mod event;
pub mod guard;
pub mod implementations;
pub mod machine;
pub mod node;
pub mod snapshot;
pub mod value;

mod macrostep;
mod microstep;
mod resolve;
mod selection;

pub use action::{Action, ActionArgs, Delay, ExecutedAction, SendTarget};
pub use actor::{
    create_actor, ActorLogic, ActorOptions, ActorRef, ActorScope, ActorSnapshot, ActorStatus,
    Clock, Observer, SimulatedClock, Subscription, System, SystemClock, TaskLogic,
    TransitionLogic,
};
#[cfg(feature = "tokio")]
pub use actor::{TimerDriver, TokioClock};
pub use config::{ClockKind, ConfigError, RuntimeConfig};
pub use definition::{MachineConfig, MachineDefinition};
pub use error::{ActionError, ActorError, CoreError};
pub use event::{Event, EventDescriptor};
pub use guard::{Guard, GuardEvaluator, GuardExpr};
pub use implementations::Implementations;
pub use machine::Machine;
pub use snapshot::{MachineSnapshot, PersistedSnapshot, SnapshotStatus};
pub use value::StateValue;
