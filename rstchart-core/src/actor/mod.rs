//! Actor runtime.
//!
//! Every actor owns a FIFO mailbox and is driven synchronously by the thread
//! that sends to it. Actors created together share a [`System`] that
//! allocates session ids, keeps a weak registry of live actors and schedules
//! delayed sends against a [`Clock`].

mod actor_ref;
#[cfg(feature = "tokio")]
mod driver;
mod logic;
mod mailbox;
mod observer;
mod scheduler;
mod system;

pub use actor_ref::{create_actor, ActorOptions, ActorRef};
#[cfg(feature = "tokio")]
pub use driver::TimerDriver;
pub use logic::{
    ActorLogic, ActorScope, ActorSnapshot, InitFn, ReducerFn, TaskFn, TaskLogic, TransitionLogic,
    ValueSnapshot,
};
pub use mailbox::ActorStatus;
pub use observer::{Observer, Subscription};
#[cfg(feature = "tokio")]
pub use scheduler::TokioClock;
pub use scheduler::{Clock, SimulatedClock, SystemClock};
pub use system::System;

pub(crate) use logic::ChildSpec;
