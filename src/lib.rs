//! # rstchart
//!
//! Statecharts as actors.
//!
//! A machine is described as a JSON state-node tree, built into a
//! [`MachineDefinition`], paired with named [`Implementations`] and run
//! either as a pure function over snapshots ([`Machine::transition`]) or as
//! an actor with a mailbox ([`create_actor`]).

pub use rstchart_core::*;
