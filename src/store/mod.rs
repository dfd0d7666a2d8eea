//! Persistent state: every row is owned by the coordinator.

pub(crate) mod commands;
pub(crate) mod events;
pub(crate) mod hosts;
pub(crate) mod operators;
