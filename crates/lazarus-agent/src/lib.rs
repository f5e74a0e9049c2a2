//! Lazarus resurrection-decision agent
//!
//! Sits between a kill-signal source and a container runtime: for every
//! kill event it decides whether the workload comes back, executes the
//! decision, records the outcome durably, and learns from the record.

mod admin;
mod agent;
mod dispatcher;
mod kill_source;

pub use admin::{AdminOps, AdminStatistics};
pub use agent::{Agent, LearningLoop};
pub use dispatcher::{DispatchReport, DispatchState, Dispatcher};
pub use kill_source::{ChannelKillSource, KillSource, StdinKillSource};
