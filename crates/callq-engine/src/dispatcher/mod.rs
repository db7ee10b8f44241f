//! # Call Dispatch
//!
//! The [`DistributionManager`] and its supporting machinery: the command
//! queue consumed by the single dispatcher task, the cross-fifo selection
//! rule, and the offer fan-out.
//!
//! All queue and agent state is owned by one spawned task. Public
//! operations, event-bus deliveries, timer fires and offer resolutions are
//! all turned into commands on the same channel, which makes the core
//! invariants structural: no two events are processed concurrently against
//! the same fifo or agent, and an agent claimed for one fifo's attempt
//! cannot be claimed by another until that attempt resolves.

mod commands;
mod core;
mod selection;
mod types;

pub use self::core::DistributionManager;
pub use self::types::{AcdStats, AgentOptions, AgentsOptions, PendingDispatch, QueueOptions};
