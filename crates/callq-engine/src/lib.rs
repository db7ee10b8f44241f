//! # CALLQ Engine
//!
//! An automatic call distribution (ACD) core: named waiting-call queues
//! ("fifos") per routing domain, a pool of agents shared across queues,
//! and the decision, whenever an agent becomes available, of which waiting
//! call it receives next.
//!
//! ## Overview
//!
//! The engine is the dispatch brain of a call-center telephony platform:
//!
//! - **Call Queueing**: priority/age-ordered waiting lists with per-call
//!   timeouts and lazy domain/fifo creation
//! - **Agent Management**: a global agent directory with an availability
//!   state machine (`available` / `ringing` / `busy` / `resting`) driven by
//!   call and registration events
//! - **Dispatch**: cross-fifo selection (longest-waiting fifo wins) with
//!   exactly-once delivery, ringall and enterprise offer modes, and a
//!   configurable post-call debounce before an agent is re-offered work
//!
//! The underlying signaling stack stays outside: it publishes call and
//! registration events on an [`EventSource`](events::EventSource) and
//! delivers offers to agents through the [`DispatchHandler`] trait.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             DistributionManager             │
//! │  queue() / addagent() / addagents() / stats │
//! ├──────────────────┬──────────────────────────┤
//! │   command queue  │     event forwarding     │
//! │  (one dispatcher task owns all state)       │
//! ├─────────────────────────────────────────────┤
//! │   Domain ─► Fifo (waiting calls, agents)    │
//! │   Agent directory (global, by URI)          │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use callq_engine::prelude::*;
//!
//! struct MyStack;
//!
//! #[async_trait]
//! impl DispatchHandler for MyStack {
//!     async fn offer(&self, call: OfferedCall, agent: AgentId) -> OfferResponse {
//!         // ring the agent's endpoint here
//!         println!("offering {} to {}", call.id, agent);
//!         OfferResponse::Accepted
//!     }
//! }
//!
//! # async fn example() -> Result<()> {
//! let events = EventSource::default();
//! let manager = DistributionManager::new(AcdConfig::default(), &events, Arc::new(MyStack))?;
//!
//! // register the queue membership
//! manager.addagents(AgentsOptions {
//!     domain: "example.com".into(),
//!     queue: "support".into(),
//!     agents: vec!["1000@example.com".into(), "1001@example.com".into()],
//!     mode: None,
//! }).await?;
//!
//! // queue a call; the future resolves when an agent answers
//! let pending = manager.queue(QueueOptions::new("example.com", "support", "+15550100")).await?;
//! let dispatched = pending.await?;
//! println!("call {} answered by {}", dispatched.id, dispatched.agent);
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Modules
//!
//! - [`dispatcher`]: the distribution manager and dispatch algorithm
//! - [`fifo`]: waiting-call queues and dispatch modes
//! - [`agent`]: agent identity and the availability state machine
//! - [`events`]: the event bus consumed by the manager
//! - [`handler`]: the offer seam toward the signaling stack
//! - [`config`]: configuration and validation
//! - [`error`]: error taxonomy and result type

// Core modules
pub mod config;
pub mod error;
pub mod logging;

// Queue/agent state
pub mod agent;
pub mod fifo;

mod domain;

// External interfaces
pub mod events;
pub mod handler;

// Dispatch
pub mod dispatcher;

// Re-exports for convenience
pub use agent::{AgentId, AgentState};
pub use config::AcdConfig;
pub use dispatcher::{
    AcdStats, AgentOptions, AgentsOptions, DistributionManager, PendingDispatch, QueueOptions,
};
pub use error::{AcdError, Result};
pub use events::EventSource;
pub use fifo::{CallId, DispatchMode};
pub use handler::{DispatchHandler, DispatchedCall, OfferResponse, OfferedCall};

/// Prelude module for convenient imports
///
/// ```
/// use callq_engine::prelude::*;
/// ```
pub mod prelude {
    //! Commonly used types for applications embedding the engine.

    pub use crate::agent::{AgentId, AgentState};
    pub use crate::config::AcdConfig;
    pub use crate::dispatcher::{
        AcdStats, AgentOptions, AgentsOptions, DistributionManager, PendingDispatch, QueueOptions,
    };
    pub use crate::error::{AcdError, Result};
    pub use crate::events::{AcdEvent, CallRef, Entity, EntityLookup, EventSource, Registration};
    pub use crate::fifo::{CallId, DispatchMode};
    pub use crate::handler::{DispatchHandler, DispatchedCall, OfferResponse, OfferedCall};
}
