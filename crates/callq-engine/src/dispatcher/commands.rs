//! Commands consumed by the dispatcher task.
//!
//! Everything that mutates queue/agent state — public operations, bus
//! events, timer fires, offer resolutions — arrives here, so no two
//! mutations ever run concurrently against the same fifo or agent.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::agent::AgentId;
use crate::error::AcdError;
use crate::fifo::{CallId, DispatchMode, FifoKey};
use crate::handler::DispatchedCall;

#[derive(Debug)]
pub(crate) enum Command {
    /// Enqueue a call (public `queue()` operation).
    Queue {
        domain: String,
        queue: String,
        caller: String,
        id: CallId,
        priority: u8,
        timeout: Duration,
        mode: DispatchMode,
        answer_tx: oneshot::Sender<Result<DispatchedCall, AcdError>>,
        enqueued_tx: oneshot::Sender<()>,
    },

    /// Create a fifo if absent (public `addagents()` operation).
    EnsureFifo {
        domain: String,
        queue: String,
        mode: DispatchMode,
        reply: oneshot::Sender<()>,
    },

    /// Bind an agent to a fifo (public `addagent()` operation).
    AddAgent {
        domain: String,
        queue: String,
        agent: AgentId,
        reply: oneshot::Sender<Result<(), AcdError>>,
    },

    /// A known or unknown entity now has calls (`call.new`/`call.authed`
    /// with a positive concurrent call count).
    EntityBusy { uri: String, ccc: u32 },

    /// An entity's last call ended (`call.destroyed` with a concurrent
    /// call count of zero).
    EntityFree { uri: String },

    /// A call was torn down; evicts it if it is still waiting.
    CallGone { id: CallId },

    /// Registration-derived reachability change.
    Reachability { uri: AgentId, reachable: bool },

    /// A queued call's timeout timer fired.
    CallTimeout { key: FifoKey, id: CallId },

    /// An agent's resting debounce elapsed.
    AgentRested { uri: AgentId },

    /// An in-flight offer attempt finished.
    OfferResolved { id: CallId, outcome: AttemptOutcome },

    /// Barrier: replied to once every command sent before it has been
    /// processed.
    Flush { reply: oneshot::Sender<()> },
}

/// Result of one offer attempt (one ringall blast, or one enterprise
/// single-agent ring).
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    /// An agent accepted the call.
    Accepted { agent: AgentId },
    /// Every offered agent declined, or the grace period elapsed.
    NoTaker,
}
