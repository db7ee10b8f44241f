//! The offer seam between the engine and the signaling stack.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::agent::AgentId;
use crate::fifo::CallId;

/// Snapshot of a waiting call handed to [`DispatchHandler::offer`].
#[derive(Debug, Clone)]
pub struct OfferedCall {
    /// The call's id.
    pub id: CallId,
    /// Caller identification (phone number, display string).
    pub caller: String,
    /// Domain owning the fifo the call is queued in.
    pub domain: String,
    /// Name of the fifo the call is queued in.
    pub queue: String,
    /// Call priority, 1-10, lower is serviced first.
    pub priority: u8,
    /// When the call entered the queue.
    pub enqueued_at: DateTime<Utc>,
}

/// An agent's answer to an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferResponse {
    /// The agent answered; the call leaves the queue.
    Accepted,
    /// The agent declined; the engine rotates or requeues.
    Declined,
}

/// Resolution of a successfully dispatched call, delivered through the
/// future returned by [`queue`](crate::DistributionManager::queue).
#[derive(Debug, Clone)]
pub struct DispatchedCall {
    /// The call's id.
    pub id: CallId,
    /// The agent that answered.
    pub agent: AgentId,
    /// How long the call waited before being answered.
    pub waited: Duration,
}

/// Delivery of offers to agents.
///
/// The engine decides *who* is offered *which* call and *when*; this trait
/// is how the embedding signaling stack actually rings the agent. In
/// ringall mode several offers for the same call run concurrently; the
/// first acceptance wins and the remaining offer futures are dropped,
/// which retracts those offers. An offer that has not resolved within the
/// configured grace period counts as unanswered.
///
/// Acceptance is provisional: if the call's queue timeout fires in the
/// same instant, the timeout wins and the acceptance is discarded.
#[async_trait]
pub trait DispatchHandler: Send + Sync {
    /// Extend an offer for `call` to `agent` and report the outcome.
    async fn offer(&self, call: OfferedCall, agent: AgentId) -> OfferResponse;
}
