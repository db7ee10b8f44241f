//! Public option structs, the pending-dispatch future and stats.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::AcdError;
use crate::fifo::{CallId, DispatchMode};
use crate::handler::DispatchedCall;

/// Options for [`queue`](crate::DistributionManager::queue).
///
/// Unset fields fall back to the [`AcdConfig`](crate::AcdConfig) defaults.
/// Missing domains and fifos are created lazily; enqueueing never fails
/// with `NotFound`.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Domain owning the target fifo.
    pub domain: String,
    /// Name of the target fifo.
    pub queue: String,
    /// Caller identification, for logging and the offer payload.
    pub caller: String,
    /// Call id; generated when not supplied.
    pub id: Option<CallId>,
    /// Max time to hold the call in the queue.
    pub timeout: Option<Duration>,
    /// Priority 1-10, lower is serviced first. Out-of-range values are
    /// clamped.
    pub priority: Option<u8>,
    /// Dispatch mode, applied only if this call creates the fifo.
    pub mode: Option<DispatchMode>,
}

impl QueueOptions {
    pub fn new(
        domain: impl Into<String>,
        queue: impl Into<String>,
        caller: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            queue: queue.into(),
            caller: caller.into(),
            id: None,
            timeout: None,
            priority: None,
            mode: None,
        }
    }
}

/// Options for [`addagent`](crate::DistributionManager::addagent).
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Domain owning the target fifo.
    pub domain: String,
    /// Name of the target fifo. Must already exist.
    pub queue: String,
    /// Agent URI, e.g. `1000@example.com`.
    pub agent: String,
}

/// Options for [`addagents`](crate::DistributionManager::addagents).
#[derive(Debug, Clone)]
pub struct AgentsOptions {
    /// Domain owning the target fifo.
    pub domain: String,
    /// Name of the target fifo, created if absent.
    pub queue: String,
    /// Agent URIs to bind.
    pub agents: Vec<String>,
    /// Dispatch mode, applied only if this call creates the fifo.
    pub mode: Option<DispatchMode>,
}

/// Future resolving when a queued call is answered.
///
/// Fails with [`AcdError::Timeout`] when the call's queue timeout evicts
/// it, [`AcdError::Abandoned`] when the caller hangs up first, and
/// [`AcdError::Shutdown`] when the manager goes away.
#[derive(Debug)]
pub struct PendingDispatch {
    pub(crate) id: CallId,
    pub(crate) rx: oneshot::Receiver<Result<DispatchedCall, AcdError>>,
}

impl PendingDispatch {
    /// Id of the queued call.
    pub fn id(&self) -> CallId {
        self.id
    }
}

impl Future for PendingDispatch {
    type Output = Result<DispatchedCall, AcdError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx).poll(cx).map(|received| match received {
            Ok(outcome) => outcome,
            Err(_) => Err(AcdError::Shutdown),
        })
    }
}

/// Snapshot of the manager's current state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcdStats {
    /// Calls currently waiting across all fifos (in-flight offer attempts
    /// excluded).
    pub waiting_calls: usize,
    /// Agents by state.
    pub available_agents: usize,
    pub ringing_agents: usize,
    pub busy_agents: usize,
    pub resting_agents: usize,
    /// Totals since construction.
    pub dispatched_total: u64,
    pub timed_out_total: u64,
    pub abandoned_total: u64,
}

/// Totals maintained by the dispatcher, published behind a lock.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub dispatched: u64,
    pub timed_out: u64,
    pub abandoned: u64,
}
