//! Waiting-call queues ("fifos").
//!
//! A [`Fifo`] owns one ordered waiting list plus the set of agent URIs
//! subscribed to service it. Calls are held in `(priority asc, enqueued_at
//! asc)` order; the head is always the next call to dispatch. The derived
//! `age` (wait of the oldest entry) feeds the cross-fifo selection when an
//! agent becomes free.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::agent::{AgentId, AgentRecord};
use crate::error::AcdError;
use crate::handler::DispatchedCall;

/// Unique identifier for a queued call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(Uuid);

impl CallId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a fifo offers work to its agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Offer the head call to every idle subscribed agent simultaneously;
    /// the first to answer wins and the other offers are retracted.
    RingAll,
    /// Offer to one agent at a time, rotating round-robin on declines.
    Enterprise,
}

impl Default for DispatchMode {
    fn default() -> Self {
        DispatchMode::RingAll
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::RingAll => write!(f, "ringall"),
            DispatchMode::Enterprise => write!(f, "enterprise"),
        }
    }
}

/// Key identifying a fifo across domains.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct FifoKey {
    pub domain: String,
    pub name: String,
}

impl FifoKey {
    pub fn new(domain: impl Into<String>, name: impl Into<String>) -> Self {
        Self { domain: domain.into(), name: name.into() }
    }
}

impl fmt::Display for FifoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.domain)
    }
}

/// A call held in a fifo's waiting list.
///
/// Owns the answering half of the caller's future and the abort handle of
/// the call's timeout timer. Dropping a `WaitingCall` without resolving it
/// surfaces as [`AcdError::Shutdown`] on the caller side.
#[derive(Debug)]
pub(crate) struct WaitingCall {
    pub id: CallId,
    pub caller: String,
    pub priority: u8,
    pub enqueued_at: DateTime<Utc>,
    pub answer_tx: oneshot::Sender<Result<DispatchedCall, AcdError>>,
    pub timeout_timer: AbortHandle,
}

impl WaitingCall {
    /// Time this call has spent waiting.
    pub fn waited(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.enqueued_at).to_std().unwrap_or_default()
    }
}

/// One named waiting queue inside a domain.
#[derive(Debug)]
pub(crate) struct Fifo {
    pub key: FifoKey,
    pub mode: DispatchMode,
    /// Creation sequence number, the stable cross-fifo tie-break.
    pub seq: u64,
    /// Waiting calls ordered by `(priority asc, enqueued_at asc)`.
    pub waiting: VecDeque<WaitingCall>,
    /// Subscribed agents in bind order; also the rotation order for
    /// enterprise mode.
    pub agents: Vec<AgentId>,
    rotation_cursor: usize,
}

impl Fifo {
    pub fn new(key: FifoKey, mode: DispatchMode, seq: u64) -> Self {
        Self {
            key,
            mode,
            seq,
            waiting: VecDeque::new(),
            agents: Vec::new(),
            rotation_cursor: 0,
        }
    }

    /// Insert preserving `(priority asc, enqueued_at asc)` order.
    ///
    /// Re-inserting a call that was pulled out for a failed dispatch
    /// attempt lands it back at its original position because both sort
    /// keys are unchanged. Returns the insertion position.
    pub fn insert(&mut self, call: WaitingCall) -> usize {
        let position = self
            .waiting
            .iter()
            .position(|existing| {
                (existing.priority, existing.enqueued_at) > (call.priority, call.enqueued_at)
            })
            .unwrap_or(self.waiting.len());
        self.waiting.insert(position, call);
        position
    }

    pub fn head(&self) -> Option<&WaitingCall> {
        self.waiting.front()
    }

    pub fn pop_head(&mut self) -> Option<WaitingCall> {
        self.waiting.pop_front()
    }

    /// Remove a specific call from the waiting list.
    pub fn remove(&mut self, id: CallId) -> Option<WaitingCall> {
        let index = self.waiting.iter().position(|call| call.id == id)?;
        self.waiting.remove(index)
    }

    /// Enqueue timestamp of the oldest waiting entry. The list is ordered
    /// by priority first, so the oldest entry is not necessarily the head.
    pub fn oldest_enqueued_at(&self) -> Option<DateTime<Utc>> {
        self.waiting.iter().map(|call| call.enqueued_at).min()
    }

    /// Wait of the oldest entry, zero when empty. Used for cross-fifo
    /// comparison and stats.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        self.oldest_enqueued_at()
            .map(|oldest| now.signed_duration_since(oldest).to_std().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Subscribe an agent, idempotently. Returns true if new.
    pub fn subscribe(&mut self, agent: AgentId) -> bool {
        if self.agents.contains(&agent) {
            return false;
        }
        self.agents.push(agent);
        true
    }

    /// Point the enterprise rotation just past `agent` so the next decline
    /// moves on to the following subscriber.
    pub fn rotate_past(&mut self, agent: &AgentId) {
        if let Some(position) = self.agents.iter().position(|a| a == agent) {
            self.rotation_cursor = (position + 1) % self.agents.len();
        }
    }

    /// Next idle agent in rotation order, skipping `tried`. Advances the
    /// cursor past the returned agent.
    pub fn next_rotation_target(
        &mut self,
        agents: &HashMap<AgentId, AgentRecord>,
        tried: &HashSet<AgentId>,
    ) -> Option<AgentId> {
        let len = self.agents.len();
        for step in 0..len {
            let index = (self.rotation_cursor + step) % len;
            let uri = &self.agents[index];
            if tried.contains(uri) {
                continue;
            }
            if agents.get(uri).is_some_and(|record| record.is_idle()) {
                self.rotation_cursor = (index + 1) % len;
                return Some(uri.clone());
            }
        }
        None
    }
}
