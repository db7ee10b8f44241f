//! Agent identity and availability state.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;
use tracing::debug;

use crate::fifo::FifoKey;

/// Agent identifier: the agent's URI, unique across the whole manager.
///
/// One URI maps to exactly one agent record even when the agent serves
/// fifos in different domains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        AgentId(s)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        AgentId(s.to_string())
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Availability state of an agent.
///
/// `Available` → `Ringing` (offer extended) → `Busy` (answered) →
/// `Resting` (debounce window after the last call ends) → `Available`,
/// with the direct edge `Ringing` → `Available` on decline or no-answer.
/// A `call.new`/`call.authed` event with a positive concurrent call count
/// moves the agent to `Busy` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    /// Idle and eligible for offers.
    Available,
    /// An offer is outstanding, awaiting answer.
    Ringing,
    /// On at least one call.
    Busy,
    /// Debounce window after the last call ended.
    Resting,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Available => write!(f, "available"),
            AgentState::Ringing => write!(f, "ringing"),
            AgentState::Busy => write!(f, "busy"),
            AgentState::Resting => write!(f, "resting"),
        }
    }
}

impl std::str::FromStr for AgentState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "available" | "Available" => Ok(AgentState::Available),
            "ringing" | "Ringing" => Ok(AgentState::Ringing),
            "busy" | "Busy" => Ok(AgentState::Busy),
            "resting" | "Resting" => Ok(AgentState::Resting),
            _ => Err(format!("unknown agent state: {}", s)),
        }
    }
}

/// Process-lifetime record for one agent, owned by the dispatcher task.
#[derive(Debug)]
pub(crate) struct AgentRecord {
    pub uri: AgentId,
    pub state: AgentState,
    /// Concurrent call count mirrored from the entity layer.
    pub ccc: u32,
    /// Registration-derived reachability. Unreachable agents keep their
    /// record and memberships but are skipped by dispatch selection.
    pub reachable: bool,
    /// Fifos this agent services, in bind order.
    pub fifos: Vec<FifoKey>,
    /// Pending resting-timer, aborted when a new call pre-empts the
    /// debounce. The timer callback re-validates state at fire time
    /// regardless.
    pub rest_timer: Option<AbortHandle>,
}

impl AgentRecord {
    pub fn new(uri: AgentId) -> Self {
        Self {
            uri,
            state: AgentState::Available,
            ccc: 0,
            reachable: true,
            fifos: Vec::new(),
            rest_timer: None,
        }
    }

    /// True when the agent can receive an offer right now.
    pub fn is_idle(&self) -> bool {
        self.state == AgentState::Available && self.reachable
    }

    /// Record a fifo membership, idempotently. Returns true if new.
    pub fn add_fifo(&mut self, key: FifoKey) -> bool {
        if self.fifos.contains(&key) {
            return false;
        }
        self.fifos.push(key);
        true
    }

    pub fn set_state(&mut self, next: AgentState) {
        if self.state != next {
            debug!("agent {} {} -> {}", self.uri, self.state, next);
            self.state = next;
        }
    }

    /// Abort a pending resting timer, if any.
    pub fn cancel_rest_timer(&mut self) {
        if let Some(timer) = self.rest_timer.take() {
            timer.abort();
        }
    }
}
