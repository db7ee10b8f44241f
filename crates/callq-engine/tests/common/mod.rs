//! Shared test support: a scripted dispatch handler and helpers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use callq_engine::prelude::*;

/// What a scripted agent does with the next offer it receives.
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
pub enum Reaction {
    Accept,
    AcceptAfter(Duration),
    Decline,
    /// Never answer within any grace period.
    NoAnswer,
}

/// Dispatch handler driven by per-agent scripts, recording every offer.
pub struct ScriptedHandler {
    reactions: Mutex<HashMap<AgentId, VecDeque<Reaction>>>,
    default: Reaction,
    offers: Mutex<Vec<(OfferedCall, AgentId)>>,
}

#[allow(dead_code)]
impl ScriptedHandler {
    pub fn new(default: Reaction) -> Arc<Self> {
        Arc::new(Self {
            reactions: Mutex::new(HashMap::new()),
            default,
            offers: Mutex::new(Vec::new()),
        })
    }

    /// Queue a reaction for an agent's next offer; unscripted offers get
    /// the handler's default.
    pub fn script(&self, agent: &str, reaction: Reaction) {
        self.reactions
            .lock()
            .unwrap()
            .entry(AgentId::from(agent))
            .or_default()
            .push_back(reaction);
    }

    pub fn offers(&self) -> Vec<(OfferedCall, AgentId)> {
        self.offers.lock().unwrap().clone()
    }

    pub fn offered_agents(&self) -> Vec<String> {
        self.offers().into_iter().map(|(_, agent)| agent.to_string()).collect()
    }
}

#[async_trait]
impl DispatchHandler for ScriptedHandler {
    async fn offer(&self, call: OfferedCall, agent: AgentId) -> OfferResponse {
        self.offers.lock().unwrap().push((call, agent.clone()));
        let reaction = self
            .reactions
            .lock()
            .unwrap()
            .get_mut(&agent)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(self.default);
        match reaction {
            Reaction::Accept => OfferResponse::Accepted,
            Reaction::AcceptAfter(delay) => {
                tokio::time::sleep(delay).await;
                OfferResponse::Accepted
            }
            Reaction::Decline => OfferResponse::Declined,
            Reaction::NoAnswer => {
                tokio::time::sleep(Duration::from_secs(86_400)).await;
                OfferResponse::Declined
            }
        }
    }
}

/// Poll until `condition` holds. Under a paused runtime the short sleeps
/// advance virtual time without crossing the engine's grace or debounce
/// windows.
#[allow(dead_code)]
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting until {what}");
}

/// A manager wired to a fresh bus with the given handler.
#[allow(dead_code)]
pub fn engine_with(handler: Arc<ScriptedHandler>) -> (DistributionManager, EventSource) {
    let events = EventSource::default();
    let manager = DistributionManager::new(AcdConfig::default(), &events, handler)
        .expect("manager construction");
    (manager, events)
}

/// Create the fifo and bind the given agents to it.
#[allow(dead_code)]
pub async fn bind(
    manager: &DistributionManager,
    domain: &str,
    queue: &str,
    mode: Option<DispatchMode>,
    agents: &[&str],
) {
    manager
        .addagents(AgentsOptions {
            domain: domain.into(),
            queue: queue.into(),
            agents: agents.iter().map(|uri| uri.to_string()).collect(),
            mode,
        })
        .await
        .expect("addagents");
}
