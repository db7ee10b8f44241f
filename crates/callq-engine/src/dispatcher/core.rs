//! The distribution manager: public API plus the single dispatcher task
//! that owns all queue/agent state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentId, AgentRecord, AgentState};
use crate::config::AcdConfig;
use crate::dispatcher::commands::{AttemptOutcome, Command};
use crate::dispatcher::selection::{run_offer, select_fifo};
use crate::dispatcher::types::{
    AcdStats, AgentOptions, AgentsOptions, Counters, PendingDispatch, QueueOptions,
};
use crate::domain::Domain;
use crate::error::{AcdError, Result};
use crate::events::{AcdEvent, EventSource};
use crate::fifo::{CallId, DispatchMode, Fifo, FifoKey, WaitingCall};
use crate::handler::{DispatchHandler, DispatchedCall, OfferedCall};

/// Top-level ACD coordinator.
///
/// Owns every routing domain and the single global agent directory,
/// subscribes to the [`EventSource`], and resolves agent-to-fifo dispatch
/// races. All state lives in one dispatcher task fed by a command channel,
/// so no two events are ever processed concurrently against the same fifo
/// or agent; the public methods are thin asynchronous shims over that
/// channel.
///
/// Dropping the manager stops the dispatcher; outstanding
/// [`queue`](Self::queue) futures then resolve with
/// [`AcdError::Shutdown`].
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use callq_engine::prelude::*;
///
/// struct Ring;
///
/// #[async_trait]
/// impl DispatchHandler for Ring {
///     async fn offer(&self, _call: OfferedCall, _agent: AgentId) -> OfferResponse {
///         OfferResponse::Accepted
///     }
/// }
///
/// # async fn example() -> Result<()> {
/// let events = EventSource::default();
/// let manager = DistributionManager::new(AcdConfig::default(), &events, Arc::new(Ring))?;
///
/// manager.addagents(AgentsOptions {
///     domain: "example.com".into(),
///     queue: "support".into(),
///     agents: vec!["1000@example.com".into()],
///     mode: None,
/// }).await?;
///
/// let pending = manager.queue(QueueOptions::new("example.com", "support", "+15550100")).await?;
/// let dispatched = pending.await?;
/// println!("answered by {}", dispatched.agent);
/// # Ok(())
/// # }
/// ```
pub struct DistributionManager {
    cmd_tx: mpsc::Sender<Command>,
    config: AcdConfig,
    agent_view: Arc<DashMap<AgentId, AgentState>>,
    depth_view: Arc<DashMap<FifoKey, usize>>,
    counters: Arc<RwLock<Counters>>,
    dispatcher: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl DistributionManager {
    /// Create a manager, subscribe it to `events` and start its
    /// dispatcher task. Must be called within a Tokio runtime.
    pub fn new(
        config: AcdConfig,
        events: &EventSource,
        handler: Arc<dyn DispatchHandler>,
    ) -> Result<Self> {
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_capacity);
        let agent_view = Arc::new(DashMap::new());
        let depth_view = Arc::new(DashMap::new());
        let counters = Arc::new(RwLock::new(Counters::default()));

        let state = DispatcherState {
            config: config.clone(),
            handler,
            cmd_tx: cmd_tx.clone(),
            domains: HashMap::new(),
            agents: HashMap::new(),
            waiting_index: HashMap::new(),
            in_flight: HashMap::new(),
            next_seq: 0,
            agent_view: Arc::clone(&agent_view),
            depth_view: Arc::clone(&depth_view),
            counters: Arc::clone(&counters),
        };
        let dispatcher = tokio::spawn(state.run(cmd_rx));
        let forwarder = tokio::spawn(forward_events(events.subscribe(), cmd_tx.clone()));

        Ok(Self { cmd_tx, config, agent_view, depth_view, counters, dispatcher, forwarder })
    }

    /// Queue a call into `(options.domain, options.queue)`, creating the
    /// domain and fifo lazily.
    ///
    /// Returns once the call is visible to subscribed agents. The returned
    /// [`PendingDispatch`] resolves when an agent answers and fails with
    /// [`AcdError::Timeout`] or [`AcdError::Abandoned`] otherwise.
    pub async fn queue(&self, options: QueueOptions) -> Result<PendingDispatch> {
        let id = options.id.unwrap_or_else(CallId::new);
        let requested = options.priority.unwrap_or(self.config.default_priority);
        let priority = requested.clamp(1, 10);
        if priority != requested {
            warn!("clamped priority {} to {} for call {}", requested, priority, id);
        }

        let (answer_tx, answer_rx) = oneshot::channel();
        let (enqueued_tx, enqueued_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Queue {
                domain: options.domain,
                queue: options.queue,
                caller: options.caller,
                id,
                priority,
                timeout: options.timeout.unwrap_or(self.config.default_timeout),
                mode: options.mode.unwrap_or(self.config.default_mode),
                answer_tx,
                enqueued_tx,
            })
            .await
            .map_err(|_| AcdError::Shutdown)?;
        enqueued_rx.await.map_err(|_| AcdError::Shutdown)?;

        Ok(PendingDispatch { id, rx: answer_rx })
    }

    /// Idempotently bind one agent URI to a named fifo.
    ///
    /// A new URI is tentatively inserted into the global directory, then
    /// bound at the domain level; if the bind fails the tentative record
    /// is rolled back, so the agent either both exists globally and is
    /// bound to the fifo, or neither. The fifo must already exist.
    pub async fn addagent(&self, options: AgentOptions) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::AddAgent {
                domain: options.domain,
                queue: options.queue,
                agent: AgentId(options.agent),
                reply,
            })
            .await
            .map_err(|_| AcdError::Shutdown)?;
        rx.await.map_err(|_| AcdError::Shutdown)?
    }

    /// Register a fifo's membership list in bulk: ensures the fifo
    /// exists, then binds each URI via the [`addagent`](Self::addagent)
    /// path. Individual bind failures are logged and skipped.
    pub async fn addagents(&self, options: AgentsOptions) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::EnsureFifo {
                domain: options.domain.clone(),
                queue: options.queue.clone(),
                mode: options.mode.unwrap_or(self.config.default_mode),
                reply,
            })
            .await
            .map_err(|_| AcdError::Shutdown)?;
        rx.await.map_err(|_| AcdError::Shutdown)?;

        for agent in options.agents {
            let bind = AgentOptions {
                domain: options.domain.clone(),
                queue: options.queue.clone(),
                agent,
            };
            if let Err(e) = self.addagent(bind).await {
                warn!("addagents: skipping failed bind: {}", e);
            }
        }
        Ok(())
    }

    /// Current state of an agent, `None` for unknown URIs.
    pub fn agent_state(&self, uri: &str) -> Option<AgentState> {
        self.agent_view.get(&AgentId::from(uri)).map(|entry| *entry.value())
    }

    /// Number of calls currently waiting in a fifo (zero for unknown
    /// fifos; calls with an in-flight offer are not counted).
    pub fn queue_depth(&self, domain: &str, queue: &str) -> usize {
        self.depth_view
            .get(&FifoKey::new(domain, queue))
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }

    /// Snapshot of agents, waiting calls and lifetime totals.
    pub fn stats(&self) -> AcdStats {
        let mut stats = AcdStats::default();
        for entry in self.agent_view.iter() {
            match entry.value() {
                AgentState::Available => stats.available_agents += 1,
                AgentState::Ringing => stats.ringing_agents += 1,
                AgentState::Busy => stats.busy_agents += 1,
                AgentState::Resting => stats.resting_agents += 1,
            }
        }
        stats.waiting_calls = self.depth_view.iter().map(|entry| *entry.value()).sum();

        let counters = self.counters.read();
        stats.dispatched_total = counters.dispatched;
        stats.timed_out_total = counters.timed_out;
        stats.abandoned_total = counters.abandoned;
        stats
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &AcdConfig {
        &self.config
    }

    /// Barrier: resolves once every command issued before this call has
    /// been processed by the dispatcher. Useful in tests and during
    /// orderly teardown.
    pub async fn flush(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(Command::Flush { reply }).await.map_err(|_| AcdError::Shutdown)?;
        rx.await.map_err(|_| AcdError::Shutdown)
    }
}

impl Drop for DistributionManager {
    fn drop(&mut self) {
        self.forwarder.abort();
        self.dispatcher.abort();
    }
}

/// Translate bus events into commands. Entity resolution happens here,
/// before a command enters the loop, so the dispatcher never blocks on an
/// identity lookup.
async fn forward_events(mut rx: broadcast::Receiver<AcdEvent>, tx: mpsc::Sender<Command>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("event bus lagged, {} events dropped", missed);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        let mut commands = Vec::new();
        match event {
            AcdEvent::CallNew(call) | AcdEvent::CallAuthed(call) => {
                if let Some(entity) = call.entity().await {
                    if entity.ccc > 0 {
                        commands.push(Command::EntityBusy { uri: entity.uri, ccc: entity.ccc });
                    }
                }
            }
            AcdEvent::CallDestroyed(call) => {
                commands.push(Command::CallGone { id: call.id() });
                if let Some(entity) = call.entity().await {
                    if entity.ccc == 0 {
                        commands.push(Command::EntityFree { uri: entity.uri });
                    }
                }
            }
            AcdEvent::Register(registration) => {
                commands.push(Command::Reachability { uri: registration.uri, reachable: true });
            }
            AcdEvent::Unregister(registration) => {
                commands.push(Command::Reachability { uri: registration.uri, reachable: false });
            }
        }

        for command in commands {
            if tx.send(command).await.is_err() {
                return;
            }
        }
    }
}

/// A dispatch attempt in flight: the call is out of the waiting list and
/// the offered agents are claimed (`Ringing`) until the attempt resolves.
struct InFlightAttempt {
    call: WaitingCall,
    key: FifoKey,
    offered: Vec<AgentId>,
    /// Agents already offered during this dispatch round (enterprise
    /// rotation).
    tried: HashSet<AgentId>,
    task: tokio::task::AbortHandle,
}

/// All mutable queue/agent state, owned by the dispatcher task.
struct DispatcherState {
    config: AcdConfig,
    handler: Arc<dyn DispatchHandler>,
    cmd_tx: mpsc::Sender<Command>,
    domains: HashMap<String, Domain>,
    agents: HashMap<AgentId, AgentRecord>,
    /// Location of every waiting call.
    waiting_index: HashMap<CallId, FifoKey>,
    in_flight: HashMap<CallId, InFlightAttempt>,
    next_seq: u64,
    agent_view: Arc<DashMap<AgentId, AgentState>>,
    depth_view: Arc<DashMap<FifoKey, usize>>,
    counters: Arc<RwLock<Counters>>,
}

impl DispatcherState {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        debug!("dispatcher started");
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
        debug!("dispatcher stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Queue { domain, queue, caller, id, priority, timeout, mode, answer_tx, enqueued_tx } => {
                self.handle_queue(domain, queue, caller, id, priority, timeout, mode, answer_tx, enqueued_tx);
            }
            Command::EnsureFifo { domain, queue, mode, reply } => {
                self.handle_ensure_fifo(domain, queue, mode);
                let _ = reply.send(());
            }
            Command::AddAgent { domain, queue, agent, reply } => {
                let _ = reply.send(self.bind_agent(domain, queue, agent));
            }
            Command::EntityBusy { uri, ccc } => self.handle_entity_busy(uri, ccc),
            Command::EntityFree { uri } => self.handle_entity_free(uri),
            Command::CallGone { id } => self.handle_call_gone(id),
            Command::Reachability { uri, reachable } => self.handle_reachability(uri, reachable),
            Command::CallTimeout { key, id } => self.handle_call_timeout(key, id),
            Command::AgentRested { uri } => self.handle_agent_rested(uri),
            Command::OfferResolved { id, outcome } => self.handle_offer_resolved(id, outcome),
            Command::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn fifo(&self, key: &FifoKey) -> Option<&Fifo> {
        self.domains.get(&key.domain)?.fifo(&key.name)
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_queue(
        &mut self,
        domain: String,
        queue: String,
        caller: String,
        id: CallId,
        priority: u8,
        timeout: Duration,
        mode: DispatchMode,
        answer_tx: oneshot::Sender<std::result::Result<DispatchedCall, AcdError>>,
        enqueued_tx: oneshot::Sender<()>,
    ) {
        if self.waiting_index.contains_key(&id) || self.in_flight.contains_key(&id) {
            warn!("call {} is already queued, rejecting duplicate", id);
            let _ = answer_tx.send(Err(AcdError::invariant(format!("call {id} is already queued"))));
            let _ = enqueued_tx.send(());
            return;
        }

        let key = FifoKey::new(domain.clone(), queue.clone());

        // Cancellable eviction timer; state is re-validated when it fires.
        let timer_tx = self.cmd_tx.clone();
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = timer_tx.send(Command::CallTimeout { key: timer_key, id }).await;
        });

        let call = WaitingCall {
            id,
            caller,
            priority,
            enqueued_at: Utc::now(),
            answer_tx,
            timeout_timer: timer.abort_handle(),
        };

        let depth = {
            let entry = self
                .domains
                .entry(domain.clone())
                .or_insert_with(|| Domain::new(domain.clone()));
            let fifo = entry.ensure_fifo(&queue, mode, &mut self.next_seq);
            if fifo.mode != mode {
                debug!("fifo {} keeps mode {}", fifo.key, fifo.mode);
            }
            let position = fifo.insert(call);
            info!(
                "enqueued call {} from {} into {} (priority {}, position {})",
                id, fifo.waiting[position].caller, key, priority, position
            );
            fifo.waiting.len()
        };

        self.waiting_index.insert(id, key.clone());
        self.depth_view.insert(key.clone(), depth);
        let _ = enqueued_tx.send(());

        // The enqueue path re-checks idle agents, same routine as the
        // agent-freed path.
        self.kick_fifo(&key);
    }

    fn handle_ensure_fifo(&mut self, domain: String, queue: String, mode: DispatchMode) {
        let entry = self
            .domains
            .entry(domain.clone())
            .or_insert_with(|| Domain::new(domain.clone()));
        let fifo = entry.ensure_fifo(&queue, mode, &mut self.next_seq);
        let key = fifo.key.clone();
        let depth = fifo.waiting.len();
        self.depth_view.insert(key, depth);
    }

    /// The two-phase bind behind `addagent`: tentative directory insert,
    /// then the domain-level membership commit, rolled back on failure.
    fn bind_agent(&mut self, domain: String, queue: String, agent: AgentId) -> Result<()> {
        let newly_created = if self.agents.contains_key(&agent) {
            false
        } else {
            self.agents.insert(agent.clone(), AgentRecord::new(agent.clone()));
            self.agent_view.insert(agent.clone(), AgentState::Available);
            true
        };

        // The domain is created lazily; the fifo must already exist.
        self.domains
            .entry(domain.clone())
            .or_insert_with(|| Domain::new(domain.clone()));
        let key = FifoKey::new(domain, queue);

        if self.fifo(&key).is_none() {
            if newly_created {
                self.agents.remove(&agent);
                self.agent_view.remove(&agent);
                error!("rolled back tentative agent {}: fifo {} does not exist", agent, key);
            }
            return Err(AcdError::not_found(format!("fifo {key} does not exist")));
        }

        // Both halves of the membership must agree before committing.
        let fifo_has = self.fifo(&key).is_some_and(|fifo| fifo.agents.contains(&agent));
        let record_has = self.agents.get(&agent).is_some_and(|record| record.fifos.contains(&key));
        if fifo_has != record_has {
            if newly_created {
                self.agents.remove(&agent);
                self.agent_view.remove(&agent);
            }
            error!(
                "membership for {} on {} is half-bound (fifo: {}, agent: {})",
                agent, key, fifo_has, record_has
            );
            return Err(AcdError::invariant(format!("membership for {agent} on {key} is inconsistent")));
        }
        if fifo_has {
            debug!("agent {} already bound to {}", agent, key);
            return Ok(());
        }

        if let Some(fifo) = self.domains.get_mut(&key.domain).and_then(|d| d.fifo_mut(&key.name)) {
            fifo.subscribe(agent.clone());
        }
        if let Some(record) = self.agents.get_mut(&agent) {
            record.add_fifo(key.clone());
        }
        info!("agent {} bound to {}", agent, key);

        // A newly bound idle agent can pick up waiting work right away.
        self.kick_agent(&agent, None);
        Ok(())
    }

    fn handle_entity_busy(&mut self, uri: String, ccc: u32) {
        let id = AgentId(uri);
        let Some(record) = self.agents.get_mut(&id) else {
            debug!("busy event for unknown entity {}", id);
            return;
        };
        record.ccc = ccc;
        // A new call pre-empts any pending resting debounce.
        record.cancel_rest_timer();
        record.set_state(AgentState::Busy);
        debug!("agent {} busy with {} concurrent call(s)", id, record.ccc);
        self.agent_view.insert(id, AgentState::Busy);
    }

    fn handle_entity_free(&mut self, uri: String) {
        let id = AgentId(uri);
        let lag = self.config.agent_lag;
        let timer_tx = self.cmd_tx.clone();
        let Some(record) = self.agents.get_mut(&id) else {
            debug!("free event for unknown entity {}", id);
            return;
        };
        record.ccc = 0;
        if record.state != AgentState::Busy {
            return;
        }

        record.set_state(AgentState::Resting);
        record.cancel_rest_timer();
        let timer_uri = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(lag).await;
            let _ = timer_tx.send(Command::AgentRested { uri: timer_uri }).await;
        });
        record.rest_timer = Some(timer.abort_handle());

        self.agent_view.insert(id.clone(), AgentState::Resting);
        debug!("agent {} resting for {:?}", id, lag);
    }

    fn handle_agent_rested(&mut self, uri: AgentId) {
        let Some(record) = self.agents.get_mut(&uri) else { return };
        record.rest_timer = None;
        // The debounce only completes if nothing made the agent busy
        // again in the meantime.
        if record.state != AgentState::Resting {
            debug!("rest timer for {} superseded by state {}", uri, record.state);
            return;
        }
        record.set_state(AgentState::Available);
        self.agent_view.insert(uri.clone(), AgentState::Available);
        info!("agent {} available after rest", uri);
        self.kick_agent(&uri, None);
    }

    fn handle_reachability(&mut self, uri: AgentId, reachable: bool) {
        let Some(record) = self.agents.get_mut(&uri) else {
            debug!("registration event for unknown agent {}", uri);
            return;
        };
        if record.reachable != reachable {
            info!("agent {} now {}", uri, if reachable { "reachable" } else { "unreachable" });
        }
        record.reachable = reachable;
        let resume = reachable && record.state == AgentState::Available;
        if resume {
            self.kick_agent(&uri, None);
        }
    }

    fn handle_call_timeout(&mut self, key: FifoKey, id: CallId) {
        if let Some((owner, call)) = self.take_waiting(id) {
            self.counters.write().timed_out += 1;
            warn!("call {} timed out after {:?} waiting on {}", id, call.waited(Utc::now()), owner);
            let _ = call.answer_tx.send(Err(AcdError::timeout(format!("call {id} exceeded its queue timeout"))));
            return;
        }

        // The timeout wins even while an offer is in flight.
        if let Some(attempt) = self.in_flight.remove(&id) {
            attempt.task.abort();
            let InFlightAttempt { call, key, offered, .. } = attempt;
            let released = self.release_all_ringing(&offered);
            self.counters.write().timed_out += 1;
            warn!("call {} timed out mid-offer on {}", id, key);
            let _ = call.answer_tx.send(Err(AcdError::timeout(format!("call {id} exceeded its queue timeout"))));
            for uri in released {
                self.kick_agent(&uri, None);
            }
            return;
        }

        debug!("timeout fired for call {} on {} after it left the queue", id, key);
    }

    fn handle_call_gone(&mut self, id: CallId) {
        if let Some((key, call)) = self.take_waiting(id) {
            call.timeout_timer.abort();
            self.counters.write().abandoned += 1;
            info!("call {} abandoned by caller while waiting on {}", id, key);
            let _ = call.answer_tx.send(Err(AcdError::abandoned("caller hung up before dispatch")));
            return;
        }

        if let Some(attempt) = self.in_flight.remove(&id) {
            attempt.task.abort();
            let InFlightAttempt { call, key, offered, .. } = attempt;
            call.timeout_timer.abort();
            let released = self.release_all_ringing(&offered);
            self.counters.write().abandoned += 1;
            info!("call {} abandoned by caller mid-offer on {}", id, key);
            let _ = call.answer_tx.send(Err(AcdError::abandoned("caller hung up during dispatch")));
            for uri in released {
                self.kick_agent(&uri, None);
            }
        }
        // Anything else: a call that was never queued here.
    }

    fn handle_offer_resolved(&mut self, id: CallId, outcome: AttemptOutcome) {
        let Some(attempt) = self.in_flight.remove(&id) else {
            debug!("stale offer resolution for call {}", id);
            return;
        };
        match outcome {
            AttemptOutcome::Accepted { agent } => self.finish_accepted(attempt, agent),
            AttemptOutcome::NoTaker => self.finish_no_taker(attempt),
        }
    }

    fn finish_accepted(&mut self, attempt: InFlightAttempt, agent: AgentId) {
        let InFlightAttempt { call, key, offered, .. } = attempt;
        call.timeout_timer.abort();

        if let Some(record) = self.agents.get_mut(&agent) {
            record.set_state(AgentState::Busy);
            self.agent_view.insert(agent.clone(), AgentState::Busy);
        }
        let losers: Vec<AgentId> = offered.iter().filter(|uri| **uri != agent).cloned().collect();
        let released = self.release_all_ringing(&losers);

        let waited = call.waited(Utc::now());
        self.counters.write().dispatched += 1;
        info!("call {} on {} answered by {} after {:?}", call.id, key, agent, waited);
        let _ = call.answer_tx.send(Ok(DispatchedCall { id: call.id, agent, waited }));

        for uri in released {
            self.kick_agent(&uri, None);
        }
        self.kick_fifo(&key);
    }

    fn finish_no_taker(&mut self, attempt: InFlightAttempt) {
        let InFlightAttempt { call, key, offered, mut tried, .. } = attempt;
        let released = self.release_all_ringing(&offered);
        tried.extend(offered.iter().cloned());

        // Enterprise mode rotates to the next idle subscriber before
        // giving up on this round.
        if self.fifo(&key).map(|fifo| fifo.mode) == Some(DispatchMode::Enterprise) {
            let next = match self.domains.get_mut(&key.domain).and_then(|d| d.fifo_mut(&key.name)) {
                Some(fifo) => fifo.next_rotation_target(&self.agents, &tried),
                None => None,
            };
            if let Some(next_agent) = next {
                debug!("rotating call {} on {} to {}", call.id, key, next_agent);
                self.launch_offer(key.clone(), call, vec![next_agent], tried);
                // the decliners may still have work waiting on other fifos
                for uri in released {
                    self.kick_agent(&uri, Some(&key));
                }
                return;
            }
        }

        let id = call.id;
        let depth = {
            let Some(fifo) = self.domains.get_mut(&key.domain).and_then(|d| d.fifo_mut(&key.name)) else {
                error!("fifo {} disappeared during dispatch of call {}", key, id);
                let _ = call
                    .answer_tx
                    .send(Err(AcdError::invariant(format!("fifo {key} disappeared during dispatch"))));
                return;
            };
            fifo.insert(call);
            debug!("no taker on {}, requeued call {} (queue age {:?})", key, id, fifo.age(Utc::now()));
            fifo.waiting.len()
        };
        self.depth_view.insert(key.clone(), depth);
        self.waiting_index.insert(id, key.clone());

        // The freed agents re-enter selection, but not against the fifo
        // that just failed; it is retried on the next trigger.
        for uri in released {
            self.kick_agent(&uri, Some(&key));
        }
    }

    /// Remove a call from its waiting list, keeping index and depth view
    /// in sync. `None` when the call is not waiting (already dispatched,
    /// in flight, or long gone).
    fn take_waiting(&mut self, id: CallId) -> Option<(FifoKey, WaitingCall)> {
        let key = self.waiting_index.remove(&id)?;
        let taken = {
            let Some(fifo) = self.domains.get_mut(&key.domain).and_then(|d| d.fifo_mut(&key.name)) else {
                error!("waiting index points at missing fifo {}", key);
                return None;
            };
            match fifo.remove(id) {
                Some(call) => (call, fifo.waiting.len()),
                None => {
                    error!("waiting index out of sync for call {}", id);
                    return None;
                }
            }
        };
        let (call, depth) = taken;
        self.depth_view.insert(key.clone(), depth);
        Some((key, call))
    }

    /// Return every listed agent still `Ringing` to `Available`,
    /// re-validating each; agents pre-empted to `Busy` mid-offer are left
    /// alone. Returns the agents actually released.
    fn release_all_ringing(&mut self, agents: &[AgentId]) -> Vec<AgentId> {
        let mut released = Vec::new();
        for uri in agents {
            if let Some(record) = self.agents.get_mut(uri) {
                if record.state == AgentState::Ringing {
                    record.set_state(AgentState::Available);
                    self.agent_view.insert(uri.clone(), AgentState::Available);
                    released.push(uri.clone());
                }
            }
        }
        released
    }

    /// The enqueue-side trigger: re-run dispatch selection for every idle
    /// subscriber of a fifo that just gained work.
    fn kick_fifo(&mut self, key: &FifoKey) {
        let subscribers: Vec<AgentId> = match self.fifo(key) {
            Some(fifo) if !fifo.waiting.is_empty() => fifo.agents.clone(),
            _ => return,
        };
        for uri in subscribers {
            self.kick_agent(&uri, None);
            let drained = self.fifo(key).map_or(true, |fifo| fifo.waiting.is_empty());
            if drained {
                break;
            }
        }
    }

    /// The agent-side trigger: if the agent is idle, pick the winning
    /// fifo among its memberships and start a dispatch attempt there.
    fn kick_agent(&mut self, uri: &AgentId, excluded: Option<&FifoKey>) {
        let winner = match self.agents.get(uri) {
            Some(record) if record.is_idle() => select_fifo(&self.domains, record, excluded),
            _ => return,
        };
        if let Some(key) = winner {
            self.start_attempt(key, Some(uri.clone()));
        }
    }

    /// Begin one dispatch attempt on a fifo: resolve the target agents,
    /// pull the head call out of the waiting list, claim the targets and
    /// launch the offer task.
    fn start_attempt(&mut self, key: FifoKey, trigger: Option<AgentId>) {
        let (mode, idle) = match self.fifo(&key) {
            Some(fifo) if !fifo.waiting.is_empty() => {
                let idle: Vec<AgentId> = fifo
                    .agents
                    .iter()
                    .filter(|uri| self.agents.get(*uri).is_some_and(|r| r.is_idle()))
                    .cloned()
                    .collect();
                (fifo.mode, idle)
            }
            _ => return,
        };

        let targets: Vec<AgentId> = match mode {
            DispatchMode::RingAll => idle,
            DispatchMode::Enterprise => {
                let chosen = match trigger {
                    Some(uri) if idle.contains(&uri) => {
                        if let Some(fifo) = self.domains.get_mut(&key.domain).and_then(|d| d.fifo_mut(&key.name)) {
                            fifo.rotate_past(&uri);
                        }
                        Some(uri)
                    }
                    _ => match self.domains.get_mut(&key.domain).and_then(|d| d.fifo_mut(&key.name)) {
                        Some(fifo) => fifo.next_rotation_target(&self.agents, &HashSet::new()),
                        None => None,
                    },
                };
                chosen.into_iter().collect()
            }
        };
        if targets.is_empty() {
            return;
        }

        let (call, depth) = match self.domains.get_mut(&key.domain).and_then(|d| d.fifo_mut(&key.name)) {
            Some(fifo) => match fifo.pop_head() {
                Some(call) => (call, fifo.waiting.len()),
                None => return,
            },
            None => return,
        };
        self.depth_view.insert(key.clone(), depth);
        self.waiting_index.remove(&call.id);

        self.launch_offer(key, call, targets, HashSet::new());
    }

    /// Claim the targets and spawn the offer task. The claim happens
    /// before control returns to the event loop, so no other fifo can
    /// offer to the same agents while this attempt is in flight.
    fn launch_offer(
        &mut self,
        key: FifoKey,
        call: WaitingCall,
        targets: Vec<AgentId>,
        tried: HashSet<AgentId>,
    ) {
        for uri in &targets {
            if let Some(record) = self.agents.get_mut(uri) {
                record.set_state(AgentState::Ringing);
                self.agent_view.insert(uri.clone(), AgentState::Ringing);
            }
        }

        let offered_call = OfferedCall {
            id: call.id,
            caller: call.caller.clone(),
            domain: key.domain.clone(),
            queue: key.name.clone(),
            priority: call.priority,
            enqueued_at: call.enqueued_at,
        };
        info!("offering call {} on {} to {} agent(s)", call.id, key, targets.len());

        let handler = Arc::clone(&self.handler);
        let grace = self.config.offer_grace;
        let resolve_tx = self.cmd_tx.clone();
        let ring = targets.clone();
        let id = call.id;
        let task = tokio::spawn(async move {
            let outcome = run_offer(handler, offered_call, ring, grace).await;
            let _ = resolve_tx.send(Command::OfferResolved { id, outcome }).await;
        });

        self.in_flight.insert(
            id,
            InFlightAttempt { call, key, offered: targets, tried, task: task.abort_handle() },
        );
    }
}
