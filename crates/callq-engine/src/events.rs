//! Event bus consumed by the distribution manager.
//!
//! The signaling stack publishes five event kinds on an [`EventSource`]:
//! `call.new`, `call.authed`, `call.destroyed`, `register` and
//! `unregister`. Call events carry a [`CallRef`] whose entity (identity URI
//! plus concurrent call count) resolves asynchronously; registration events
//! carry the registered URI. The manager subscribes at construction and
//! funnels every event through its single dispatcher task.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::agent::AgentId;
use crate::fifo::CallId;

/// Resolved identity of a call's endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Identity URI, e.g. `1000@example.com`.
    pub uri: String,
    /// Concurrent call count for this identity, mirrored from the
    /// signaling layer. An agent is only considered truly free when this
    /// drops to zero.
    pub ccc: u32,
}

/// Asynchronous entity resolution for a call.
///
/// Identity lookups in the signaling layer are asynchronous and may fail;
/// `None` means the endpoint could not be resolved (anonymous callers,
/// lookups racing call teardown).
#[async_trait]
pub trait EntityLookup: Send + Sync {
    async fn entity(&self) -> Option<Entity>;
}

struct Resolved(Option<Entity>);

#[async_trait]
impl EntityLookup for Resolved {
    async fn entity(&self) -> Option<Entity> {
        self.0.clone()
    }
}

/// Reference to a call carried by call lifecycle events.
#[derive(Clone)]
pub struct CallRef {
    id: CallId,
    entity: Arc<dyn EntityLookup>,
}

impl CallRef {
    /// Wrap a call id with an asynchronous entity lookup.
    pub fn new(id: CallId, entity: Arc<dyn EntityLookup>) -> Self {
        Self { id, entity }
    }

    /// A call whose entity is already known, typically an agent's own
    /// line reported by the signaling layer.
    pub fn resolved(id: CallId, uri: impl Into<String>, ccc: u32) -> Self {
        Self::new(id, Arc::new(Resolved(Some(Entity { uri: uri.into(), ccc }))))
    }

    /// A call with no resolvable entity (anonymous caller).
    pub fn anonymous(id: CallId) -> Self {
        Self::new(id, Arc::new(Resolved(None)))
    }

    /// The call's id.
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Resolve the call's entity.
    pub async fn entity(&self) -> Option<Entity> {
        self.entity.entity().await
    }
}

impl fmt::Debug for CallRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRef").field("id", &self.id).finish()
    }
}

/// Registration record carried by `register`/`unregister` events.
#[derive(Debug, Clone)]
pub struct Registration {
    /// URI of the registering endpoint.
    pub uri: AgentId,
}

/// Events delivered by the [`EventSource`].
#[derive(Debug, Clone)]
pub enum AcdEvent {
    /// A new call appeared in the signaling layer.
    CallNew(CallRef),
    /// A call passed authentication.
    CallAuthed(CallRef),
    /// A call was torn down.
    CallDestroyed(CallRef),
    /// An endpoint registered.
    Register(Registration),
    /// An endpoint unregistered.
    Unregister(Registration),
}

/// Publish/subscribe bus for call and registration events.
///
/// A thin wrapper over a tokio broadcast channel. Cloning shares the
/// channel; publishing with no live subscriber is not an error.
///
/// # Examples
///
/// ```
/// use callq_engine::events::{AcdEvent, CallRef, EventSource};
/// use callq_engine::CallId;
///
/// let bus = EventSource::new(64);
/// let mut rx = bus.subscribe();
/// bus.publish(AcdEvent::CallNew(CallRef::resolved(CallId::new(), "1000@example.com", 1)));
/// ```
#[derive(Clone)]
pub struct EventSource {
    tx: broadcast::Sender<AcdEvent>,
}

impl EventSource {
    /// Create a bus able to buffer `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: AcdEvent) {
        // A send error only means nobody is listening right now.
        let _ = self.tx.send(event);
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AcdEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventSource {
    fn default() -> Self {
        Self::new(256)
    }
}
