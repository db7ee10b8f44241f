//! Cross-fifo selection and the offer fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};

use crate::agent::{AgentId, AgentRecord};
use crate::dispatcher::commands::AttemptOutcome;
use crate::domain::Domain;
use crate::fifo::FifoKey;
use crate::handler::{DispatchHandler, OfferResponse, OfferedCall};

/// Pick the fifo that gets to offer work to `agent`.
///
/// Exactly one fifo may attempt dispatch to a freed agent: among the
/// agent's memberships with non-empty waiting lists, the fifo whose oldest
/// waiting call has waited longest wins; ties go to the fifo whose head
/// has the numerically lowest priority, then to fifo creation order.
/// `excluded` drops a fifo that just failed an attempt from the
/// synchronous re-selection so a declining agent cannot busy-loop against
/// the same head call.
pub(crate) fn select_fifo(
    domains: &HashMap<String, Domain>,
    agent: &AgentRecord,
    excluded: Option<&FifoKey>,
) -> Option<FifoKey> {
    agent
        .fifos
        .iter()
        .filter(|key| excluded.map_or(true, |skip| *key != skip))
        .filter_map(|key| domains.get(&key.domain)?.fifo(&key.name))
        .filter(|fifo| !fifo.waiting.is_empty())
        .min_by_key(|fifo| {
            let oldest = fifo
                .oldest_enqueued_at()
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            let head_priority = fifo.head().map(|call| call.priority).unwrap_or(u8::MAX);
            (oldest, head_priority, fifo.seq)
        })
        .map(|fifo| fifo.key.clone())
}

/// Run one offer attempt: ring every target concurrently and settle on
/// the first acceptance.
///
/// Declines are awaited until either someone accepts, everyone has
/// declined, or the grace period elapses. Returning with an acceptance
/// drops the remaining offer futures, which retracts those offers.
pub(crate) async fn run_offer(
    handler: Arc<dyn DispatchHandler>,
    call: OfferedCall,
    targets: Vec<AgentId>,
    grace: Duration,
) -> AttemptOutcome {
    let mut offers: FuturesUnordered<_> = targets
        .into_iter()
        .map(|agent| {
            let handler = Arc::clone(&handler);
            let call = call.clone();
            async move {
                let response = handler.offer(call, agent.clone()).await;
                (response, agent)
            }
        })
        .collect();

    let deadline = tokio::time::sleep(grace);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return AttemptOutcome::NoTaker,
            next = offers.next() => match next {
                Some((OfferResponse::Accepted, agent)) => {
                    return AttemptOutcome::Accepted { agent };
                }
                Some((OfferResponse::Declined, _)) => continue,
                None => return AttemptOutcome::NoTaker,
            }
        }
    }
}
