//! End-to-end dispatch scenarios.
//!
//! These run the whole engine against a scripted dispatch handler under a
//! paused runtime, so grace periods and the resting debounce elapse in
//! virtual time.

mod common;

use std::time::Duration;

use callq_engine::prelude::*;
use common::{bind, engine_with, wait_until, Reaction, ScriptedHandler};

#[tokio::test(start_paused = true)]
async fn ringall_offers_every_idle_agent_and_first_acceptance_wins() {
    let handler = ScriptedHandler::new(Reaction::NoAnswer);
    handler.script("b@x", Reaction::AcceptAfter(Duration::from_millis(100)));
    let (manager, _events) = engine_with(handler.clone());
    bind(&manager, "x", "support", None, &["a@x", "b@x", "c@x"]).await;

    let pending = manager.queue(QueueOptions::new("x", "support", "+15550100")).await.unwrap();
    let dispatched = pending.await.unwrap();
    assert_eq!(dispatched.agent, AgentId::from("b@x"));

    // all three idle agents were rung for the same call
    let offers = handler.offers();
    assert_eq!(offers.len(), 3, "ringall rings every idle agent: {offers:?}");
    assert!(offers.iter().all(|(call, _)| call.id == dispatched.id));

    // the winner is busy, the retracted offers returned their agents
    assert_eq!(manager.agent_state("b@x"), Some(AgentState::Busy));
    assert_eq!(manager.agent_state("a@x"), Some(AgentState::Available));
    assert_eq!(manager.agent_state("c@x"), Some(AgentState::Available));
    assert_eq!(manager.queue_depth("x", "support"), 0);
    assert_eq!(manager.stats().dispatched_total, 1);
}

#[tokio::test(start_paused = true)]
async fn enterprise_rotates_through_decliners() {
    let handler = ScriptedHandler::new(Reaction::Decline);
    handler.script("c@x", Reaction::Accept);
    let (manager, _events) = engine_with(handler.clone());
    bind(&manager, "x", "sales", Some(DispatchMode::Enterprise), &["a@x", "b@x", "c@x"]).await;

    let pending = manager.queue(QueueOptions::new("x", "sales", "+15550101")).await.unwrap();
    let dispatched = pending.await.unwrap();
    assert_eq!(dispatched.agent, AgentId::from("c@x"));

    // one agent at a time, in subscription order
    assert_eq!(handler.offered_agents(), vec!["a@x", "b@x", "c@x"]);
    assert_eq!(manager.agent_state("a@x"), Some(AgentState::Available));
    assert_eq!(manager.agent_state("b@x"), Some(AgentState::Available));
    assert_eq!(manager.agent_state("c@x"), Some(AgentState::Busy));
}

#[tokio::test(start_paused = true)]
async fn freed_agent_serves_the_longest_waiting_fifo() {
    let handler = ScriptedHandler::new(Reaction::Accept);
    let (manager, events) = engine_with(handler.clone());
    bind(&manager, "x", "aging", None, &["agent@x"]).await;
    bind(&manager, "x", "fresh", None, &["agent@x"]).await;

    // the agent is on a call while both queues build up
    events.publish(AcdEvent::CallNew(CallRef::resolved(CallId::new(), "agent@x", 1)));
    wait_until("agent busy", || manager.agent_state("agent@x") == Some(AgentState::Busy)).await;

    let pending_old = manager.queue(QueueOptions::new("x", "aging", "+old")).await.unwrap();
    let pending_new = manager.queue(QueueOptions::new("x", "fresh", "+new")).await.unwrap();

    // agent frees up: after the debounce it must serve the older queue
    events.publish(AcdEvent::CallDestroyed(CallRef::resolved(CallId::new(), "agent@x", 0)));
    wait_until("agent resting", || manager.agent_state("agent@x") == Some(AgentState::Resting))
        .await;

    let dispatched = pending_old.await.unwrap();
    assert_eq!(dispatched.agent, AgentId::from("agent@x"));
    assert_eq!(manager.queue_depth("x", "aging"), 0);
    assert_eq!(manager.queue_depth("x", "fresh"), 1);
    drop(pending_new);
}

#[tokio::test(start_paused = true)]
async fn calls_dispatch_in_priority_then_age_order() {
    let handler = ScriptedHandler::new(Reaction::Accept);
    let (manager, events) = engine_with(handler.clone());
    bind(&manager, "x", "support", None, &["agent@x"]).await;

    events.publish(AcdEvent::CallNew(CallRef::resolved(CallId::new(), "agent@x", 1)));
    wait_until("agent busy", || manager.agent_state("agent@x") == Some(AgentState::Busy)).await;

    let mut low = QueueOptions::new("x", "support", "+low");
    low.priority = Some(9);
    let mut high = QueueOptions::new("x", "support", "+high");
    high.priority = Some(1);
    let mut mid = QueueOptions::new("x", "support", "+mid");
    mid.priority = Some(5);

    let pending_low = manager.queue(low).await.unwrap();
    let pending_high = manager.queue(high).await.unwrap();
    let pending_mid = manager.queue(mid).await.unwrap();
    assert_eq!(manager.queue_depth("x", "support"), 3);

    // free the agent three times; each cycle drains exactly one call
    for pending in [pending_high, pending_mid, pending_low] {
        events.publish(AcdEvent::CallDestroyed(CallRef::resolved(CallId::new(), "agent@x", 0)));
        wait_until("agent resting", || {
            manager.agent_state("agent@x") == Some(AgentState::Resting)
        })
        .await;
        let dispatched = pending.await.unwrap();
        assert_eq!(dispatched.agent, AgentId::from("agent@x"));
    }

    let callers: Vec<String> = handler.offers().into_iter().map(|(call, _)| call.caller).collect();
    assert_eq!(callers, vec!["+high", "+mid", "+low"]);
}

#[tokio::test(start_paused = true)]
async fn resting_debounce_completes_into_available() {
    let handler = ScriptedHandler::new(Reaction::Accept);
    let (manager, events) = engine_with(handler);
    bind(&manager, "x", "support", None, &["agent@x"]).await;

    events.publish(AcdEvent::CallNew(CallRef::resolved(CallId::new(), "agent@x", 1)));
    wait_until("agent busy", || manager.agent_state("agent@x") == Some(AgentState::Busy)).await;

    events.publish(AcdEvent::CallDestroyed(CallRef::resolved(CallId::new(), "agent@x", 0)));
    wait_until("agent resting", || manager.agent_state("agent@x") == Some(AgentState::Resting))
        .await;

    // default agent lag is 30s; ride past it
    tokio::time::sleep(Duration::from_secs(31)).await;
    manager.flush().await.unwrap();
    assert_eq!(manager.agent_state("agent@x"), Some(AgentState::Available));
}

#[tokio::test(start_paused = true)]
async fn new_call_preempts_the_resting_debounce() {
    let handler = ScriptedHandler::new(Reaction::Accept);
    let (manager, events) = engine_with(handler);
    bind(&manager, "x", "support", None, &["agent@x"]).await;

    events.publish(AcdEvent::CallNew(CallRef::resolved(CallId::new(), "agent@x", 1)));
    wait_until("agent busy", || manager.agent_state("agent@x") == Some(AgentState::Busy)).await;
    events.publish(AcdEvent::CallDestroyed(CallRef::resolved(CallId::new(), "agent@x", 0)));
    wait_until("agent resting", || manager.agent_state("agent@x") == Some(AgentState::Resting))
        .await;

    // the agent picks up a new call before the debounce elapses
    tokio::time::sleep(Duration::from_secs(5)).await;
    events.publish(AcdEvent::CallNew(CallRef::resolved(CallId::new(), "agent@x", 1)));
    wait_until("agent busy again", || manager.agent_state("agent@x") == Some(AgentState::Busy))
        .await;

    // the stale timer's eventual fire must be a no-op
    tokio::time::sleep(Duration::from_secs(60)).await;
    manager.flush().await.unwrap();
    assert_eq!(manager.agent_state("agent@x"), Some(AgentState::Busy));
}

#[tokio::test(start_paused = true)]
async fn timed_out_call_is_never_dispatched_later() {
    let handler = ScriptedHandler::new(Reaction::Accept);
    let (manager, events) = engine_with(handler.clone());
    bind(&manager, "x", "support", None, &["agent@x"]).await;

    events.publish(AcdEvent::CallNew(CallRef::resolved(CallId::new(), "agent@x", 1)));
    wait_until("agent busy", || manager.agent_state("agent@x") == Some(AgentState::Busy)).await;

    let mut options = QueueOptions::new("x", "support", "+15550102");
    options.timeout = Some(Duration::from_secs(5));
    let pending = manager.queue(options).await.unwrap();

    tokio::time::sleep(Duration::from_secs(6)).await;
    let err = pending.await.unwrap_err();
    assert!(matches!(err, AcdError::Timeout(_)), "got {err:?}");
    assert_eq!(manager.queue_depth("x", "support"), 0);

    // the agent frees up immediately afterwards; the evicted call must
    // not come back
    events.publish(AcdEvent::CallDestroyed(CallRef::resolved(CallId::new(), "agent@x", 0)));
    wait_until("agent resting", || manager.agent_state("agent@x") == Some(AgentState::Resting))
        .await;
    tokio::time::sleep(Duration::from_secs(31)).await;
    manager.flush().await.unwrap();

    assert_eq!(manager.agent_state("agent@x"), Some(AgentState::Available));
    assert!(handler.offers().is_empty(), "evicted call was offered");
    assert_eq!(manager.stats().timed_out_total, 1);
}

#[tokio::test(start_paused = true)]
async fn destroyed_waiting_call_fails_as_abandoned() {
    let handler = ScriptedHandler::new(Reaction::Accept);
    let (manager, events) = engine_with(handler);

    // no agents anywhere; the call just waits
    let pending = manager.queue(QueueOptions::new("x", "support", "+15550103")).await.unwrap();
    assert_eq!(manager.queue_depth("x", "support"), 1);

    events.publish(AcdEvent::CallDestroyed(CallRef::anonymous(pending.id())));
    let err = pending.await.unwrap_err();
    assert!(matches!(err, AcdError::Abandoned(_)), "got {err:?}");
    assert_eq!(manager.queue_depth("x", "support"), 0);
    assert_eq!(manager.stats().abandoned_total, 1);
}

#[tokio::test(start_paused = true)]
async fn agent_never_holds_two_outstanding_offers() {
    let handler = ScriptedHandler::new(Reaction::NoAnswer);
    let (manager, _events) = engine_with(handler.clone());
    bind(&manager, "x", "a", None, &["agent@x"]).await;
    bind(&manager, "x", "b", None, &["agent@x"]).await;

    let pending_a = manager.queue(QueueOptions::new("x", "a", "+a")).await.unwrap();
    let pending_b = manager.queue(QueueOptions::new("x", "b", "+b")).await.unwrap();

    // both fifos hold work, but the shared agent gets exactly one offer
    wait_until("first offer", || handler.offers().len() == 1).await;
    manager.flush().await.unwrap();
    assert_eq!(handler.offers().len(), 1);
    assert_eq!(manager.agent_state("agent@x"), Some(AgentState::Ringing));
    assert_eq!(handler.offers()[0].0.id, pending_a.id());

    // once the grace period expires, the other fifo gets its turn
    tokio::time::sleep(Duration::from_secs(21)).await;
    wait_until("second offer", || handler.offers().len() == 2).await;
    assert_eq!(handler.offers()[1].0.id, pending_b.id());

    drop(pending_a);
    drop(pending_b);
}

#[tokio::test(start_paused = true)]
async fn unreachable_agent_is_skipped_until_reregistered() {
    let handler = ScriptedHandler::new(Reaction::Accept);
    let (manager, events) = engine_with(handler.clone());
    bind(&manager, "x", "support", None, &["agent@x"]).await;

    events.publish(AcdEvent::Unregister(Registration { uri: "agent@x".into() }));
    tokio::time::sleep(Duration::from_millis(10)).await;
    manager.flush().await.unwrap();

    let pending = manager.queue(QueueOptions::new("x", "support", "+15550104")).await.unwrap();
    manager.flush().await.unwrap();

    // membership and state are retained, but selection skips the agent
    assert!(handler.offers().is_empty());
    assert_eq!(manager.agent_state("agent@x"), Some(AgentState::Available));
    assert_eq!(manager.queue_depth("x", "support"), 1);

    // back on network: the agent resumes participating automatically
    events.publish(AcdEvent::Register(Registration { uri: "agent@x".into() }));
    let dispatched = pending.await.unwrap();
    assert_eq!(dispatched.agent, AgentId::from("agent@x"));
}
