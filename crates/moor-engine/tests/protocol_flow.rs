//! End-to-end protocol flows through the engine facade, driven the way
//! the server drives it: API calls on one side, raw runtime events on the
//! other.

use std::sync::Arc;
use std::time::Duration;

use moor_core::ids::{ContextId, MessageId, SessionId};
use moor_core::protocol::{AgentCommand, AgentEvent};
use moor_core::session::{InteractionState, NO_RESPONSE_SENTINEL};
use moor_engine::testutil::RecordingRouter;
use moor_engine::{InstructionRouter, SyncConfig, SyncEngine};
use moor_store::{SessionStore, new_in_memory};

fn make_engine(config: SyncConfig) -> (Arc<SyncEngine>, Arc<RecordingRouter>) {
    let store = Arc::new(SessionStore::new(new_in_memory().unwrap()));
    let router = RecordingRouter::new();
    let engine =
        SyncEngine::new(store, Arc::clone(&router) as Arc<dyn InstructionRouter>, config).unwrap();
    (engine, router)
}

fn request_id_of(command: &AgentCommand) -> moor_core::ids::RequestId {
    let AgentCommand::Instruction { request_id, .. } = command;
    request_id.clone()
}

fn completion(session: &SessionId, request: Option<moor_core::ids::RequestId>) -> AgentEvent {
    AgentEvent::Completion {
        session_id: session.clone(),
        request_id: request,
        message_id: None,
    }
}

fn partial(session: &SessionId, message: &str, content: &str) -> AgentEvent {
    AgentEvent::PartialUpdate {
        session_id: session.clone(),
        message_id: MessageId::from_raw(message),
        content: content.into(),
    }
}

#[tokio::test]
async fn full_conversation_lifecycle() {
    let (engine, router) = make_engine(SyncConfig::default());

    // Session starts unlinked; first dispatch carries no context, which
    // tells the runtime to create one.
    let session = engine.create_session("lifecycle").unwrap();
    let first = engine.enqueue(&session.id, "set up the project", false).unwrap();

    let AgentCommand::Instruction { context_id, .. } = router.sent()[0].clone();
    assert!(context_id.is_none());

    // Runtime reports the context; the link persists.
    engine
        .handle_event(AgentEvent::ContextCreated {
            session_id: session.id.clone(),
            context_id: ContextId::from_raw("ctx-77"),
        })
        .unwrap();

    // Streamed response, then completion.
    engine
        .handle_event(partial(&session.id, "m1", "Creating files"))
        .unwrap();
    engine
        .handle_event(partial(&session.id, "m1", "Creating files... done."))
        .unwrap();
    let request = request_id_of(&router.sent()[0]);
    engine
        .handle_event(completion(&session.id, Some(request)))
        .unwrap();

    let stored = engine.store().get_interaction(&first.id).unwrap().unwrap();
    assert_eq!(stored.state, InteractionState::Complete);
    assert_eq!(stored.response, "Creating files... done.");

    // The next dispatch reuses the linked context.
    let _ = engine.enqueue(&session.id, "now add tests", false).unwrap();
    let AgentCommand::Instruction { context_id, .. } = router.last().unwrap();
    assert_eq!(context_id.map(|c| c.as_str().to_owned()).as_deref(), Some("ctx-77"));
}

#[tokio::test]
async fn sessions_are_isolated() {
    let (engine, router) = make_engine(SyncConfig::default());
    let alpha = engine.create_session("alpha").unwrap();
    let beta = engine.create_session("beta").unwrap();

    let a1 = engine.enqueue(&alpha.id, "alpha work", false).unwrap();
    let b1 = engine.enqueue(&beta.id, "beta work", false).unwrap();
    // Both dispatched: single-flight is per session, not global.
    assert_eq!(router.sent_count(), 2);

    // Beta's completion resolves only beta.
    let beta_request = request_id_of(&router.sent()[1]);
    engine
        .handle_event(completion(&beta.id, Some(beta_request)))
        .unwrap();

    let a = engine.store().get_interaction(&a1.id).unwrap().unwrap();
    let b = engine.store().get_interaction(&b1.id).unwrap().unwrap();
    assert_eq!(a.state, InteractionState::Sent);
    assert_eq!(b.state, InteractionState::Complete);
}

#[tokio::test]
async fn queue_drains_in_order_across_completions() {
    let (engine, router) = make_engine(SyncConfig::default());
    let session = engine.create_session("queue").unwrap();

    let prompts = ["one", "two", "three"];
    let mut ids = Vec::new();
    for prompt in prompts {
        ids.push(engine.enqueue(&session.id, prompt, false).unwrap().id);
    }
    assert_eq!(router.sent_count(), 1);

    // Complete each in turn; the engine dispatches the next on its own.
    for expected in 1..=prompts.len() {
        let request = request_id_of(&router.last().unwrap());
        engine
            .handle_event(completion(&session.id, Some(request)))
            .unwrap();
        let sent = router.sent_count();
        assert_eq!(sent, (expected + 1).min(prompts.len()));
    }

    for (id, prompt) in ids.iter().zip(prompts) {
        let stored = engine.store().get_interaction(id).unwrap().unwrap();
        assert_eq!(stored.state, InteractionState::Complete, "prompt {prompt}");
    }

    let order: Vec<String> = router
        .sent()
        .iter()
        .map(|c| {
            let AgentCommand::Instruction { content, .. } = c;
            content.clone()
        })
        .collect();
    assert_eq!(order, prompts);
}

#[tokio::test(start_paused = true)]
async fn wedged_agent_cannot_stall_the_queue() {
    let (engine, router) = make_engine(SyncConfig {
        request_timeout: Duration::from_secs(300),
        ..SyncConfig::default()
    });
    let session = engine.create_session("wedged").unwrap();
    let dead = engine.enqueue(&session.id, "never answered", false).unwrap();
    let next = engine.enqueue(&session.id, "waiting behind", false).unwrap();

    tokio::time::sleep(Duration::from_secs(301)).await;
    tokio::task::yield_now().await;

    let timed_out = engine.store().get_interaction(&dead.id).unwrap().unwrap();
    assert_eq!(timed_out.state, InteractionState::TimedOut);
    assert_eq!(timed_out.response, NO_RESPONSE_SENTINEL);

    // The queued instruction went out after the timeout fired.
    assert_eq!(router.sent_count(), 2);

    // And a very late completion for the dead request changes nothing.
    let dead_request = request_id_of(&router.sent()[0]);
    engine
        .handle_event(completion(&session.id, Some(dead_request)))
        .unwrap();
    let still = engine.store().get_interaction(&dead.id).unwrap().unwrap();
    assert_eq!(still.state, InteractionState::TimedOut);
    let live = engine.store().get_interaction(&next.id).unwrap().unwrap();
    assert_eq!(live.state, InteractionState::Sent);
}

#[tokio::test(start_paused = true)]
async fn streamed_partial_survives_timeout() {
    let (engine, _router) = make_engine(SyncConfig {
        request_timeout: Duration::from_secs(120),
        ..SyncConfig::default()
    });
    let session = engine.create_session("partial-timeout").unwrap();
    let interaction = engine.enqueue(&session.id, "go", false).unwrap();

    engine
        .handle_event(partial(&session.id, "m1", "got halfway there"))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(121)).await;
    tokio::task::yield_now().await;

    // Timed out, but the streamed text is kept instead of the sentinel.
    let stored = engine.store().get_interaction(&interaction.id).unwrap().unwrap();
    assert_eq!(stored.state, InteractionState::TimedOut);
    assert_eq!(stored.response, "got halfway there");
}

#[tokio::test]
async fn reconnect_flow_replays_queue_head() {
    let (engine, router) = make_engine(SyncConfig::default());
    let session = engine.create_session("reconnect").unwrap();

    engine
        .handle_event(AgentEvent::ContextCreated {
            session_id: session.id.clone(),
            context_id: ContextId::from_raw("ctx-r"),
        })
        .unwrap();

    // Agent goes away; instructions pile up.
    router.close_route(&session.id);
    let first = engine.enqueue(&session.id, "while offline 1", false).unwrap();
    let _second = engine.enqueue(&session.id, "while offline 2", false).unwrap();
    assert_eq!(router.sent_count(), 0);

    // New connection for the same session, agent announces readiness.
    router.open_route(&session.id);
    engine
        .handle_event(AgentEvent::AgentReady {
            session_id: session.id.clone(),
        })
        .unwrap();

    // Head of the queue goes out, on the previously linked context.
    assert_eq!(router.sent_count(), 1);
    let AgentCommand::Instruction {
        context_id,
        content,
        ..
    } = router.last().unwrap();
    assert_eq!(content, "while offline 1");
    assert_eq!(context_id.map(|c| c.as_str().to_owned()).as_deref(), Some("ctx-r"));
    let stored = engine.store().get_interaction(&first.id).unwrap().unwrap();
    assert_eq!(stored.state, InteractionState::Sent);
}

#[tokio::test]
async fn untagged_completion_fallback_targets_latest() {
    let (engine, router) = make_engine(SyncConfig::default());
    let session = engine.create_session("fallback").unwrap();

    let first = engine.enqueue(&session.id, "slow", false).unwrap();
    // Interrupt puts a second request in flight for the same session.
    let urgent = engine.enqueue(&session.id, "urgent", true).unwrap();
    assert_eq!(router.sent_count(), 2);

    // An untagged completion resolves the most recent dispatch, the
    // interrupt, not the superseded one.
    engine.handle_event(completion(&session.id, None)).unwrap();

    let urgent_stored = engine.store().get_interaction(&urgent.id).unwrap().unwrap();
    assert_eq!(urgent_stored.state, InteractionState::Complete);
    let first_stored = engine.store().get_interaction(&first.id).unwrap().unwrap();
    assert_eq!(first_stored.state, InteractionState::Sent);
}

#[tokio::test]
async fn protocol_noise_is_harmless() {
    let (engine, router) = make_engine(SyncConfig::default());
    let session = engine.create_session("noise").unwrap();
    let interaction = engine.enqueue(&session.id, "go", false).unwrap();

    // Keepalives, unknown event types, and partials re-delivered out of
    // order all pass through without disturbing the in-flight state.
    engine.handle_event(AgentEvent::Ping).unwrap();
    let unknown: AgentEvent =
        serde_json::from_str(r#"{"type":"telemetry_blob","session_id":"x","data":[1,2]}"#).unwrap();
    engine.handle_event(unknown).unwrap();
    engine
        .handle_event(partial(&session.id, "m1", "stable text"))
        .unwrap();
    engine
        .handle_event(partial(&session.id, "m1", "stable text"))
        .unwrap();

    let stored = engine.store().get_interaction(&interaction.id).unwrap().unwrap();
    assert_eq!(stored.state, InteractionState::Streaming);
    assert_eq!(stored.response, "stable text");
    assert_eq!(router.sent_count(), 1);
}

#[tokio::test]
async fn restart_rebuilds_links_and_resumes() {
    // First process lifetime: create, link, converse.
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("moor.db");

    let session_id;
    {
        let store = Arc::new(SessionStore::new(moor_store::new_pool(&db).unwrap()));
        let router = RecordingRouter::new();
        let engine = SyncEngine::new(
            store,
            Arc::clone(&router) as Arc<dyn InstructionRouter>,
            SyncConfig::default(),
        )
        .unwrap();
        let session = engine.create_session("durable").unwrap();
        session_id = session.id.clone();
        engine
            .handle_event(AgentEvent::ContextCreated {
                session_id: session.id.clone(),
                context_id: ContextId::from_raw("ctx-durable"),
            })
            .unwrap();
        engine.shutdown();
    }

    // Second lifetime over the same database: the registry is rebuilt and
    // dispatch immediately carries the old context.
    let store = Arc::new(SessionStore::new(moor_store::new_pool(&db).unwrap()));
    let router = RecordingRouter::new();
    let engine = SyncEngine::new(
        store,
        Arc::clone(&router) as Arc<dyn InstructionRouter>,
        SyncConfig::default(),
    )
    .unwrap();

    let _ = engine.enqueue(&session_id, "pick up where we left off", false).unwrap();
    let AgentCommand::Instruction { context_id, .. } = router.last().unwrap();
    assert_eq!(
        context_id.map(|c| c.as_str().to_owned()).as_deref(),
        Some("ctx-durable")
    );
}
