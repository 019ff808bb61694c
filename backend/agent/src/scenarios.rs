//! End-to-end turn scenarios against the deterministic mock provider and
//! scripted fakes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value, json};

use confab_core::message::meta;
use confab_core::{
    ConfabError, GenerationRequest, Message, ModelEvent, ModelProvider, ModelStream, Role,
    SessionStore, StoreError, StreamEvent, ToolCallProposal, TurnState,
};
use confab_memory::{CompressionSettings, InMemorySessionStore};
use confab_providers::MockProvider;
use confab_tools::ToolRegistry;

use crate::coordinator::{EventStream, SequencedEvent};
use crate::gate::{ConfirmationPolicy, GateState};
use crate::orchestrator::{Orchestrator, OrchestratorSettings};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Wraps the mock; fails a number of generations and optionally every
/// summary, and records each request it sees.
struct FlakyProvider {
    inner: MockProvider,
    generate_failures: usize,
    fail_summaries: bool,
    calls: AtomicUsize,
    summaries: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl FlakyProvider {
    fn new(generate_failures: usize, fail_summaries: bool) -> Self {
        Self {
            inner: MockProvider::new(),
            generate_failures,
            fail_summaries,
            calls: AtomicUsize::new(0),
            summaries: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ModelProvider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<ModelStream, ConfabError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if call < self.generate_failures {
            return Err(ConfabError::provider("flaky", "upstream unavailable"));
        }
        self.inner.generate(request).await
    }

    async fn summarize(&self, messages: &[Message]) -> Result<String, ConfabError> {
        self.summaries.fetch_add(1, Ordering::SeqCst);
        if self.fail_summaries {
            return Err(ConfabError::provider("flaky", "summary unavailable"));
        }
        self.inner.summarize(messages).await
    }
}

/// Replays fixed outputs, one per generation; the last one repeats.
struct ScriptedProvider {
    scripts: Vec<Vec<ModelEvent>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(scripts: Vec<Vec<ModelEvent>>) -> Self {
        Self {
            scripts,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _request: GenerationRequest) -> Result<ModelStream, ConfabError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts[call.min(self.scripts.len() - 1)].clone();
        Ok(Box::pin(futures::stream::iter(
            script.into_iter().map(Ok::<_, ConfabError>),
        )))
    }

    async fn summarize(&self, _messages: &[Message]) -> Result<String, ConfabError> {
        Ok("scripted summary".into())
    }
}

struct FailingStore;

#[async_trait]
impl SessionStore for FailingStore {
    async fn append(&self, _session_id: &str, _message: &Message) -> Result<(), StoreError> {
        Err(StoreError::new("disk full"))
    }

    async fn load(&self, _session_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(Vec::new())
    }

    async fn clear(&self, _session_id: &str) -> Result<usize, StoreError> {
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn orchestrator(
    provider: Arc<dyn ModelProvider>,
    store: Arc<dyn SessionStore>,
    policy: ConfirmationPolicy,
) -> Orchestrator {
    Orchestrator::new(
        store,
        provider,
        ToolRegistry::builtin(),
        CompressionSettings::default(),
        OrchestratorSettings {
            policy,
            ..OrchestratorSettings::default()
        },
    )
}

fn mock(policy: ConfirmationPolicy) -> (Orchestrator, Arc<InMemorySessionStore>) {
    let store = Arc::new(InMemorySessionStore::new());
    let orch = orchestrator(Arc::new(MockProvider::new()), store.clone(), policy);
    (orch, store)
}

/// Read until the stream closes or a terminal event arrives.
async fn drain(events: &mut EventStream) -> Vec<SequencedEvent> {
    let mut out = Vec::new();
    while let Some(frame) = events.next().await {
        let terminal = frame.event.is_terminal();
        out.push(frame);
        if terminal {
            break;
        }
    }
    out
}

/// Read until a tool call parks for confirmation.
async fn until_awaiting(events: &mut EventStream) -> Vec<StreamEvent> {
    let mut out = Vec::new();
    while let Some(SequencedEvent { event, .. }) = events.next().await {
        let parked = matches!(
            event,
            StreamEvent::ToolCall {
                awaiting_confirmation: true,
                ..
            }
        );
        out.push(event);
        if parked {
            return out;
        }
    }
    panic!("stream ended before a confirmation request: {out:?}");
}

/// Wait for the turn to finish and its live record to leave the registry.
async fn released(orch: &Orchestrator, session_id: &str) -> bool {
    for _ in 0..50 {
        orch.wait_idle(session_id).await;
        if orch.session(session_id).await.is_none() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn roles(log: &[Message]) -> Vec<Role> {
    log.iter().map(|m| m.role).collect()
}

fn plain(frames: Vec<SequencedEvent>) -> Vec<StreamEvent> {
    frames.into_iter().map(|f| f.event).collect()
}

fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::kind).collect()
}

fn text(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Message { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

fn tool_results(events: &[StreamEvent]) -> Vec<(Value, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ToolResult {
                result, is_error, ..
            } => Some((result.clone(), *is_error)),
            _ => None,
        })
        .collect()
}

fn args(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}

async fn prefill(store: &InMemorySessionStore, session_id: &str, messages: usize) {
    for i in 0..messages {
        let body = format!("{i:02}{}", "x".repeat(398));
        let message = if i % 2 == 0 {
            Message::user(body)
        } else {
            Message::assistant(body)
        };
        store.append(session_id, &message).await.unwrap();
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn addition_runs_tool_and_reports_result() {
    let (orch, store) = mock(ConfirmationPolicy::Never);
    let mut handle = orch.send_message(None, "What is 15 + 25?").await.unwrap();
    assert!(uuid::Uuid::parse_str(&handle.session_id).is_ok());

    let events = plain(drain(&mut handle.events).await);
    let k = kinds(&events);
    assert_eq!(k[0], "session_info");
    assert_eq!(k[1], "tool_call");
    assert_eq!(k[2], "tool_result");
    assert_eq!(&k[k.len() - 2..], &["complete", "stream_end"]);
    assert!(k[3..k.len() - 2].iter().all(|kind| *kind == "message"));

    match &events[1] {
        StreamEvent::ToolCall {
            name,
            args,
            awaiting_confirmation,
            ..
        } => {
            assert_eq!(name, "add");
            assert_eq!(args, &json!({"a": 15, "b": 25}));
            assert!(!awaiting_confirmation);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(tool_results(&events), vec![(json!(40), false)]);
    assert!(text(&events).contains("40"));

    orch.wait_idle(&handle.session_id).await;
    let log = store.load(&handle.session_id).await.unwrap();
    let roles: Vec<Role> = log.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::ToolCall, Role::ToolResult, Role::Assistant]
    );
    assert_eq!(log[1].meta_str(meta::STATUS), Some("auto"));
}

#[tokio::test]
async fn approved_confirmation_resumes_on_same_stream() {
    let (orch, store) = mock(ConfirmationPolicy::Always);
    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();

    let before = until_awaiting(&mut handle.events).await;
    assert_eq!(kinds(&before), vec!["session_info", "tool_call"]);
    let pending = orch.pending_confirmation("s1").await.expect("pending call");
    assert_eq!(pending.proposal.name, "add");

    let ack = orch.confirm("s1", true, Map::new()).await.unwrap();
    assert_eq!(ack.status, "accepted");
    assert_eq!(ack.decision, "approved");

    let after = plain(drain(&mut handle.events).await);
    assert_eq!(kinds(&after)[0], "tool_result");
    assert_eq!(tool_results(&after), vec![(json!(40), false)]);
    assert!(text(&after).contains("40"));
    assert_eq!(kinds(&after).last(), Some(&"stream_end"));

    orch.wait_idle("s1").await;
    let log = store.load("s1").await.unwrap();
    assert_eq!(log[1].meta_str(meta::STATUS), Some("approved"));
    assert!(orch.pending_confirmation("s1").await.is_none());
}

#[tokio::test]
async fn rejection_withholds_tool_result() {
    let (orch, store) = mock(ConfirmationPolicy::Always);
    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();
    until_awaiting(&mut handle.events).await;

    let ack = orch.confirm("s1", false, Map::new()).await.unwrap();
    assert_eq!(ack.decision, "rejected");

    let after = plain(drain(&mut handle.events).await);
    assert!(!kinds(&after).contains(&"tool_result"));
    let reply = text(&after);
    assert!(!reply.contains("40"));
    assert!(!reply.is_empty());
    assert_eq!(&kinds(&after)[after.len() - 2..], &["complete", "stream_end"]);

    orch.wait_idle("s1").await;
    let log = store.load("s1").await.unwrap();
    assert_eq!(log[1].role, Role::ToolCall);
    assert_eq!(log[1].meta_str(meta::STATUS), Some("rejected"));
    assert!(log.iter().all(|m| m.role != Role::ToolResult));
}

#[tokio::test]
async fn edited_arguments_replace_proposed_ones() {
    let (orch, _store) = mock(ConfirmationPolicy::Always);
    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();
    until_awaiting(&mut handle.events).await;

    orch.confirm("s1", true, args(json!({"a": 5, "b": 3})))
        .await
        .unwrap();
    let after = plain(drain(&mut handle.events).await);
    assert_eq!(tool_results(&after), vec![(json!(8), false)]);
    assert!(text(&after).contains('8'));
}

#[tokio::test]
async fn division_by_zero_is_a_tool_error() {
    let (orch, _store) = mock(ConfirmationPolicy::Never);
    let mut handle = orch
        .send_message(Some("s1".into()), "Calculate 50 / 0")
        .await
        .unwrap();
    let events = plain(drain(&mut handle.events).await);

    assert_eq!(
        tool_results(&events),
        vec![(json!({"error": "Cannot divide by zero"}), true)]
    );
    let reply = text(&events);
    assert!(!reply.is_empty());
    assert!(!reply.chars().any(|c| c.is_ascii_digit()));
    assert_eq!(kinds(&events).last(), Some(&"stream_end"));
}

#[tokio::test(start_paused = true)]
async fn second_message_while_streaming_is_busy() {
    let store = Arc::new(InMemorySessionStore::new());
    let provider = Arc::new(MockProvider::new().with_delay(Duration::from_millis(10)));
    let orch = orchestrator(provider, store, ConfirmationPolicy::Never);

    let mut handle = orch.send_message(Some("s1".into()), "hello").await.unwrap();
    let mut frames = Vec::new();
    frames.push(handle.events.next().await.unwrap());
    frames.push(handle.events.next().await.unwrap());
    assert_eq!(frames[1].event.kind(), "message");

    let err = orch
        .send_message(Some("s1".into()), "What is 1 + 1?")
        .await
        .err()
        .expect("busy");
    assert_eq!(err.code(), "busy");

    frames.extend(drain(&mut handle.events).await);
    let seqs: Vec<u64> = frames.iter().map(|f| f.seq).collect();
    let expected: Vec<u64> = (seqs[0]..seqs[0] + seqs.len() as u64).collect();
    assert_eq!(seqs, expected);
    let events = plain(frames);
    assert_eq!(kinds(&events).last(), Some(&"stream_end"));
    assert!(!kinds(&events).contains(&"error"));
}

#[tokio::test]
async fn message_while_awaiting_confirmation_is_busy() {
    let (orch, _store) = mock(ConfirmationPolicy::Always);
    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();
    until_awaiting(&mut handle.events).await;
    orch.wait_idle("s1").await;

    let err = orch
        .send_message(Some("s1".into()), "never mind")
        .await
        .err()
        .expect("busy");
    assert_eq!(err.code(), "busy");
}

#[tokio::test(start_paused = true)]
async fn unanswered_confirmation_times_out_as_rejection() {
    let (orch, store) = mock(ConfirmationPolicy::Always);
    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();
    until_awaiting(&mut handle.events).await;

    let after = plain(drain(&mut handle.events).await);
    assert!(!kinds(&after).contains(&"tool_result"));
    assert!(!text(&after).contains("40"));
    assert_eq!(kinds(&after).last(), Some(&"stream_end"));

    orch.wait_idle("s1").await;
    let log = store.load("s1").await.unwrap();
    assert_eq!(log[1].meta_str(meta::STATUS), Some("timed_out"));

    let err = orch.confirm("s1", true, Map::new()).await.unwrap_err();
    assert_eq!(err.code(), "stale_confirmation");
}

#[tokio::test]
async fn late_confirmation_is_expired() {
    let (orch, store) = mock(ConfirmationPolicy::Always);
    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();
    until_awaiting(&mut handle.events).await;
    orch.wait_idle("s1").await;

    let session = orch.session("s1").await.unwrap();
    let mut pending = session.take_pending().unwrap();
    pending.created_at -= chrono::Duration::seconds(60);
    session.set_pending(pending);

    let err = orch.confirm("s1", true, Map::new()).await.unwrap_err();
    assert_eq!(err.code(), "confirmation_expired");

    let after = plain(drain(&mut handle.events).await);
    assert!(!kinds(&after).contains(&"tool_result"));
    orch.wait_idle("s1").await;
    let log = store.load("s1").await.unwrap();
    assert_eq!(log[1].meta_str(meta::STATUS), Some("timed_out"));
}

#[tokio::test]
async fn confirmation_without_pending_call_is_stale() {
    let (orch, _store) = mock(ConfirmationPolicy::Never);
    let err = orch.confirm("nobody", true, Map::new()).await.unwrap_err();
    assert_eq!(err.code(), "stale_confirmation");

    let mut handle = orch.send_message(Some("s1".into()), "hello").await.unwrap();
    drain(&mut handle.events).await;
    orch.wait_idle("s1").await;
    let err = orch.confirm("s1", false, Map::new()).await.unwrap_err();
    assert_eq!(err.code(), "stale_confirmation");
}

#[tokio::test]
async fn store_failure_emits_single_error() {
    let orch = orchestrator(
        Arc::new(MockProvider::new()),
        Arc::new(FailingStore),
        ConfirmationPolicy::Never,
    );
    let mut handle = orch.send_message(Some("s1".into()), "hello").await.unwrap();
    let events = plain(drain(&mut handle.events).await);
    assert_eq!(kinds(&events), vec!["error"]);
    match &events[0] {
        StreamEvent::Error { code, content, .. } => {
            assert_eq!(code, "persistence_error");
            assert!(content.contains("disk full"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(handle.events.next().await.is_none());

    assert!(released(&orch, "s1").await);
    assert_eq!(orch.session_stats("s1").await.unwrap().state, TurnState::Idle);
}

#[tokio::test]
async fn failed_generation_is_retried_once() {
    let store = Arc::new(InMemorySessionStore::new());
    let provider = Arc::new(FlakyProvider::new(1, false));
    let orch = orchestrator(provider.clone(), store, ConfirmationPolicy::Never);
    let mut handle = orch.send_message(Some("s1".into()), "hello").await.unwrap();
    let events = plain(drain(&mut handle.events).await);
    assert_eq!(kinds(&events).last(), Some(&"stream_end"));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn persistent_provider_failure_ends_turn() {
    let store = Arc::new(InMemorySessionStore::new());
    let provider = Arc::new(FlakyProvider::new(usize::MAX, false));
    let orch = orchestrator(provider.clone(), store.clone(), ConfirmationPolicy::Never);
    let mut handle = orch.send_message(Some("s1".into()), "hello").await.unwrap();
    let events = plain(drain(&mut handle.events).await);

    assert_eq!(kinds(&events), vec!["session_info", "error"]);
    match &events[1] {
        StreamEvent::Error { code, .. } => assert_eq!(code, "provider_error"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

    assert!(released(&orch, "s1").await);
    assert_eq!(store.load("s1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn summarizer_failure_degrades_context() {
    let store = Arc::new(InMemorySessionStore::new());
    prefill(&store, "s1", 10).await;
    let provider = Arc::new(FlakyProvider::new(0, true));
    let orch = orchestrator(provider.clone(), store, ConfirmationPolicy::Never);

    let mut handle = orch.send_message(Some("s1".into()), "hello").await.unwrap();
    let events = plain(drain(&mut handle.events).await);
    assert_eq!(
        events[0],
        StreamEvent::SessionInfo {
            session_id: "s1".into(),
            compressed: false,
            degraded: true,
        }
    );
    assert_eq!(kinds(&events).last(), Some(&"stream_end"));
    assert!(events.contains(&StreamEvent::Complete {
        session_id: "s1".into(),
        degraded: true,
    }));

    let requests = provider.requests.lock().unwrap();
    assert!(requests[0].context.total_chars() <= 3200);
}

#[tokio::test]
async fn degraded_flag_reaches_complete_after_tool_step() {
    let store = Arc::new(InMemorySessionStore::new());
    prefill(&store, "s1", 10).await;
    let provider = Arc::new(FlakyProvider::new(0, true));
    let orch = orchestrator(provider, store, ConfirmationPolicy::Never);

    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();
    let events = plain(drain(&mut handle.events).await);
    assert_eq!(
        events.iter().filter(|e| e.kind() == "session_info").count(),
        1
    );
    assert_eq!(tool_results(&events), vec![(json!(40), false)]);
    assert!(events.contains(&StreamEvent::Complete {
        session_id: "s1".into(),
        degraded: true,
    }));
}

#[tokio::test]
async fn clean_turn_completes_without_degraded_flag() {
    let (orch, _store) = mock(ConfirmationPolicy::Never);
    let mut handle = orch.send_message(Some("s1".into()), "hello").await.unwrap();
    let events = plain(drain(&mut handle.events).await);
    assert!(events.contains(&StreamEvent::Complete {
        session_id: "s1".into(),
        degraded: false,
    }));
}

#[tokio::test]
async fn summary_is_computed_once_per_turn() {
    let store = Arc::new(InMemorySessionStore::new());
    prefill(&store, "s1", 10).await;
    let provider = Arc::new(FlakyProvider::new(0, false));
    let orch = orchestrator(provider.clone(), store, ConfirmationPolicy::Never);

    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();
    let events = plain(drain(&mut handle.events).await);
    assert_eq!(tool_results(&events), vec![(json!(40), false)]);

    let requests = provider.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.context.compressed));
    assert_eq!(
        requests[0].context.messages[0].content,
        requests[1].context.messages[0].content
    );
    assert_eq!(provider.summaries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn compression_never_touches_stored_log() {
    let (orch, store) = mock(ConfirmationPolicy::Never);
    prefill(&store, "s1", 10).await;
    let before = store.load("s1").await.unwrap();

    let mut handle = orch.send_message(Some("s1".into()), "hello").await.unwrap();
    let events = plain(drain(&mut handle.events).await);
    assert!(matches!(
        events[0],
        StreamEvent::SessionInfo {
            compressed: true,
            degraded: false,
            ..
        }
    ));

    orch.wait_idle("s1").await;
    let after = store.load("s1").await.unwrap();
    assert_eq!(&after[..before.len()], &before[..]);
    assert_eq!(after.len(), before.len() + 2);
    assert!(after.iter().all(|m| !m.is_summary()));
}

#[tokio::test]
async fn small_log_is_sent_verbatim() {
    let store = Arc::new(InMemorySessionStore::new());
    let provider = Arc::new(FlakyProvider::new(0, false));
    let orch = orchestrator(provider.clone(), store.clone(), ConfirmationPolicy::Never);

    let mut handle = orch.send_message(Some("s1".into()), "hello").await.unwrap();
    drain(&mut handle.events).await;
    orch.wait_idle("s1").await;

    let log = store.load("s1").await.unwrap();
    let requests = provider.requests.lock().unwrap();
    let sent = &requests[0].context;
    assert!(!sent.compressed && !sent.degraded);
    assert_eq!(sent.messages, log[..log.len() - 1].to_vec());
}

#[tokio::test]
async fn invalid_proposal_is_reported_back_to_model() {
    let store = Arc::new(InMemorySessionStore::new());
    let provider = Arc::new(ScriptedProvider::new(vec![
        vec![ModelEvent::ToolCall(ToolCallProposal::new(
            "add",
            args(json!({"a": 1})),
        ))],
        vec![ModelEvent::Delta("Sorry, let me try again.".into())],
    ]));
    let orch = orchestrator(provider, store.clone(), ConfirmationPolicy::Always);

    let mut handle = orch.send_message(Some("s1".into()), "add one").await.unwrap();
    let events = plain(drain(&mut handle.events).await);
    assert_eq!(
        &kinds(&events)[..3],
        &["session_info", "tool_call", "tool_result"]
    );
    let (payload, is_error) = tool_results(&events).remove(0);
    assert!(is_error);
    assert!(payload["error"].as_str().unwrap().starts_with("invalid call to 'add'"));
    assert_eq!(text(&events), "Sorry, let me try again.");
    assert!(orch.pending_confirmation("s1").await.is_none());

    orch.wait_idle("s1").await;
    let log = store.load("s1").await.unwrap();
    assert_eq!(log[1].meta_str(meta::STATUS), Some("invalid"));
    assert!(log[2].is_error());
}

#[tokio::test]
async fn runaway_tool_loop_stops_at_step_limit() {
    let store = Arc::new(InMemorySessionStore::new());
    let provider = Arc::new(ScriptedProvider::new(vec![vec![ModelEvent::ToolCall(
        ToolCallProposal::new("add", args(json!({"a": 1, "b": 1}))),
    )]]));
    let orch = Orchestrator::new(
        store,
        provider,
        ToolRegistry::builtin(),
        CompressionSettings::default(),
        OrchestratorSettings {
            max_steps: 2,
            policy: ConfirmationPolicy::Never,
            ..OrchestratorSettings::default()
        },
    );

    let mut handle = orch.send_message(Some("s1".into()), "loop").await.unwrap();
    let events = plain(drain(&mut handle.events).await);
    assert_eq!(tool_results(&events).len(), 2);
    assert_eq!(kinds(&events).last(), Some(&"error"));
    assert!(released(&orch, "s1").await);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_generation_and_frees_session() {
    let store = Arc::new(InMemorySessionStore::new());
    let provider = Arc::new(MockProvider::new().with_delay(Duration::from_millis(10)));
    let orch = orchestrator(provider, store.clone(), ConfirmationPolicy::Never);

    let mut handle = orch.send_message(Some("s1".into()), "hello").await.unwrap();
    handle.events.next().await.unwrap();
    handle.events.next().await.unwrap();
    drop(handle);

    assert!(released(&orch, "s1").await);
    let log = store.load("s1").await.unwrap();
    assert_eq!(log.len(), 1);

    let mut next = orch.send_message(Some("s1".into()), "hello").await.unwrap();
    let events = plain(drain(&mut next.events).await);
    assert_eq!(kinds(&events).last(), Some(&"stream_end"));
}

#[tokio::test]
async fn approved_tool_runs_after_subscriber_leaves() {
    let (orch, store) = mock(ConfirmationPolicy::Always);
    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();
    until_awaiting(&mut handle.events).await;
    drop(handle);

    orch.confirm("s1", true, Map::new()).await.unwrap();
    assert!(released(&orch, "s1").await);

    let log = store.load("s1").await.unwrap();
    assert_eq!(
        roles(&log),
        vec![Role::User, Role::ToolCall, Role::ToolResult, Role::Assistant]
    );
    assert_eq!(log[2].content, "40");
    assert!(log[3].content.contains("40"));
}

#[tokio::test]
async fn rejection_after_subscriber_leaves_still_answers() {
    let (orch, store) = mock(ConfirmationPolicy::Always);
    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();
    until_awaiting(&mut handle.events).await;
    drop(handle);

    orch.confirm("s1", false, Map::new()).await.unwrap();
    assert!(released(&orch, "s1").await);

    let log = store.load("s1").await.unwrap();
    assert_eq!(roles(&log), vec![Role::User, Role::ToolCall, Role::Assistant]);
    assert_eq!(log[1].meta_str(meta::STATUS), Some("rejected"));
    assert!(!log[2].content.is_empty());
}

#[tokio::test]
async fn collected_turn_answers_after_confirmation() {
    let (orch, store) = mock(ConfirmationPolicy::Always);
    let summary = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap()
        .collect()
        .await;
    assert!(summary.awaiting_confirmation);
    assert_eq!(summary.tool_calls.len(), 1);

    orch.confirm("s1", true, Map::new()).await.unwrap();
    assert!(released(&orch, "s1").await);

    let log = store.load("s1").await.unwrap();
    let last = log.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert!(last.content.contains("40"));
    assert_eq!(log[1].meta_str(meta::STATUS), Some("approved"));
}

#[tokio::test]
async fn resubscriber_receives_resumed_events() {
    let (orch, _store) = mock(ConfirmationPolicy::Always);
    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();
    until_awaiting(&mut handle.events).await;
    drop(handle);

    let mut events = orch.subscribe("s1").await.unwrap();
    orch.confirm("s1", true, Map::new()).await.unwrap();
    let after = plain(drain(&mut events).await);
    assert_eq!(tool_results(&after), vec![(json!(40), false)]);
    assert!(text(&after).contains("40"));
    assert_eq!(kinds(&after).last(), Some(&"stream_end"));
}

#[tokio::test]
async fn stats_reflect_pending_confirmation() {
    let (orch, _store) = mock(ConfirmationPolicy::Always);
    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();
    until_awaiting(&mut handle.events).await;
    orch.wait_idle("s1").await;

    let stats = orch.session_stats("s1").await.unwrap();
    assert_eq!(stats.message_count, 1);
    assert_eq!(stats.total_characters, "What is 15 + 25?".len());
    assert_eq!(stats.max_characters, 3200);
    assert!(!stats.needs_compression);
    assert_eq!(stats.state, TurnState::ConfirmationPending);
    assert_eq!(stats.gate, GateState::AwaitingConfirmation);
    assert_eq!(stats.pending.map(|p| p.proposal.name), Some("add".to_string()));
}

#[tokio::test]
async fn gate_state_follows_confirmation() {
    let (orch, _store) = mock(ConfirmationPolicy::Always);
    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();
    until_awaiting(&mut handle.events).await;
    let session = orch.session("s1").await.unwrap();
    assert_eq!(session.gate_state(), GateState::AwaitingConfirmation);

    orch.confirm("s1", false, Map::new()).await.unwrap();
    drain(&mut handle.events).await;
    orch.wait_idle("s1").await;
    assert_eq!(session.gate_state(), GateState::Rejected);
}

#[tokio::test]
async fn auto_executed_call_records_approved_gate() {
    let (orch, _store) = mock(ConfirmationPolicy::Never);
    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();
    handle.events.next().await.unwrap();
    let session = orch.session("s1").await.unwrap();
    drain(&mut handle.events).await;
    orch.wait_idle("s1").await;
    assert_eq!(session.gate_state(), GateState::Approved);
}

#[tokio::test]
async fn subscribe_to_unknown_session_is_not_found() {
    let (orch, _store) = mock(ConfirmationPolicy::Never);
    for i in 0..100 {
        let id = format!("ghost-{i}");
        let err = orch.subscribe(&id).await.err().expect("unknown session");
        assert_eq!(err.code(), "session_not_found");
        assert!(orch.session(&id).await.is_none());
    }
}

#[tokio::test]
async fn finished_turns_release_their_record() {
    let (orch, store) = mock(ConfirmationPolicy::Never);
    for i in 0..20 {
        let id = format!("s{i}");
        let mut handle = orch.send_message(Some(id.clone()), "hello").await.unwrap();
        drain(&mut handle.events).await;
        drop(handle);
        assert!(released(&orch, &id).await);
        assert_eq!(store.load(&id).await.unwrap().len(), 2);
    }

    let mut handle = orch.send_message(Some("s0".into()), "hello").await.unwrap();
    let events = plain(drain(&mut handle.events).await);
    assert_eq!(kinds(&events).last(), Some(&"stream_end"));
    orch.wait_idle("s0").await;
    assert_eq!(store.load("s0").await.unwrap().len(), 4);
}

#[tokio::test]
async fn parked_session_is_kept_for_confirmation() {
    let (orch, _store) = mock(ConfirmationPolicy::Always);
    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();
    until_awaiting(&mut handle.events).await;
    drop(handle);

    assert!(!released(&orch, "s1").await);
    assert!(orch.subscribe("s1").await.is_ok());
}

#[tokio::test]
async fn clear_removes_log_and_session() {
    let (orch, store) = mock(ConfirmationPolicy::Never);
    let mut handle = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap();
    drain(&mut handle.events).await;
    orch.wait_idle("s1").await;

    assert_eq!(orch.clear_session("s1").await.unwrap(), 4);
    assert!(store.load("s1").await.unwrap().is_empty());
    assert!(orch.session("s1").await.is_none());
    assert_eq!(orch.session_stats("s1").await.unwrap().message_count, 0);
}

#[tokio::test]
async fn collect_folds_turn_into_summary() {
    let (orch, _store) = mock(ConfirmationPolicy::Never);
    let summary = orch
        .send_message(Some("s1".into()), "What is 15 + 25?")
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(summary.session_id, "s1");
    assert!(summary.response.contains("40"));
    assert_eq!(summary.tool_calls.len(), 1);
    assert_eq!(summary.tool_calls[0].result, Some(json!(40)));
    assert!(!summary.awaiting_confirmation);
    assert!(summary.error.is_none());
}
