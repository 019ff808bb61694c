//! Turn orchestration.
//!
//! A turn runs on its own task while holding the session's generation lock:
//!
//! ```text
//! Idle -> ContextBuilding -> ModelStreaming
//!      -> [ToolDetected -> (ConfirmationPending) -> ToolExecuting -> ModelStreaming]*
//!      -> Complete -> Idle
//! ```
//!
//! A proposal that needs confirmation parks as the session's
//! `PendingToolCall` and the task ends, releasing the lock. A later
//! confirmation (or the timeout watcher) takes the pending record and drives
//! the rest of the turn on a fresh task, whether or not anyone is still
//! subscribed. Every failure emits exactly one terminal `error` event and
//! returns the session to `Idle`. Idle records with nothing parked and no
//! subscriber are released from the registry; the log stays in the store.

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use confab_core::{
    ConfabError, GenerationRequest, Message, ModelEvent, ModelProvider, PendingToolCall,
    SessionStore, StreamEvent, ToolCallProposal, TurnState, ValidationError, total_chars,
};
use confab_memory::{CompressionSettings, ContextAssembler, SummaryCache};
use confab_tools::{ToolDescriptor, ToolRegistry, ValidatedCall};

use crate::coordinator::{EventStream, SequencedEvent};
use crate::gate::{ConfirmationPolicy, GateState, Resolution, merge_args, status};
use crate::session::{GenerationGuard, Session, SessionRegistry};
use crate::tool_dispatcher::ToolDispatcher;

/// Retries for a failed model call that has not yet produced output.
const GENERATION_RETRIES: usize = 1;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Model calls allowed within one turn.
    pub max_steps: usize,
    pub system_prompt: Option<String>,
    pub confirmation_timeout: Duration,
    pub policy: ConfirmationPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_steps: 10,
            system_prompt: None,
            confirmation_timeout: Duration::from_secs(15),
            policy: ConfirmationPolicy::Always,
        }
    }
}

/// Events of one turn, plus the session they belong to.
pub struct TurnHandle {
    pub session_id: String,
    pub events: EventStream,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolCallRecord {
    pub name: String,
    pub args: Value,
    pub result: Option<Value>,
    pub is_error: bool,
}

/// A turn's events folded into one response.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TurnSummary {
    pub session_id: String,
    pub response: String,
    pub tool_calls: Vec<ToolCallRecord>,
    /// The turn parked on a tool call; confirm it to continue.
    pub awaiting_confirmation: bool,
    pub error: Option<String>,
}

impl TurnHandle {
    /// Drain the stream. Returns early when the turn parks for confirmation.
    pub async fn collect(self) -> TurnSummary {
        let mut summary = TurnSummary {
            session_id: self.session_id,
            response: String::new(),
            tool_calls: Vec::new(),
            awaiting_confirmation: false,
            error: None,
        };
        let mut events = self.events;
        while let Some(SequencedEvent { event, .. }) = events.next().await {
            match event {
                StreamEvent::Message { content, .. } => summary.response.push_str(&content),
                StreamEvent::ToolCall {
                    name,
                    args,
                    awaiting_confirmation,
                    ..
                } => {
                    summary.tool_calls.push(ToolCallRecord {
                        name,
                        args,
                        result: None,
                        is_error: false,
                    });
                    if awaiting_confirmation {
                        summary.awaiting_confirmation = true;
                        break;
                    }
                }
                StreamEvent::ToolResult {
                    name,
                    result,
                    is_error,
                    ..
                } => {
                    if let Some(record) = summary
                        .tool_calls
                        .iter_mut()
                        .rev()
                        .find(|r| r.name == name && r.result.is_none())
                    {
                        record.result = Some(result);
                        record.is_error = is_error;
                    }
                }
                StreamEvent::Error { content, .. } => {
                    summary.error = Some(content);
                    break;
                }
                StreamEvent::StreamEnd { .. } => break,
                StreamEvent::SessionInfo { .. } | StreamEvent::Complete { .. } => {}
            }
        }
        summary
    }
}

/// Acknowledgement of a confirmation decision.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConfirmationAck {
    pub status: &'static str,
    pub session_id: String,
    pub decision: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub total_characters: usize,
    pub message_count: usize,
    pub needs_compression: bool,
    pub max_characters: usize,
    pub state: TurnState,
    pub gate: GateState,
    pub pending: Option<PendingToolCall>,
}

/// How a drive of the model loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnEnd {
    Completed,
    Suspended,
    /// No live subscriber; the model call was skipped or cancelled.
    Disconnected,
}

#[derive(Debug, Clone, Copy)]
struct DriveOptions {
    announce: bool,
    tools_enabled: bool,
    /// End the turn once its subscriber is gone. Off for turns resumed by a
    /// confirmation, which answer into the log even with nobody listening.
    cancel_on_disconnect: bool,
}

struct ModelOutput {
    text: String,
    proposal: Option<ToolCallProposal>,
}

struct AttemptError {
    error: ConfabError,
    /// Deltas from this attempt already reached the subscriber.
    emitted: bool,
}

struct Inner {
    store: Arc<dyn SessionStore>,
    provider: Arc<dyn ModelProvider>,
    assembler: ContextAssembler,
    registry: ToolRegistry,
    dispatcher: ToolDispatcher,
    sessions: SessionRegistry,
    settings: OrchestratorSettings,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        provider: Arc<dyn ModelProvider>,
        registry: ToolRegistry,
        compression: CompressionSettings,
        settings: OrchestratorSettings,
    ) -> Self {
        let assembler = ContextAssembler::new(provider.clone(), compression);
        Self {
            inner: Arc::new(Inner {
                store,
                provider,
                assembler,
                registry,
                dispatcher: ToolDispatcher::new(),
                sessions: SessionRegistry::new(),
                settings,
            }),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.inner.provider.name()
    }

    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.inner.registry.descriptors()
    }

    /// Start a turn. Fails with `Busy` while the session is generating or
    /// waiting on a confirmation; nothing is queued.
    #[instrument(skip_all, fields(session_id))]
    pub async fn send_message(
        &self,
        session_id: Option<String>,
        text: impl Into<String>,
    ) -> Result<TurnHandle, ConfabError> {
        let session_id = session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::Span::current().record("session_id", session_id.as_str());

        let session = self.inner.sessions.get_or_create(&session_id).await;
        let guard = session.try_begin()?;
        if session.pending().is_some() {
            return Err(ConfabError::busy(&session_id, "a tool call is awaiting confirmation"));
        }

        let events = session.coordinator().attach();
        let this = self.clone();
        let text = text.into();
        info!(chars = text.chars().count(), "Turn started");
        tokio::spawn(async move {
            let result = this.start_turn(&session, text).await;
            this.finish(&session, result).await;
            drop(guard);
        });

        Ok(TurnHandle { session_id, events })
    }

    /// Resolve the session's pending tool call. The rest of the turn streams
    /// to whichever subscriber is attached. Without a pending call the
    /// confirmation is stale.
    #[instrument(skip(self, tool_args))]
    pub async fn confirm(
        &self,
        session_id: &str,
        confirmed: bool,
        tool_args: Map<String, Value>,
    ) -> Result<ConfirmationAck, ConfabError> {
        let stale = || ConfabError::StaleConfirmation(session_id.to_string());
        let session = self.inner.sessions.get(session_id).await.ok_or_else(stale)?;
        if session.pending().is_none() {
            return Err(stale());
        }
        // A parked turn releases the lock right after announcing the call.
        let guard = session.lock_generation().await;
        let pending = session.take_pending().ok_or_else(stale)?;

        if pending.is_expired_at(Utc::now()) {
            warn!(tool = %pending.proposal.name, "Confirmation arrived after the window closed");
            self.spawn_resume(session, guard, pending, Resolution::TimedOut);
            return Err(ConfabError::ConfirmationExpired(session_id.to_string()));
        }

        let resolution = if confirmed {
            Resolution::Approved(merge_args(&pending.proposal.arguments, tool_args))
        } else {
            Resolution::Rejected
        };
        let decision = resolution.status();
        info!(tool = %pending.proposal.name, decision, "Confirmation received");
        self.spawn_resume(session, guard, pending, resolution);

        Ok(ConfirmationAck {
            status: "accepted",
            session_id: session_id.to_string(),
            decision,
        })
    }

    /// Attach a new subscriber to a live session, replacing any current one.
    pub async fn subscribe(&self, session_id: &str) -> Result<EventStream, ConfabError> {
        let session = self
            .inner
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| ConfabError::UnknownSession(session_id.to_string()))?;
        Ok(session.coordinator().attach())
    }

    pub async fn pending_confirmation(&self, session_id: &str) -> Option<PendingToolCall> {
        self.inner.sessions.get(session_id).await?.pending()
    }

    pub async fn session_stats(&self, session_id: &str) -> Result<SessionStats, ConfabError> {
        let log = self.inner.store.load(session_id).await?;
        let session = self.inner.sessions.get(session_id).await;
        Ok(SessionStats {
            session_id: session_id.to_string(),
            total_characters: total_chars(&log),
            message_count: log.len(),
            needs_compression: self.inner.assembler.needs_compression(&log),
            max_characters: self.inner.assembler.settings().max_characters,
            state: session.as_ref().map_or(TurnState::Idle, |s| s.state()),
            gate: session.as_ref().map_or(GateState::None, |s| s.gate_state()),
            pending: session.and_then(|s| s.pending()),
        })
    }

    /// Delete the session's log and live record. Refused while generating.
    #[instrument(skip(self))]
    pub async fn clear_session(&self, session_id: &str) -> Result<usize, ConfabError> {
        let Some(session) = self.inner.sessions.get(session_id).await else {
            return Ok(self.inner.store.clear(session_id).await?);
        };
        let _guard = session.try_begin()?;
        if session.take_pending().is_some() {
            debug!("Discarded pending tool call");
        }
        session.coordinator().detach();
        let removed = self.inner.store.clear(session_id).await?;
        self.inner.sessions.remove(session_id).await;
        info!(removed, "Session cleared");
        Ok(removed)
    }

    /// Wait until no generation is running for the session, then release the
    /// record if it is idle and nothing else holds it.
    pub async fn wait_idle(&self, session_id: &str) {
        if let Some(session) = self.inner.sessions.get(session_id).await {
            drop(session.lock_generation().await);
            self.inner.sessions.release_if_idle(&session).await;
        }
    }

    async fn start_turn(&self, session: &Arc<Session>, text: String) -> Result<TurnEnd, ConfabError> {
        session.transition(TurnState::ContextBuilding);
        session.set_gate(GateState::None);
        self.inner
            .store
            .append(session.id(), &Message::user(text))
            .await?;
        self.drive(
            session,
            DriveOptions {
                announce: true,
                tools_enabled: true,
                cancel_on_disconnect: true,
            },
        )
        .await
    }

    /// Run the model loop until it answers in text, parks, or fails.
    async fn drive(&self, session: &Arc<Session>, mut options: DriveOptions) -> Result<TurnEnd, ConfabError> {
        let inner = &self.inner;
        let session_id = session.id();
        let coordinator = session.coordinator();
        let mut summaries = SummaryCache::new();
        let mut degraded = false;

        for step in 0..inner.settings.max_steps {
            if options.cancel_on_disconnect && !coordinator.is_connected() {
                return Ok(TurnEnd::Disconnected);
            }

            let log = inner.store.load(session_id).await?;
            let context = inner.assembler.assemble_with(&log, &mut summaries).await;
            degraded |= context.degraded;
            if options.announce {
                options.announce = false;
                coordinator
                    .emit(StreamEvent::SessionInfo {
                        session_id: session_id.to_string(),
                        compressed: context.compressed,
                        degraded: context.degraded,
                    })
                    .await;
            }

            session.transition(TurnState::ModelStreaming);
            debug!(session_id, step, chars = context.total_chars(), "Calling model");
            let request = GenerationRequest {
                system_prompt: inner.settings.system_prompt.clone(),
                context,
                tools: if options.tools_enabled {
                    inner.registry.specs()
                } else {
                    Vec::new()
                },
            };
            let Some(output) = self.stream_model(session, request).await? else {
                return Ok(TurnEnd::Disconnected);
            };

            let Some(proposal) = output.proposal else {
                self.complete(session, output.text, degraded).await?;
                return Ok(TurnEnd::Completed);
            };

            if !output.text.is_empty() {
                inner
                    .store
                    .append(session_id, &Message::assistant(output.text))
                    .await?;
            }
            session.transition(TurnState::ToolDetected);
            session.set_gate(GateState::Detected);
            debug!(session_id, tool = %proposal.name, "Tool call proposed");
            options.tools_enabled = true;

            let call = match inner.registry.match_proposal(proposal.clone()) {
                Ok(call) => call,
                Err(err) => {
                    self.emit_tool_call(session, &proposal, false).await;
                    let delivered = self.record_invalid(session, &proposal, err).await?;
                    if !delivered && options.cancel_on_disconnect {
                        return Ok(TurnEnd::Disconnected);
                    }
                    continue;
                }
            };

            if inner.settings.policy.requires_confirmation(&call.proposal) {
                self.suspend(session, call).await;
                return Ok(TurnEnd::Suspended);
            }

            self.emit_tool_call(session, &call.proposal, false).await;
            session.set_gate(GateState::Approved);
            session.transition(TurnState::ToolExecuting);
            let delivered = self.execute_and_record(session, &call, status::AUTO).await?;
            if !delivered && options.cancel_on_disconnect {
                return Ok(TurnEnd::Disconnected);
            }
        }

        Err(ConfabError::Other(anyhow!(
            "turn exceeded {} model steps",
            inner.settings.max_steps
        )))
    }

    async fn stream_model(
        &self,
        session: &Session,
        request: GenerationRequest,
    ) -> Result<Option<ModelOutput>, ConfabError> {
        let mut attempt = 0;
        loop {
            match self.stream_attempt(session, request.clone()).await {
                Ok(output) => return Ok(output),
                Err(AttemptError { error, emitted }) if !emitted && attempt < GENERATION_RETRIES => {
                    attempt += 1;
                    warn!(session_id = %session.id(), attempt, error = %error, "Model call failed; retrying");
                }
                Err(AttemptError { error, .. }) => return Err(error),
            }
        }
    }

    /// One model call. `Ok(None)` means the subscriber attached when the call
    /// started went away, and the call was abandoned. A call started with no
    /// subscriber runs to the end.
    async fn stream_attempt(
        &self,
        session: &Session,
        request: GenerationRequest,
    ) -> Result<Option<ModelOutput>, AttemptError> {
        let coordinator = session.coordinator();
        let mut stream = self
            .inner
            .provider
            .generate(request)
            .await
            .map_err(|error| AttemptError {
                error,
                emitted: false,
            })?;

        let watching = coordinator.is_connected();
        let mut text = String::new();
        let mut emitted = false;
        loop {
            let item = tokio::select! {
                item = stream.next() => item,
                _ = coordinator.closed(), if watching => {
                    if coordinator.is_connected() {
                        continue;
                    }
                    debug!(session_id = %session.id(), "Subscriber gone; cancelling model call");
                    return Ok(None);
                }
            };

            match item {
                None => return Ok(Some(ModelOutput { text, proposal: None })),
                Some(Ok(ModelEvent::Delta(delta))) => {
                    if delta.is_empty() {
                        continue;
                    }
                    text.push_str(&delta);
                    emitted = true;
                    let delivered = coordinator
                        .emit(StreamEvent::Message {
                            session_id: session.id().to_string(),
                            content: delta,
                            is_complete: false,
                        })
                        .await;
                    if !delivered && watching {
                        return Ok(None);
                    }
                }
                Some(Ok(ModelEvent::ToolCall(proposal))) => {
                    return Ok(Some(ModelOutput {
                        text,
                        proposal: Some(proposal),
                    }));
                }
                Some(Err(error)) => return Err(AttemptError { error, emitted }),
            }
        }
    }

    async fn complete(&self, session: &Session, text: String, degraded: bool) -> Result<(), ConfabError> {
        let session_id = session.id().to_string();
        if !text.is_empty() {
            self.inner
                .store
                .append(&session_id, &Message::assistant(text))
                .await?;
        }
        let coordinator = session.coordinator();
        coordinator
            .emit(StreamEvent::Message {
                session_id: session_id.clone(),
                content: String::new(),
                is_complete: true,
            })
            .await;
        session.transition(TurnState::Complete);
        coordinator
            .emit(StreamEvent::Complete {
                session_id: session_id.clone(),
                degraded,
            })
            .await;
        coordinator.emit(StreamEvent::StreamEnd { session_id }).await;
        Ok(())
    }

    async fn emit_tool_call(&self, session: &Session, proposal: &ToolCallProposal, awaiting: bool) -> bool {
        session
            .coordinator()
            .emit(StreamEvent::ToolCall {
                session_id: session.id().to_string(),
                name: proposal.name.clone(),
                args: proposal.args_value(),
                awaiting_confirmation: awaiting,
            })
            .await
    }

    /// Persist the call, run it, persist the result, then report it.
    /// Returns whether the result reached a subscriber.
    async fn execute_and_record(
        &self,
        session: &Session,
        call: &ValidatedCall,
        label: &str,
    ) -> Result<bool, ConfabError> {
        let proposal = &call.proposal;
        let store = &self.inner.store;
        store
            .append(
                session.id(),
                &Message::tool_call(&proposal.name, &proposal.call_id, &proposal.arguments, label),
            )
            .await?;

        let outcome = self.inner.dispatcher.dispatch(call).await;
        store
            .append(
                session.id(),
                &Message::tool_result(&proposal.name, &proposal.call_id, &outcome.value, outcome.is_error),
            )
            .await?;
        info!(
            session_id = %session.id(),
            tool = %proposal.name,
            is_error = outcome.is_error,
            "Tool call recorded"
        );

        Ok(session
            .coordinator()
            .emit(StreamEvent::ToolResult {
                session_id: session.id().to_string(),
                name: proposal.name.clone(),
                result: outcome.value,
                is_error: outcome.is_error,
            })
            .await)
    }

    /// Record a proposal that failed validation and hand the error back to
    /// the model as a tool result.
    async fn record_invalid(
        &self,
        session: &Session,
        proposal: &ToolCallProposal,
        err: ValidationError,
    ) -> Result<bool, ConfabError> {
        warn!(session_id = %session.id(), tool = %proposal.name, error = %err, "Invalid tool call");
        let payload = json!({ "error": err.to_string() });
        let store = &self.inner.store;
        store
            .append(
                session.id(),
                &Message::tool_call(&proposal.name, &proposal.call_id, &proposal.arguments, status::INVALID),
            )
            .await?;
        store
            .append(
                session.id(),
                &Message::tool_result(&proposal.name, &proposal.call_id, &payload, true),
            )
            .await?;
        Ok(session
            .coordinator()
            .emit(StreamEvent::ToolResult {
                session_id: session.id().to_string(),
                name: proposal.name.clone(),
                result: payload,
                is_error: true,
            })
            .await)
    }

    async fn suspend(&self, session: &Arc<Session>, call: ValidatedCall) {
        let timeout = self.inner.settings.confirmation_timeout;
        let pending = PendingToolCall::new(
            call.proposal.clone(),
            call.tool.description(),
            timeout.as_secs(),
        );
        let pending_id = pending.id;
        session.set_pending(pending);
        session.transition(TurnState::ConfirmationPending);
        self.emit_tool_call(session, &call.proposal, true).await;
        info!(session_id = %session.id(), tool = %call.proposal.name, "Awaiting confirmation");
        self.spawn_timeout_watch(Arc::downgrade(session), pending_id, timeout);
    }

    /// Holds the session weakly so a resolved, released record is not kept
    /// alive until the window closes.
    fn spawn_timeout_watch(&self, session: Weak<Session>, pending_id: Uuid, timeout: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(session) = session.upgrade() else {
                return;
            };
            let guard = session.lock_generation().await;
            let Some(pending) = session.take_pending_if(pending_id) else {
                return;
            };
            info!(session_id = %session.id(), tool = %pending.proposal.name, "Confirmation timed out");
            let result = this.resume(&session, pending, Resolution::TimedOut).await;
            this.finish(&session, result).await;
            drop(guard);
        });
    }

    fn spawn_resume(
        &self,
        session: Arc<Session>,
        guard: GenerationGuard,
        pending: PendingToolCall,
        resolution: Resolution,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let result = this.resume(&session, pending, resolution).await;
            this.finish(&session, result).await;
            drop(guard);
        });
    }

    async fn resume(
        &self,
        session: &Arc<Session>,
        pending: PendingToolCall,
        resolution: Resolution,
    ) -> Result<TurnEnd, ConfabError> {
        let proposal = pending.proposal;
        let label = resolution.status();
        session.set_gate(resolution.state());

        let tools_enabled = match resolution {
            Resolution::Approved(args) => {
                let edited = ToolCallProposal {
                    arguments: args,
                    ..proposal
                };
                match self.inner.registry.match_proposal(edited.clone()) {
                    Ok(call) => {
                        session.transition(TurnState::ToolExecuting);
                        self.execute_and_record(session, &call, label).await?;
                    }
                    Err(err) => {
                        session.transition(TurnState::ContextBuilding);
                        self.record_invalid(session, &edited, err).await?;
                    }
                }
                true
            }
            Resolution::Rejected | Resolution::TimedOut => {
                self.inner
                    .store
                    .append(
                        session.id(),
                        &Message::tool_call(&proposal.name, &proposal.call_id, &proposal.arguments, label),
                    )
                    .await?;
                session.transition(TurnState::ContextBuilding);
                false
            }
        };

        self.drive(
            session,
            DriveOptions {
                announce: false,
                tools_enabled,
                cancel_on_disconnect: false,
            },
        )
        .await
    }

    async fn finish(&self, session: &Arc<Session>, result: Result<TurnEnd, ConfabError>) {
        match result {
            Ok(TurnEnd::Completed) => {
                session.transition(TurnState::Idle);
                info!(session_id = %session.id(), "Turn complete");
            }
            Ok(TurnEnd::Suspended) => {}
            Ok(TurnEnd::Disconnected) => {
                session.transition(TurnState::Idle);
                session.coordinator().detach();
                info!(session_id = %session.id(), "Turn ended without a subscriber");
            }
            Err(err) => {
                error!(session_id = %session.id(), code = err.code(), error = %err, "Turn failed");
                session.transition(TurnState::Error);
                session
                    .coordinator()
                    .emit(StreamEvent::Error {
                        session_id: session.id().to_string(),
                        code: err.code().to_string(),
                        content: err.to_string(),
                    })
                    .await;
                session.coordinator().detach();
                session.transition(TurnState::Idle);
            }
        }
        self.inner.sessions.release_if_idle(session).await;
    }

    #[cfg(test)]
    pub(crate) async fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.inner.sessions.get(session_id).await
    }
}
