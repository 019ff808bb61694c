//! Live session records and the registry that owns them.
//!
//! Each session carries its own generation lock, so unrelated sessions never
//! contend. The durable message log lives in the session store; this record
//! only holds what the orchestrator needs between requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use confab_core::{ConfabError, PendingToolCall, TurnState};

use crate::coordinator::StreamCoordinator;
use crate::gate::GateState;

/// Held for the whole of one generation; dropping it frees the session.
pub type GenerationGuard = OwnedMutexGuard<()>;

pub struct Session {
    id: String,
    generation: Arc<tokio::sync::Mutex<()>>,
    pending: Mutex<Option<PendingToolCall>>,
    state: Mutex<TurnState>,
    gate: Mutex<GateState>,
    coordinator: StreamCoordinator,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            coordinator: StreamCoordinator::new(id.clone()),
            id,
            generation: Arc::new(tokio::sync::Mutex::new(())),
            pending: Mutex::new(None),
            state: Mutex::new(TurnState::Idle),
            gate: Mutex::new(GateState::None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn coordinator(&self) -> &StreamCoordinator {
        &self.coordinator
    }

    /// Claim the generation lock without waiting.
    pub fn try_begin(&self) -> Result<GenerationGuard, ConfabError> {
        self.generation
            .clone()
            .try_lock_owned()
            .map_err(|_| ConfabError::busy(&self.id, "a generation is already in progress"))
    }

    /// Wait for the running generation, if any, to finish.
    pub async fn lock_generation(&self) -> GenerationGuard {
        self.generation.clone().lock_owned().await
    }

    pub fn state(&self) -> TurnState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn transition(&self, next: TurnState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(next) {
            warn!(session_id = %self.id, from = %*state, to = %next, "Unexpected state transition");
        }
        debug!(session_id = %self.id, from = %*state, to = %next, "State transition");
        *state = next;
    }

    pub fn pending(&self) -> Option<PendingToolCall> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Gate state of the most recent proposal in the current turn.
    pub fn gate_state(&self) -> GateState {
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_gate(&self, next: GateState) {
        let mut gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(session_id = %self.id, from = ?*gate, to = ?next, "Gate transition");
        *gate = next;
    }

    /// Park a proposal. A session holds at most one; a second is a logic error
    /// and replaces the first with a warning.
    pub fn set_pending(&self, pending: PendingToolCall) {
        self.set_gate(GateState::AwaitingConfirmation);
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(pending);
        if let Some(previous) = previous {
            warn!(session_id = %self.id, replaced = %previous.id, "Pending tool call replaced");
        }
    }

    pub fn take_pending(&self) -> Option<PendingToolCall> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Take the pending call only if it is still the one identified by `id`.
    pub fn take_pending_if(&self, id: Uuid) -> Option<PendingToolCall> {
        let mut slot = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|p| p.id == id) {
            slot.take()
        } else {
            None
        }
    }
}

/// Concurrency-safe map of live sessions keyed by id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(&self, session_id: &str) -> Arc<Session> {
        if let Some(session) = self.get(session_id).await {
            return session;
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id, "Session created");
                Arc::new(Session::new(session_id))
            })
            .clone()
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(session_id)
    }

    /// Drop the live record once nothing refers to it: the turn is idle,
    /// no call is parked, no subscriber is attached, and `session` is the only
    /// handle outside the map. The durable log is untouched.
    pub async fn release_if_idle(&self, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(current) = sessions.get(session.id()) else {
            return false;
        };
        let idle = Arc::ptr_eq(current, session)
            && Arc::strong_count(session) == 2
            && session.state() == TurnState::Idle
            && session.pending().is_none()
            && !session.coordinator().is_connected();
        if idle {
            sessions.remove(session.id());
            debug!(session_id = %session.id(), live = sessions.len(), "Session record released");
        }
        idle
    }
}
