//! Per-session ordered event delivery.
//!
//! Each session has at most one subscriber. Events are numbered from a
//! per-session counter and pushed through a bounded channel by the single
//! task that owns the session's generation, so delivery order is generation
//! order. Attaching a new subscriber closes the previous one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use confab_core::StreamEvent;

/// Channel capacity per subscriber; a slow reader applies backpressure to the turn.
const EVENT_BUFFER: usize = 256;

/// A frame as delivered to a subscriber, numbered within its session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequencedEvent {
    pub seq: u64,
    #[serde(flatten)]
    pub event: StreamEvent,
}

pub type EventStream = ReceiverStream<SequencedEvent>;

pub struct StreamCoordinator {
    session_id: String,
    subscriber: Mutex<Option<mpsc::Sender<SequencedEvent>>>,
    next_seq: AtomicU64,
}

impl StreamCoordinator {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            subscriber: Mutex::new(None),
            next_seq: AtomicU64::new(1),
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<SequencedEvent>> {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the subscriber. The previous stream, if any, ends.
    pub fn attach(&self) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let previous = self
            .subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(tx);
        debug!(
            session_id = %self.session_id,
            replaced = previous.is_some(),
            "Subscriber attached"
        );
        ReceiverStream::new(rx)
    }

    /// Drop the subscriber; its stream ends after draining buffered frames.
    pub fn detach(&self) {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn is_connected(&self) -> bool {
        self.sender().is_some_and(|tx| !tx.is_closed())
    }

    /// Resolves once the current subscriber goes away (immediately if none).
    pub async fn closed(&self) {
        if let Some(tx) = self.sender() {
            tx.closed().await;
        }
    }

    /// Deliver one event. Returns `false` when there is no live subscriber.
    /// A terminal event detaches the subscriber after delivery.
    pub async fn emit(&self, event: StreamEvent) -> bool {
        let Some(tx) = self.sender() else {
            debug!(session_id = %self.session_id, kind = event.kind(), "No subscriber; event dropped");
            return false;
        };
        let terminal = event.is_terminal();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let delivered = tx.send(SequencedEvent { seq, event }).await.is_ok();

        if terminal || !delivered {
            let mut slot = self.subscriber.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|current| current.same_channel(&tx)) {
                slot.take();
            }
        }
        if !delivered {
            debug!(session_id = %self.session_id, seq, "Subscriber went away");
        }
        delivered
    }
}
