//! Server-Sent Events framing for session event streams.

use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};

use confab_agent::{EventStream, SequencedEvent};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// One JSON-encoded event per `data:` frame; the frame `id` is the
/// per-session sequence number.
pub fn frame(event: &SequencedEvent) -> Result<Event, axum::Error> {
    Event::default()
        .id(event.seq.to_string())
        .json_data(&event.event)
}

pub fn event_stream(events: EventStream) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let frames = events.map(|event| frame(&event));
    Sse::new(frames).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}
