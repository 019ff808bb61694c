//! Incremental parser for OpenAI-compatible chat-completion SSE streams.
//!
//! Text deltas are yielded as they arrive. Tool-call fragments are
//! accumulated by index and yielded as a single proposal once the stream
//! reports a finish reason (or ends). Nothing is yielded after a proposal.

use std::collections::{BTreeMap, VecDeque};

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use tracing::warn;

use confab_core::{ConfabError, ModelEvent, ModelStream, ToolCallProposal};

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

pub(crate) struct SseDecoder {
    provider: String,
    buffer: Vec<u8>,
    pending: VecDeque<Result<ModelEvent, ConfabError>>,
    calls: BTreeMap<u64, PartialCall>,
    closed: bool,
}

impl SseDecoder {
    pub(crate) fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            calls: BTreeMap::new(),
            closed: false,
        }
    }

    /// Feed raw bytes; complete frames are decoded into `pending`.
    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
        while let Some((pos, delim)) = find_double_newline(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..pos + delim).take(pos).collect();
            if self.closed {
                continue;
            }
            match parse_sse_data(&String::from_utf8_lossy(&frame)) {
                Ok(Some(value)) => self.handle_chunk(value),
                Ok(None) => {}
                Err(message) => self.fail(message),
            }
        }
    }

    /// Upstream ended: decode any trailing frame and flush a buffered call.
    pub(crate) fn finish(&mut self) {
        if !self.buffer.iter().all(u8::is_ascii_whitespace) {
            self.feed(b"\n\n");
        }
        self.flush_call();
        self.closed = true;
    }

    pub(crate) fn next_event(&mut self) -> Option<Result<ModelEvent, ConfabError>> {
        self.pending.pop_front()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        if !self.closed {
            self.pending
                .push_back(Err(ConfabError::provider(&self.provider, message)));
            self.closed = true;
        }
    }

    fn handle_chunk(&mut self, value: Value) {
        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            self.fail(message);
            return;
        }

        let Some(choice) = value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
        else {
            return;
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                if !text.is_empty() {
                    self.pending.push_back(Ok(ModelEvent::Delta(text.to_string())));
                }
            }
            if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for fragment in tool_calls {
                    let index = fragment.get("index").and_then(Value::as_u64).unwrap_or(0);
                    let entry = self.calls.entry(index).or_default();
                    if let Some(id) = fragment.get("id").and_then(Value::as_str) {
                        entry.id.push_str(id);
                    }
                    let function = fragment.get("function").unwrap_or(&Value::Null);
                    if let Some(name) = function.get("name").and_then(Value::as_str) {
                        entry.name.push_str(name);
                    }
                    if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                        entry.arguments.push_str(args);
                    }
                }
            }
        }

        if choice
            .get("finish_reason")
            .is_some_and(|reason| !reason.is_null())
        {
            self.flush_call();
            self.closed = true;
        }
    }

    /// Turn the first accumulated call into a proposal. Additional parallel
    /// calls are dropped; one proposal is handled per model step.
    fn flush_call(&mut self) {
        if self.closed {
            return;
        }
        let mut calls = std::mem::take(&mut self.calls).into_values();
        let Some(call) = calls.next() else {
            return;
        };
        let dropped = calls.count();
        if dropped > 0 {
            warn!(provider = %self.provider, dropped, "Ignoring parallel tool calls");
        }
        if call.name.is_empty() {
            self.fail("tool call without a function name");
            return;
        }
        let arguments = parse_arguments(&call.name, &call.arguments);
        let mut proposal = ToolCallProposal::new(call.name, arguments);
        if !call.id.is_empty() {
            proposal = proposal.with_call_id(call.id);
        }
        self.pending.push_back(Ok(ModelEvent::ToolCall(proposal)));
    }
}

/// Malformed argument JSON becomes an empty object so that schema validation
/// reports the missing fields to the model.
fn parse_arguments(tool: &str, raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(tool, arguments = %other, "Tool arguments are not an object");
            Map::new()
        }
        Err(e) => {
            warn!(tool, error = %e, "Tool arguments are not valid JSON");
            Map::new()
        }
    }
}

/// Adapt a byte stream into a `ModelStream`.
pub(crate) fn decode_stream<S, B, E>(provider: String, bytes: S) -> ModelStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = (Box::pin(bytes), SseDecoder::new(provider));
    Box::pin(futures::stream::unfold(state, |(mut bytes, mut decoder)| async move {
        loop {
            if let Some(event) = decoder.next_event() {
                return Some((event, (bytes, decoder)));
            }
            if decoder.is_closed() {
                return None;
            }
            match bytes.next().await {
                Some(Ok(chunk)) => decoder.feed(chunk.as_ref()),
                Some(Err(e)) => decoder.fail(format!("stream error: {e}")),
                None => decoder.finish(),
            }
        }
    }))
}

/// Position and length of the first blank-line frame delimiter.
fn find_double_newline(buffer: &[u8]) -> Option<(usize, usize)> {
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    match (crlf, lf) {
        (Some(c), Some(l)) if l <= c => Some((l, 2)),
        (Some(c), _) => Some((c, 4)),
        (None, Some(l)) => Some((l, 2)),
        (None, None) => None,
    }
}

fn parse_sse_data(frame: &str) -> Result<Option<Value>, String> {
    let data: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .collect();
    let data = data.join("\n");
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }
    serde_json::from_str(data)
        .map(Some)
        .map_err(|e| format!("failed to parse SSE JSON: {e}"))
}
