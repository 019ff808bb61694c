//! Builds the bounded context window sent to the model for one turn.
//!
//! The raw log is only ever read. When it exceeds `max_characters`, the log is
//! split into an older prefix and a recent verbatim suffix; the prefix is
//! replaced by a single synthetic summary message. If summarization fails, the
//! oldest messages are dropped from the window instead and the window is
//! marked degraded.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use confab_core::message::meta;
use confab_core::{ContextWindow, Message, ModelProvider, Role, total_chars};

pub const DEFAULT_MAX_CHARACTERS: usize = 3200;
pub const DEFAULT_RECENT_CHARACTERS: usize = 1600;

const SUMMARY_PREFIX: &str = "Previous conversation summary: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSettings {
    /// Compression threshold over the whole log.
    pub max_characters: usize,
    /// Budget for the verbatim suffix kept after a summary.
    pub recent_characters: usize,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            max_characters: DEFAULT_MAX_CHARACTERS,
            recent_characters: DEFAULT_RECENT_CHARACTERS,
        }
    }
}

/// Summary produced earlier in the same turn, keyed by the partition index it
/// covers. The log is append-only while a turn holds the session, so the
/// prefix before that index cannot change.
#[derive(Debug, Clone, Default)]
pub struct SummaryCache {
    entry: Option<(usize, String)>,
}

impl SummaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached summary, if the messages after it still fit the threshold.
    fn reusable(&self, log: &[Message], max_characters: usize) -> Option<(usize, &str)> {
        let (split, summary) = self.entry.as_ref()?;
        if *split > log.len() || total_chars(&log[*split..]) > max_characters {
            return None;
        }
        Some((*split, summary.as_str()))
    }
}

pub struct ContextAssembler {
    summarizer: Arc<dyn ModelProvider>,
    settings: CompressionSettings,
}

impl ContextAssembler {
    pub fn new(summarizer: Arc<dyn ModelProvider>, settings: CompressionSettings) -> Self {
        Self {
            summarizer,
            settings,
        }
    }

    pub fn settings(&self) -> CompressionSettings {
        self.settings
    }

    pub fn needs_compression(&self, log: &[Message]) -> bool {
        total_chars(log) > self.settings.max_characters
    }

    /// Index at which the verbatim suffix starts.
    ///
    /// Depends only on character counts and roles, so the same log always
    /// partitions the same way. The suffix holds at least one message and
    /// never opens with a tool result separated from its call, unless that
    /// result is the only message left.
    pub fn partition(&self, log: &[Message]) -> usize {
        let budget = self.settings.recent_characters;
        let mut start = log.len();
        let mut used = 0usize;
        while start > 0 {
            let next = log[start - 1].char_count;
            if start < log.len() && used + next > budget {
                break;
            }
            used += next;
            start -= 1;
        }
        while start + 1 < log.len() && log[start].role == Role::ToolResult {
            start += 1;
        }
        start
    }

    /// Assemble the context for `log`. Never fails: summarizer errors degrade
    /// the window rather than aborting the turn.
    pub async fn assemble(&self, log: &[Message]) -> ContextWindow {
        self.assemble_with(log, &mut SummaryCache::new()).await
    }

    /// Like [`assemble`](Self::assemble), reusing a summary from an earlier
    /// step of the same turn while the messages after it stay under the
    /// threshold.
    pub async fn assemble_with(&self, log: &[Message], cache: &mut SummaryCache) -> ContextWindow {
        let total = total_chars(log);
        if total <= self.settings.max_characters {
            return ContextWindow::verbatim(log.to_vec());
        }

        if let Some((split, summary)) = cache.reusable(log, self.settings.max_characters) {
            debug!(split, recent = log.len() - split, "Reusing turn summary");
            return summarized(summary, &log[split..], total);
        }

        let split = self.partition(log);
        if split == 0 {
            warn!(chars = total, "Single message exceeds compression threshold; sending verbatim");
            return ContextWindow::verbatim(log.to_vec());
        }

        let (older, recent) = log.split_at(split);
        info!(
            chars = total,
            threshold = self.settings.max_characters,
            older = older.len(),
            recent = recent.len(),
            "Compressing history"
        );

        match self.summarize_with_retry(older).await {
            Some(summary) => {
                let window = summarized(&summary, recent, total);
                cache.entry = Some((split, summary));
                window
            }
            None => {
                let messages = self.truncate(log);
                warn!(
                    kept = messages.len(),
                    dropped = log.len() - messages.len(),
                    "Summarization unavailable; truncated oldest messages"
                );
                ContextWindow {
                    messages,
                    compressed: false,
                    degraded: true,
                    source_chars: total,
                }
            }
        }
    }

    async fn summarize_with_retry(&self, older: &[Message]) -> Option<String> {
        for attempt in 1..=2 {
            match self.summarizer.summarize(older).await {
                Ok(summary) => {
                    debug!(attempt, chars = summary.chars().count(), "Summary produced");
                    return Some(summary.trim().to_string());
                }
                Err(e) => warn!(attempt, error = %e, "Summarization failed"),
            }
        }
        None
    }

    /// Drop the oldest messages until the rest fits the threshold.
    fn truncate(&self, log: &[Message]) -> Vec<Message> {
        let mut start = 0;
        let mut remaining = total_chars(log);
        while start + 1 < log.len() && remaining > self.settings.max_characters {
            remaining -= log[start].char_count;
            start += 1;
        }
        while start + 1 < log.len() && log[start].role == Role::ToolResult {
            start += 1;
        }
        log[start..].to_vec()
    }
}

fn summarized(summary: &str, recent: &[Message], source_chars: usize) -> ContextWindow {
    let mut messages = Vec::with_capacity(recent.len() + 1);
    messages.push(
        Message::system(format!("{SUMMARY_PREFIX}{summary}")).with_meta(meta::SUMMARY, Value::Bool(true)),
    );
    messages.extend_from_slice(recent);
    ContextWindow {
        messages,
        compressed: true,
        degraded: false,
        source_chars,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use confab_core::{ConfabError, GenerationRequest, ModelStream};
    use serde_json::json;

    struct FakeSummarizer {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FakeSummarizer {
        fn failing(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ModelProvider for FakeSummarizer {
        fn name(&self) -> &str {
            "fake"
        }

        async fn generate(&self, _request: GenerationRequest) -> Result<ModelStream, ConfabError> {
            Err(ConfabError::provider("fake", "not a generator"))
        }

        async fn summarize(&self, messages: &[Message]) -> Result<String, ConfabError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(ConfabError::provider("fake", "summarizer down"));
            }
            Ok(format!("{} earlier messages", messages.len()))
        }
    }

    fn log_of(n: usize, size: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                let body = "x".repeat(size);
                if i % 2 == 0 {
                    Message::user(body)
                } else {
                    Message::assistant(body)
                }
            })
            .collect()
    }

    fn assembler(summarizer: Arc<FakeSummarizer>) -> ContextAssembler {
        ContextAssembler::new(summarizer, CompressionSettings::default())
    }

    #[tokio::test]
    async fn test_under_threshold_is_verbatim() {
        let log = log_of(8, 400);
        let window = assembler(FakeSummarizer::failing(0)).assemble(&log).await;
        assert_eq!(window.messages, log);
        assert!(!window.compressed && !window.degraded);
    }

    #[tokio::test]
    async fn test_over_threshold_summarizes_prefix() {
        let log = log_of(10, 400);
        let before = log.clone();
        let summarizer = FakeSummarizer::failing(0);
        let window = assembler(summarizer.clone()).assemble(&log).await;

        assert!(window.compressed);
        assert_eq!(window.messages[0].role, Role::System);
        assert!(window.messages[0].is_summary());
        assert_eq!(window.messages[0].content, "Previous conversation summary: 6 earlier messages");
        assert_eq!(&window.messages[1..], &log[6..]);
        assert_eq!(window.source_chars, 4000);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(log, before);
    }

    #[tokio::test]
    async fn test_summarizer_is_retried_once() {
        let summarizer = FakeSummarizer::failing(1);
        let window = assembler(summarizer.clone()).assemble(&log_of(10, 400)).await;
        assert!(window.compressed);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_summarizer_failure_truncates_and_degrades() {
        let log = log_of(10, 400);
        let window = assembler(FakeSummarizer::failing(5)).assemble(&log).await;
        assert!(window.degraded);
        assert!(!window.compressed);
        assert_eq!(window.messages, log[2..].to_vec());
        assert!(window.total_chars() <= DEFAULT_MAX_CHARACTERS);
    }

    #[test]
    fn test_partition_is_deterministic_and_skips_orphan_results() {
        let a = assembler(FakeSummarizer::failing(0));
        let args = json!({"a": 1, "b": 2});
        let mut log = log_of(6, 600);
        log.push(Message::tool_call("add", "c1", args.as_object().unwrap(), "auto"));
        log.push(Message::tool_result("add", "c1", &json!(3), false));
        log.push(Message::assistant("y".repeat(1590)));

        let split = a.partition(&log);
        assert_eq!(split, a.partition(&log));
        assert_eq!(split, 8);
        assert_eq!(log[split].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_turn_summary_is_reused_while_suffix_fits() {
        let summarizer = FakeSummarizer::failing(0);
        let a = assembler(summarizer.clone());
        let mut cache = SummaryCache::new();
        let mut log = log_of(10, 400);

        let first = a.assemble_with(&log, &mut cache).await;
        log.push(Message::tool_call("add", "c1", json!({"a": 1, "b": 2}).as_object().unwrap(), "auto"));
        log.push(Message::tool_result("add", "c1", &json!(3), false));
        let second = a.assemble_with(&log, &mut cache).await;

        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.messages[0].content, first.messages[0].content);
        assert_eq!(&second.messages[1..], &log[6..]);
        assert!(second.compressed);
    }

    #[tokio::test]
    async fn test_turn_summary_is_replaced_once_suffix_outgrows_threshold() {
        let summarizer = FakeSummarizer::failing(0);
        let a = assembler(summarizer.clone());
        let mut cache = SummaryCache::new();
        let mut log = log_of(10, 400);

        a.assemble_with(&log, &mut cache).await;
        log.extend(log_of(6, 400));
        let window = a.assemble_with(&log, &mut cache).await;

        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);
        assert!(window.total_chars() < total_chars(&log));
    }

    #[tokio::test]
    async fn test_degraded_window_is_not_cached() {
        let summarizer = FakeSummarizer::failing(2);
        let a = assembler(summarizer.clone());
        let mut cache = SummaryCache::new();
        let log = log_of(10, 400);

        assert!(a.assemble_with(&log, &mut cache).await.degraded);
        assert!(a.assemble_with(&log, &mut cache).await.compressed);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_partition_keeps_oversized_last_message() {
        let a = assembler(FakeSummarizer::failing(0));
        let log = log_of(3, 2000);
        assert_eq!(a.partition(&log), 2);
    }
}
