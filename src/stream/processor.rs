use std::sync::Arc;

use agent_provider::{is_cancelled, CancelSignal, ModelProvider, ProviderError, StreamEvent, StreamRequest};
use dyad_tags::normalize_response;
use tracing::{debug, warn};

use super::thinking::{self, ThinkingState};
use crate::events::{ChatEvent, ChatEventSink};
use crate::session::SessionRegistry;

/// How one provider invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
    Failed(ProviderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// Reasoning, text and tool events are all rendered.
    Full,
    /// Only text deltas are appended; used when continuing a cut-off turn.
    ContinuationOnly,
}

/// Accumulates the response text of one chat across every provider
/// invocation, persisting and broadcasting after each appended chunk.
pub struct ChunkProcessor<'a> {
    chat_id: String,
    registry: &'a SessionRegistry,
    sink: &'a dyn ChatEventSink,
    raw: String,
    normalized: String,
}

impl<'a> ChunkProcessor<'a> {
    #[must_use]
    pub fn new(chat_id: &str, registry: &'a SessionRegistry, sink: &'a dyn ChatEventSink) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            registry,
            sink,
            raw: String::new(),
            normalized: String::new(),
        }
    }

    /// Streams one invocation into the response.
    ///
    /// The cancel signal is checked around every event; once raised, later
    /// events are dropped and no closing marker is synthesized.
    pub fn run(
        &mut self,
        provider: &dyn ModelProvider,
        request: StreamRequest,
        cancel: &CancelSignal,
        mode: ProcessingMode,
    ) -> StreamOutcome {
        if is_cancelled(cancel) {
            return StreamOutcome::Cancelled;
        }

        let mut state = ThinkingState::Normal;
        let mut stopped = false;
        let mut events = 0_usize;
        let result = provider.stream(request, Arc::clone(cancel), &mut |event| {
            if stopped || is_cancelled(cancel) {
                stopped = true;
                return;
            }
            events += 1;
            let emitted = match mode {
                ProcessingMode::Full => {
                    let (next, emitted) = thinking::step(state, &event);
                    state = next;
                    emitted
                }
                ProcessingMode::ContinuationOnly => match event {
                    StreamEvent::TextDelta { text } => text,
                    _ => return,
                },
            };
            self.append_text(&emitted);
            stopped = is_cancelled(cancel);
        });
        debug!(chat_id = %self.chat_id, events, ?mode, "provider stream finished");

        if stopped || is_cancelled(cancel) {
            return StreamOutcome::Cancelled;
        }
        match result {
            Ok(()) => {
                self.append_text(thinking::finish(state));
                StreamOutcome::Completed
            }
            Err(ProviderError::Cancelled) => StreamOutcome::Cancelled,
            Err(error) => StreamOutcome::Failed(error),
        }
    }

    /// Appends text outside a provider stream, such as warning blocks.
    pub fn append_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.raw.push_str(text);
        self.normalized = normalize_response(&self.raw);

        if let Err(error) = self.registry.persist(&self.chat_id, &self.normalized) {
            warn!(chat_id = %self.chat_id, %error, "failed to persist partial response");
        }
        self.sink.send(ChatEvent::Snapshot {
            chat_id: self.chat_id.clone(),
            content: self.normalized.clone(),
        });
    }

    /// Normalized response text accumulated so far.
    #[must_use]
    pub fn response(&self) -> &str {
        &self.normalized
    }

    #[must_use]
    pub fn into_response(self) -> String {
        self.normalized
    }
}
