//! Minimal provider-agnostic contract for one streamed model invocation.
//!
//! This crate defines only the stream event vocabulary, the model-facing
//! message history, and the cooperative cancellation signal shared between a
//! provider and the pipeline consuming it. Transport details and client
//! construction live with each provider implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Shared cancellation flag for one chat stream.
///
/// Cancellation is cooperative: providers and consumers poll the flag at
/// their own checkpoints and nothing is interrupted pre-emptively.
pub type CancelSignal = Arc<AtomicBool>;

/// Creates a fresh, unsignalled cancellation flag.
#[must_use]
pub fn new_cancel_signal() -> CancelSignal {
    Arc::new(AtomicBool::new(false))
}

/// Returns true once the signal has been raised.
#[must_use]
pub fn is_cancelled(signal: &CancelSignal) -> bool {
    signal.load(Ordering::SeqCst)
}

/// Provider-neutral model-facing conversation item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ModelMessage {
    User { text: String },
    Assistant { text: String },
}

impl ModelMessage {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant { text: text.into() }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::User { text } | Self::Assistant { text } => text,
        }
    }
}

/// Input required to start one provider stream.
///
/// When the final message is an assistant turn, providers treat it as a
/// prefill and continue that turn instead of starting a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub messages: Vec<ModelMessage>,
    pub instructions: String,
}

impl StreamRequest {
    #[must_use]
    pub fn new(messages: Vec<ModelMessage>, instructions: impl Into<String>) -> Self {
        Self {
            messages,
            instructions: instructions.into(),
        }
    }

    /// Returns the assistant prefill when the request continues a prior turn.
    #[must_use]
    pub fn prefill(&self) -> Option<&str> {
        match self.messages.last() {
            Some(ModelMessage::Assistant { text }) => Some(text),
            _ => None,
        }
    }
}

/// One provider-emitted stream event, in provider order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    ReasoningDelta {
        text: String,
    },
    ToolCall {
        call_id: String,
        server: String,
        tool: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        server: String,
        tool: String,
        output: Value,
    },
}

impl StreamEvent {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    #[must_use]
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::ReasoningDelta { text: text.into() }
    }

    /// Returns true for reasoning ("thinking") deltas.
    #[must_use]
    pub fn is_reasoning(&self) -> bool {
        matches!(self, Self::ReasoningDelta { .. })
    }
}

/// Failure raised by a provider while producing a stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{message}")]
    Stream { message: String },

    #[error("provider request failed ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("stream was cancelled")]
    Cancelled,
}

impl ProviderError {
    #[must_use]
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }
}

/// Immutable metadata describing a stream provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider_id: String,
    pub model_id: String,
}

/// Provider interface for executing one streamed model invocation.
pub trait ModelProvider: Send + Sync + 'static {
    /// Returns provider/model identity metadata.
    fn profile(&self) -> ProviderProfile;

    /// Streams a response and emits events in provider order.
    ///
    /// Providers should poll `cancel` between events and return promptly once
    /// it is raised; either `Ok(())` or [`ProviderError::Cancelled`] is
    /// acceptable after cancellation.
    fn stream(
        &self,
        request: StreamRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(StreamEvent),
    ) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct EchoProvider;

    impl ModelProvider for EchoProvider {
        fn profile(&self) -> ProviderProfile {
            ProviderProfile {
                provider_id: "echo".to_string(),
                model_id: "echo-model".to_string(),
            }
        }

        fn stream(
            &self,
            request: StreamRequest,
            cancel: CancelSignal,
            emit: &mut dyn FnMut(StreamEvent),
        ) -> Result<(), ProviderError> {
            for message in &request.messages {
                if is_cancelled(&cancel) {
                    return Err(ProviderError::Cancelled);
                }
                emit(StreamEvent::text(message.text()));
            }
            Ok(())
        }
    }

    #[test]
    fn prefill_is_reported_only_for_trailing_assistant_turns() {
        let fresh = StreamRequest::new(vec![ModelMessage::user("hi")], "");
        assert_eq!(fresh.prefill(), None);

        let continued = StreamRequest::new(
            vec![ModelMessage::user("hi"), ModelMessage::assistant("partial")],
            "",
        );
        assert_eq!(continued.prefill(), Some("partial"));
    }

    #[test]
    fn provider_stops_when_cancel_signal_is_raised() {
        let cancel = new_cancel_signal();
        cancel.store(true, Ordering::SeqCst);

        let mut events = Vec::new();
        let result = EchoProvider.stream(
            StreamRequest::new(vec![ModelMessage::user("ignored")], ""),
            cancel,
            &mut |event| events.push(event),
        );

        assert_eq!(result, Err(ProviderError::Cancelled));
        assert!(events.is_empty());
    }

    #[test]
    fn stream_events_use_tagged_json_shape() {
        let event = StreamEvent::ToolCall {
            call_id: "call-1".to_string(),
            server: "fs".to_string(),
            tool: "read".to_string(),
            arguments: json!({ "path": "README.md" }),
        };

        let encoded = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(encoded["type"], "tool_call");
        assert_eq!(encoded["arguments"]["path"], "README.md");

        let decoded: StreamEvent =
            serde_json::from_value(json!({ "type": "reasoning_delta", "text": "hmm" }))
                .expect("reasoning delta should deserialize");
        assert!(decoded.is_reasoning());
    }

    #[test]
    fn provider_error_messages_are_human_readable() {
        assert_eq!(ProviderError::stream("boom").to_string(), "boom");
        assert_eq!(
            ProviderError::Status {
                status: 429,
                message: "rate limited".to_string(),
            }
            .to_string(),
            "provider request failed (429): rate limited"
        );
    }
}
