//! Reasoning ("thinking") block state machine.

use agent_provider::StreamEvent;
use dyad_tags::{escape_dyad_tags, tool_call_block, tool_result_block, THINK_CLOSE, THINK_OPEN};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThinkingState {
    #[default]
    Normal,
    InThinking,
}

/// Maps one stream event to the text it appends to the response.
///
/// Reasoning deltas open a `<think>` block when needed; any other event
/// closes an open block before emitting its own text.
#[must_use]
pub fn step(state: ThinkingState, event: &StreamEvent) -> (ThinkingState, String) {
    if let StreamEvent::ReasoningDelta { text } = event {
        let mut emitted = String::new();
        if state == ThinkingState::Normal {
            emitted.push_str(THINK_OPEN);
        }
        emitted.push_str(&escape_dyad_tags(text));
        return (ThinkingState::InThinking, emitted);
    }

    let mut emitted = String::new();
    if state == ThinkingState::InThinking {
        emitted.push_str(THINK_CLOSE);
    }
    match event {
        StreamEvent::TextDelta { text } => emitted.push_str(text),
        StreamEvent::ToolCall {
            server,
            tool,
            arguments,
            ..
        } => emitted.push_str(&tool_call_block(server, tool, arguments)),
        StreamEvent::ToolResult {
            server,
            tool,
            output,
            ..
        } => emitted.push_str(&tool_result_block(server, tool, output)),
        StreamEvent::ReasoningDelta { .. } => {}
    }
    (ThinkingState::Normal, emitted)
}

/// Text needed to close an open reasoning block at the end of a stream.
#[must_use]
pub fn finish(state: ThinkingState) -> &'static str {
    match state {
        ThinkingState::Normal => "",
        ThinkingState::InThinking => THINK_CLOSE,
    }
}
