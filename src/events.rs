//! Events broadcast to the host while a chat is processed.

use std::sync::mpsc::Sender;
use std::sync::Mutex;

use crate::session::lock_unpoisoned;

/// One broadcast for a chat.
///
/// A chat produces any number of [`ChatEvent::Snapshot`]s followed by exactly
/// one terminal [`ChatEvent::Error`] or [`ChatEvent::End`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Full normalized response text so far; never shrinks within a chat.
    Snapshot { chat_id: String, content: String },
    Error { chat_id: String, error: String },
    End {
        chat_id: String,
        updated_files: bool,
        extra_files: Vec<String>,
        extra_files_error: Option<String>,
        commit_hash: Option<String>,
        cancelled: bool,
    },
}

impl ChatEvent {
    #[must_use]
    pub fn chat_id(&self) -> &str {
        match self {
            Self::Snapshot { chat_id, .. }
            | Self::Error { chat_id, .. }
            | Self::End { chat_id, .. } => chat_id,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Snapshot { .. })
    }

    pub(crate) fn cancelled_end(chat_id: &str) -> Self {
        Self::End {
            chat_id: chat_id.to_string(),
            updated_files: false,
            extra_files: Vec::new(),
            extra_files_error: None,
            commit_hash: None,
            cancelled: true,
        }
    }
}

/// Receiver of chat broadcasts; called from the chat worker thread.
pub trait ChatEventSink: Send + Sync {
    fn send(&self, event: ChatEvent);
}

impl ChatEventSink for Sender<ChatEvent> {
    fn send(&self, event: ChatEvent) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = Sender::send(self, event);
    }
}

/// Sink that keeps every event in memory, in broadcast order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ChatEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<ChatEvent> {
        lock_unpoisoned(&self.events).clone()
    }

    /// Contents of every snapshot, oldest first.
    #[must_use]
    pub fn snapshots(&self) -> Vec<String> {
        lock_unpoisoned(&self.events)
            .iter()
            .filter_map(|event| match event {
                ChatEvent::Snapshot { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn terminal(&self) -> Option<ChatEvent> {
        lock_unpoisoned(&self.events)
            .iter()
            .find(|event| event.is_terminal())
            .cloned()
    }
}

impl ChatEventSink for RecordingSink {
    fn send(&self, event: ChatEvent) {
        lock_unpoisoned(&self.events).push(event);
    }
}
