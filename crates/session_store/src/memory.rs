use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::MessageStoreError;
use crate::schema::{MessageRecordKind, StoredMessage};
use crate::store::{lock_unpoisoned, MessageStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub chat_id: String,
    pub message_id: String,
    pub kind: MessageRecordKind,
}

#[derive(Debug, Default)]
struct Inner {
    messages: HashMap<(String, String), StoredMessage>,
    writes: Vec<RecordedWrite>,
}

/// Process-local [`MessageStore`] that also records every write in order.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    inner: Mutex<Inner>,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write received so far, oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<RecordedWrite> {
        lock_unpoisoned(&self.inner).writes.clone()
    }

    /// Number of content writes for one chat.
    #[must_use]
    pub fn content_write_count(&self, chat_id: &str) -> usize {
        lock_unpoisoned(&self.inner)
            .writes
            .iter()
            .filter(|write| {
                write.chat_id == chat_id
                    && matches!(write.kind, MessageRecordKind::Content { .. })
            })
            .count()
    }

    fn record(&self, chat_id: &str, message_id: &str, kind: MessageRecordKind) {
        let mut inner = lock_unpoisoned(&self.inner);
        inner
            .messages
            .entry((chat_id.to_string(), message_id.to_string()))
            .or_insert_with(|| StoredMessage {
                message_id: message_id.to_string(),
                ..StoredMessage::default()
            })
            .apply(&kind);
        inner.writes.push(RecordedWrite {
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
            kind,
        });
    }
}

impl MessageStore for InMemoryMessageStore {
    fn save_content(
        &self,
        chat_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), MessageStoreError> {
        if chat_id.is_empty() {
            return Err(MessageStoreError::EmptyChatId);
        }
        self.record(
            chat_id,
            message_id,
            MessageRecordKind::Content {
                content: content.to_string(),
            },
        );
        Ok(())
    }

    fn attach_commit(
        &self,
        chat_id: &str,
        message_id: &str,
        commit_hash: &str,
    ) -> Result<(), MessageStoreError> {
        if chat_id.is_empty() {
            return Err(MessageStoreError::EmptyChatId);
        }
        self.record(
            chat_id,
            message_id,
            MessageRecordKind::Commit {
                commit_hash: commit_hash.to_string(),
            },
        );
        Ok(())
    }

    fn message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Option<StoredMessage>, MessageStoreError> {
        Ok(lock_unpoisoned(&self.inner)
            .messages
            .get(&(chat_id.to_string(), message_id.to_string()))
            .cloned())
    }
}
