use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRecordType {
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRecordType {
    Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatHeader {
    #[serde(rename = "type")]
    pub record_type: ChatRecordType,
    pub version: u32,
    pub chat_id: String,
    pub created_at: String,
}

impl ChatHeader {
    #[must_use]
    pub fn v1(chat_id: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            record_type: ChatRecordType::Chat,
            version: 1,
            chat_id: chat_id.into(),
            created_at: created_at.into(),
        }
    }
}

/// One appended change to an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(rename = "type")]
    pub record_type: MessageRecordType,
    pub id: String,
    pub message_id: String,
    pub ts: String,
    #[serde(flatten)]
    pub kind: MessageRecordKind,
}

impl MessageRecord {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        message_id: impl Into<String>,
        ts: impl Into<String>,
        kind: MessageRecordKind,
    ) -> Self {
        Self {
            record_type: MessageRecordType::Message,
            id: id.into(),
            message_id: message_id.into(),
            ts: ts.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageRecordKind {
    /// Replaces the full message body.
    Content { content: String },
    Commit { commit_hash: String },
}

/// Latest known state of a message after replaying its records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: String,
    pub content: String,
    pub commit_hash: Option<String>,
}

impl StoredMessage {
    pub(crate) fn apply(&mut self, kind: &MessageRecordKind) {
        match kind {
            MessageRecordKind::Content { content } => self.content.clone_from(content),
            MessageRecordKind::Commit { commit_hash } => {
                self.commit_hash = Some(commit_hash.clone());
            }
        }
    }
}

/// A decoded log line, dispatched on its `type` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JsonLine {
    Chat(ChatHeader),
    Message(MessageRecord),
    Other,
}
