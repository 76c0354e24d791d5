use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::MessageStoreError;
use crate::paths::{chat_file_name, chat_root};
use crate::schema::{ChatHeader, JsonLine, MessageRecord, MessageRecordKind, StoredMessage};

/// Durable storage for assistant message bodies and their commit hashes.
pub trait MessageStore: Send + Sync {
    /// Replaces the stored body of a message, creating the message if needed.
    fn save_content(
        &self,
        chat_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), MessageStoreError>;

    fn attach_commit(
        &self,
        chat_id: &str,
        message_id: &str,
        commit_hash: &str,
    ) -> Result<(), MessageStoreError>;

    fn message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Option<StoredMessage>, MessageStoreError>;
}

/// Replayed contents of one chat log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLog {
    pub header: ChatHeader,
    /// Messages in order of first appearance.
    pub messages: Vec<StoredMessage>,
}

impl ChatLog {
    #[must_use]
    pub fn message(&self, message_id: &str) -> Option<&StoredMessage> {
        self.messages
            .iter()
            .find(|message| message.message_id == message_id)
    }
}

/// One append-only JSONL file per chat: a header line followed by message records.
#[derive(Debug)]
pub struct JsonlMessageStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlMessageStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store rooted at `<app_root>/.dyad/chats`.
    #[must_use]
    pub fn for_app(app_root: &Path) -> Self {
        Self::new(chat_root(app_root))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn chat_path(&self, chat_id: &str) -> PathBuf {
        self.root.join(chat_file_name(chat_id))
    }

    /// Replays the log for `chat_id`; a chat with no file yet has no log.
    pub fn load_chat(&self, chat_id: &str) -> Result<Option<ChatLog>, MessageStoreError> {
        let path = self.chat_path(chat_id);
        if !path.exists() {
            return Ok(None);
        }
        let log = open_chat_log(&path)?;
        if log.header.chat_id != chat_id {
            return Err(MessageStoreError::ChatMismatch {
                path,
                line: 1,
                expected: chat_id.to_string(),
                found: log.header.chat_id,
            });
        }
        Ok(Some(log))
    }

    fn append(
        &self,
        chat_id: &str,
        message_id: &str,
        kind: MessageRecordKind,
    ) -> Result<(), MessageStoreError> {
        if chat_id.is_empty() {
            return Err(MessageStoreError::EmptyChatId);
        }

        let _guard = lock_unpoisoned(&self.write_lock);
        std::fs::create_dir_all(&self.root)
            .map_err(|source| MessageStoreError::io("creating chat directory", &self.root, source))?;

        let path = self.chat_path(chat_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| MessageStoreError::io("opening chat log for append", &path, source))?;
        let is_empty = file
            .metadata()
            .map_err(|source| MessageStoreError::io("reading chat log metadata", &path, source))?
            .len()
            == 0;

        let ts = now_rfc3339()?;
        let mut lines = String::new();
        if is_empty {
            let header = ChatHeader::v1(chat_id, ts.clone());
            lines.push_str(&to_line(&path, &header)?);
        }
        let record = MessageRecord::new(Uuid::new_v4().to_string(), message_id, ts, kind);
        lines.push_str(&to_line(&path, &record)?);

        file.write_all(lines.as_bytes())
            .map_err(|source| MessageStoreError::io("appending chat log record", &path, source))
    }
}

impl MessageStore for JsonlMessageStore {
    fn save_content(
        &self,
        chat_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), MessageStoreError> {
        self.append(
            chat_id,
            message_id,
            MessageRecordKind::Content {
                content: content.to_string(),
            },
        )
    }

    fn attach_commit(
        &self,
        chat_id: &str,
        message_id: &str,
        commit_hash: &str,
    ) -> Result<(), MessageStoreError> {
        self.append(
            chat_id,
            message_id,
            MessageRecordKind::Commit {
                commit_hash: commit_hash.to_string(),
            },
        )
    }

    fn message(
        &self,
        chat_id: &str,
        message_id: &str,
    ) -> Result<Option<StoredMessage>, MessageStoreError> {
        Ok(self
            .load_chat(chat_id)?
            .and_then(|log| log.message(message_id).cloned()))
    }
}

/// Reads and validates a chat log, folding records into per-message state.
pub fn open_chat_log(path: &Path) -> Result<ChatLog, MessageStoreError> {
    let path = path.to_path_buf();
    let read_file = File::open(&path)
        .map_err(|source| MessageStoreError::io("opening chat log", &path, source))?;
    let reader = BufReader::new(read_file);

    let mut header: Option<ChatHeader> = None;
    let mut messages: Vec<StoredMessage> = Vec::new();
    let mut index_by_message: HashMap<String, usize> = HashMap::new();
    let mut seen_record_ids: HashMap<String, usize> = HashMap::new();

    for (line_index, line_result) in reader.lines().enumerate() {
        let line_number = line_index + 1;
        let line =
            line_result.map_err(|source| MessageStoreError::io_line(&path, line_number, source))?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed = parse_json_line(&path, line_number, &line)?;

        if line_number == 1 {
            match parsed {
                JsonLine::Chat(parsed_header) => {
                    validate_header_line(&path, line_number, &parsed_header)?;
                    header = Some(parsed_header);
                }
                JsonLine::Message(_) | JsonLine::Other => {
                    return Err(MessageStoreError::InvalidHeaderRecord {
                        path,
                        line: line_number,
                    });
                }
            }
            continue;
        }

        let record = match parsed {
            JsonLine::Message(record) => record,
            JsonLine::Chat(_) | JsonLine::Other => {
                return Err(MessageStoreError::InvalidMessageRecord {
                    path,
                    line: line_number,
                });
            }
        };
        validate_rfc3339(&path, line_number, "ts", &record.ts)?;
        if seen_record_ids
            .insert(record.id.clone(), line_number)
            .is_some()
        {
            return Err(MessageStoreError::DuplicateRecordId {
                path,
                line: line_number,
                id: record.id,
            });
        }

        let index = *index_by_message
            .entry(record.message_id.clone())
            .or_insert_with(|| {
                messages.push(StoredMessage {
                    message_id: record.message_id.clone(),
                    ..StoredMessage::default()
                });
                messages.len() - 1
            });
        messages[index].apply(&record.kind);
    }

    let header = header.ok_or_else(|| MessageStoreError::MissingHeader { path: path.clone() })?;
    Ok(ChatLog { header, messages })
}

pub(crate) fn parse_json_line(
    path: &Path,
    line_number: usize,
    line: &str,
) -> Result<JsonLine, MessageStoreError> {
    let value = serde_json::from_str::<Value>(line)
        .map_err(|source| MessageStoreError::json_line(path, line_number, source))?;
    let record_type = value.get("type").and_then(Value::as_str).map(str::to_string);

    let parsed = match record_type.as_deref() {
        Some("chat") => JsonLine::Chat(
            serde_json::from_value(value)
                .map_err(|source| MessageStoreError::json_line(path, line_number, source))?,
        ),
        Some("message") => JsonLine::Message(
            serde_json::from_value(value)
                .map_err(|source| MessageStoreError::json_line(path, line_number, source))?,
        ),
        _ => JsonLine::Other,
    };
    Ok(parsed)
}

pub(crate) fn validate_header_line(
    path: &Path,
    line_number: usize,
    header: &ChatHeader,
) -> Result<(), MessageStoreError> {
    if header.version != 1 {
        return Err(MessageStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            line: line_number,
            found: header.version,
        });
    }

    validate_rfc3339(path, line_number, "created_at", &header.created_at)
}

pub(crate) fn validate_rfc3339(
    path: &Path,
    line_number: usize,
    field: &'static str,
    value: &str,
) -> Result<(), MessageStoreError> {
    if OffsetDateTime::parse(value, &Rfc3339).is_err() {
        return Err(MessageStoreError::InvalidTimestamp {
            path: path.to_path_buf(),
            line: line_number,
            field,
            value: value.to_string(),
        });
    }

    Ok(())
}

fn now_rfc3339() -> Result<String, MessageStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(MessageStoreError::ClockFormat)
}

fn to_line<T: serde::Serialize>(path: &Path, value: &T) -> Result<String, MessageStoreError> {
    let mut line = serde_json::to_string(value)
        .map_err(|source| MessageStoreError::json_serialize(path, source))?;
    line.push('\n');
    Ok(line)
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
