mod error;
mod memory;
mod paths;
mod schema;
mod store;

pub use error::MessageStoreError;
pub use memory::{InMemoryMessageStore, RecordedWrite};
pub use paths::{chat_file_name, chat_root, CHATS_DIR};
pub use schema::{
    ChatHeader, ChatRecordType, MessageRecord, MessageRecordKind, MessageRecordType, StoredMessage,
};
pub use store::{open_chat_log, ChatLog, JsonlMessageStore, MessageStore};
