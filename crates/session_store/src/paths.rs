use std::fmt::Write;
use std::path::{Path, PathBuf};

pub const CHATS_DIR: [&str; 2] = [".dyad", "chats"];

#[must_use]
pub fn chat_root(app_root: &Path) -> PathBuf {
    app_root.join(CHATS_DIR[0]).join(CHATS_DIR[1])
}

/// Percent-encodes every byte outside `[a-z0-9_-]`.
///
/// Distinct chat ids always map to distinct names, also on case-insensitive
/// filesystems.
#[must_use]
pub fn encode_chat_id_for_filename(chat_id: &str) -> String {
    let mut encoded = String::with_capacity(chat_id.len());
    for byte in chat_id.bytes() {
        match byte {
            b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => encoded.push(char::from(byte)),
            _ => {
                let _ = write!(encoded, "%{byte:02X}");
            }
        }
    }
    encoded
}

#[must_use]
pub fn chat_file_name(chat_id: &str) -> String {
    format!("{}.jsonl", encode_chat_id_for_filename(chat_id))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn file_names_keep_plain_ids_readable() {
        assert_eq!(chat_file_name("chat-1"), "chat-1.jsonl");
        assert_eq!(chat_file_name("a_b"), "a_b.jsonl");
    }

    #[test]
    fn distinct_ids_never_share_a_file_name() {
        let ids = ["a.b", "a-b", "a%2Eb", "A-b", "a/b", "caf\u{e9}"];
        let names: Vec<String> = ids.iter().map(|id| chat_file_name(id)).collect();

        assert_eq!(names[0], "a%2Eb.jsonl");
        assert_eq!(names[2], "a%252%45b.jsonl");
        assert_eq!(names[3], "%41-b.jsonl");
        assert_eq!(names[5], "caf%C3%A9.jsonl");
        for (index, name) in names.iter().enumerate() {
            assert!(!name.contains('/'));
            assert!(names[index + 1..].iter().all(|other| other != name));
        }
    }
}
