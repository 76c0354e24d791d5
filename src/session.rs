//! Per-chat stream sessions: cancellation, partial-response cache, throttled
//! durable persistence.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use agent_provider::{new_cancel_signal, CancelSignal};
use session_store::{MessageStore, MessageStoreError};
use thiserror::Error;
use tracing::debug;

/// Appended once to the persisted text of a cancelled response.
pub const CANCELLATION_MARKER: &str = "\n\n[Response cancelled by user]";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("chat {chat_id} already has an active stream")]
    AlreadyStreaming { chat_id: String },
}

#[derive(Debug)]
struct Session {
    message_id: String,
    cancel: CancelSignal,
    text: String,
    last_persist: Option<Instant>,
    dirty: bool,
    cancel_marked: bool,
}

/// A durable write decided under the lock and performed after releasing it.
struct PendingWrite {
    message_id: String,
    text: String,
}

/// Registry of in-flight chat streams, keyed by chat id.
///
/// At most one session exists per chat. Durable writes go through the
/// [`MessageStore`] outside the registry lock, so a slow store never blocks
/// other chats.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
    store: Arc<dyn MessageStore>,
    throttle: Duration,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, throttle: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            store,
            throttle,
        }
    }

    /// Opens a session for `chat_id`, persisting into `message_id`.
    pub fn begin(&self, chat_id: &str, message_id: &str) -> Result<CancelSignal, RegistryError> {
        let mut sessions = self.lock_sessions();
        if sessions.contains_key(chat_id) {
            return Err(RegistryError::AlreadyStreaming {
                chat_id: chat_id.to_string(),
            });
        }

        let cancel = new_cancel_signal();
        sessions.insert(
            chat_id.to_string(),
            Session {
                message_id: message_id.to_string(),
                cancel: Arc::clone(&cancel),
                text: String::new(),
                last_persist: None,
                dirty: false,
                cancel_marked: false,
            },
        );
        debug!(chat_id, message_id, "chat session started");
        Ok(cancel)
    }

    /// Raises the cancel signal; returns false when no session is active.
    pub fn cancel(&self, chat_id: &str) -> bool {
        match self.lock_sessions().get(chat_id) {
            Some(session) => {
                session.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Caches `text` and writes it durably at most once per throttle window.
    pub fn persist(&self, chat_id: &str, text: &str) -> Result<(), MessageStoreError> {
        let pending = {
            let mut sessions = self.lock_sessions();
            let Some(session) = sessions.get_mut(chat_id) else {
                return Ok(());
            };
            session.text.clear();
            session.text.push_str(text);

            let now = Instant::now();
            let due = session
                .last_persist
                .map_or(true, |last| now.duration_since(last) >= self.throttle);
            if due {
                Some(take_write(session, now))
            } else {
                session.dirty = true;
                None
            }
        };

        self.write(chat_id, pending)
    }

    /// Writes the cached text if a throttled write is still pending.
    pub fn flush(&self, chat_id: &str) -> Result<(), MessageStoreError> {
        let pending = {
            let mut sessions = self.lock_sessions();
            sessions
                .get_mut(chat_id)
                .filter(|session| session.dirty)
                .map(|session| take_write(session, Instant::now()))
        };

        self.write(chat_id, pending)
    }

    #[must_use]
    pub fn partial(&self, chat_id: &str) -> Option<String> {
        self.lock_sessions()
            .get(chat_id)
            .map(|session| session.text.clone())
    }

    /// Appends [`CANCELLATION_MARKER`] exactly once, persists without
    /// throttling and returns the final text.
    pub fn mark_cancelled(&self, chat_id: &str) -> Result<Option<String>, MessageStoreError> {
        let (text, pending) = {
            let mut sessions = self.lock_sessions();
            let Some(session) = sessions.get_mut(chat_id) else {
                return Ok(None);
            };
            if session.cancel_marked && !session.dirty {
                (session.text.clone(), None)
            } else {
                if !session.cancel_marked {
                    session.text.push_str(CANCELLATION_MARKER);
                    session.cancel_marked = true;
                }
                let pending = take_write(session, Instant::now());
                (pending.text.clone(), Some(pending))
            }
        };

        self.write(chat_id, pending)?;
        Ok(Some(text))
    }

    /// Flushes any pending write and removes the session.
    pub fn end(&self, chat_id: &str) -> Result<(), MessageStoreError> {
        let pending = self.lock_sessions().remove(chat_id).and_then(|session| {
            session.dirty.then_some(PendingWrite {
                message_id: session.message_id,
                text: session.text,
            })
        });
        debug!(chat_id, "chat session ended");

        self.write(chat_id, pending)
    }

    #[must_use]
    pub fn is_active(&self, chat_id: &str) -> bool {
        self.lock_sessions().contains_key(chat_id)
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock_sessions().len()
    }

    fn write(&self, chat_id: &str, pending: Option<PendingWrite>) -> Result<(), MessageStoreError> {
        match pending {
            Some(write) => self
                .store
                .save_content(chat_id, &write.message_id, &write.text),
            None => Ok(()),
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        lock_unpoisoned(&self.sessions)
    }
}

fn take_write(session: &mut Session, now: Instant) -> PendingWrite {
    session.last_persist = Some(now);
    session.dirty = false;
    PendingWrite {
        message_id: session.message_id.clone(),
        text: session.text.clone(),
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use agent_provider::is_cancelled;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use session_store::InMemoryMessageStore;

    use super::*;

    fn registry(throttle: Duration) -> (Arc<InMemoryMessageStore>, SessionRegistry) {
        let store = Arc::new(InMemoryMessageStore::new());
        let registry = SessionRegistry::new(store.clone(), throttle);
        (store, registry)
    }

    fn stored_content(store: &InMemoryMessageStore, chat_id: &str) -> String {
        store
            .message(chat_id, "m1")
            .expect("read")
            .map(|message| message.content)
            .unwrap_or_default()
    }

    #[test]
    fn second_begin_for_same_chat_fails_fast() {
        let (_, registry) = registry(Duration::ZERO);
        registry.begin("c1", "m1").expect("first begin");

        assert_matches!(
            registry.begin("c1", "m2"),
            Err(RegistryError::AlreadyStreaming { .. })
        );
        registry.begin("c2", "m3").expect("other chat is independent");
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn cancel_signals_token_and_is_noop_when_absent() {
        let (_, registry) = registry(Duration::ZERO);
        let cancel = registry.begin("c1", "m1").expect("begin");

        assert!(!registry.cancel("other"));
        assert!(registry.cancel("c1"));
        assert!(registry.cancel("c1"));
        assert!(is_cancelled(&cancel));
    }

    #[test]
    fn persist_is_throttled_and_flushed_on_end() {
        let (store, registry) = registry(Duration::from_secs(60));
        registry.begin("c1", "m1").expect("begin");

        registry.persist("c1", "a").expect("persist");
        registry.persist("c1", "ab").expect("persist");
        registry.persist("c1", "abc").expect("persist");

        assert_eq!(registry.partial("c1").as_deref(), Some("abc"));
        assert_eq!(store.content_write_count("c1"), 1);
        assert_eq!(stored_content(&store, "c1"), "a");

        registry.end("c1").expect("end");
        assert_eq!(store.content_write_count("c1"), 2);
        assert_eq!(stored_content(&store, "c1"), "abc");
        assert!(!registry.is_active("c1"));
    }

    #[test]
    fn flush_writes_only_when_dirty() {
        let (store, registry) = registry(Duration::from_secs(60));
        registry.begin("c1", "m1").expect("begin");
        registry.persist("c1", "a").expect("persist");

        registry.flush("c1").expect("flush");
        assert_eq!(store.content_write_count("c1"), 1);

        registry.persist("c1", "ab").expect("persist");
        registry.flush("c1").expect("flush");
        assert_eq!(store.content_write_count("c1"), 2);
        assert_eq!(stored_content(&store, "c1"), "ab");
    }

    #[test]
    fn persist_writes_again_after_window_elapses() {
        let (store, registry) = registry(Duration::from_millis(5));
        registry.begin("c1", "m1").expect("begin");

        registry.persist("c1", "a").expect("persist");
        thread::sleep(Duration::from_millis(20));
        registry.persist("c1", "ab").expect("persist");

        assert_eq!(store.content_write_count("c1"), 2);
    }

    #[test]
    fn cancellation_marker_is_appended_once() {
        let (store, registry) = registry(Duration::from_secs(60));
        registry.begin("c1", "m1").expect("begin");
        registry.persist("c1", "partial").expect("persist");

        let first = registry.mark_cancelled("c1").expect("mark");
        let second = registry.mark_cancelled("c1").expect("mark again");
        registry.end("c1").expect("end");

        let expected = format!("partial{CANCELLATION_MARKER}");
        assert_eq!(first.as_deref(), Some(expected.as_str()));
        assert_eq!(second, first);
        assert_eq!(stored_content(&store, "c1"), expected);
        assert_eq!(stored_content(&store, "c1").matches(CANCELLATION_MARKER).count(), 1);
    }

    #[test]
    fn concurrent_chats_do_not_interfere() {
        let (store, registry) = registry(Duration::ZERO);
        let registry = Arc::new(registry);

        let workers: Vec<_> = (0..4)
            .map(|index| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let chat_id = format!("chat-{index}");
                    registry.begin(&chat_id, "m1").expect("begin");
                    for step in 0..20 {
                        registry
                            .persist(&chat_id, &format!("{chat_id}:{step}"))
                            .expect("persist");
                    }
                    registry.end(&chat_id).expect("end");
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker should finish");
        }

        for index in 0..4 {
            let chat_id = format!("chat-{index}");
            assert_eq!(stored_content(&store, &chat_id), format!("{chat_id}:19"));
        }
        assert_eq!(registry.active_count(), 0);
    }
}
