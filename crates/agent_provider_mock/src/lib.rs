//! Deterministic scripted implementation of the shared `agent_provider` contract.
//!
//! Each call to [`ModelProvider::stream`] consumes the next queued [`Script`].
//! Once the queue is drained, further invocations stream nothing and finish.
//! Every request is recorded so tests can assert on re-invocation counts and
//! the exact conversation that was replayed.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use agent_provider::{
    is_cancelled, CancelSignal, ModelProvider, ProviderError, ProviderProfile, StreamEvent,
    StreamRequest,
};
use serde_json::Value;

/// Stable provider identifier used for explicit startup selection.
pub const MOCK_PROVIDER_ID: &str = "mock";

/// Upper bound for [`ScriptStep::WaitForCancel`] so a broken test cannot hang forever.
const CANCEL_WAIT_LIMIT: Duration = Duration::from_secs(10);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// One scripted action performed during a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Emit(StreamEvent),
    Sleep(Duration),
    /// Blocks until the caller raises the cancel signal.
    WaitForCancel,
    /// Fails the stream with a provider error.
    Fail(String),
}

/// Ordered steps for one provider invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    steps: Vec<ScriptStep>,
}

impl Script {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Splits `text` into word-sized text deltas, keeping separators attached.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self::new().text_tokens(text)
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::Emit(StreamEvent::text(text)));
        self
    }

    #[must_use]
    pub fn text_tokens(mut self, text: &str) -> Self {
        let mut pending_token = String::new();
        for ch in text.chars() {
            pending_token.push(ch);
            if matches!(ch, ' ' | '\n') {
                self.steps.push(ScriptStep::Emit(StreamEvent::text(std::mem::take(
                    &mut pending_token,
                ))));
            }
        }

        if !pending_token.is_empty() {
            self.steps
                .push(ScriptStep::Emit(StreamEvent::text(pending_token)));
        }

        self
    }

    #[must_use]
    pub fn reasoning(mut self, text: impl Into<String>) -> Self {
        self.steps
            .push(ScriptStep::Emit(StreamEvent::reasoning(text)));
        self
    }

    #[must_use]
    pub fn tool_call(
        mut self,
        server: impl Into<String>,
        tool: impl Into<String>,
        arguments: Value,
    ) -> Self {
        let call_id = format!("call-{}", self.steps.len() + 1);
        self.steps.push(ScriptStep::Emit(StreamEvent::ToolCall {
            call_id,
            server: server.into(),
            tool: tool.into(),
            arguments,
        }));
        self
    }

    #[must_use]
    pub fn tool_result(
        mut self,
        server: impl Into<String>,
        tool: impl Into<String>,
        output: Value,
    ) -> Self {
        let call_id = format!("call-{}", self.steps.len());
        self.steps.push(ScriptStep::Emit(StreamEvent::ToolResult {
            call_id,
            server: server.into(),
            tool: tool.into(),
            output,
        }));
        self
    }

    #[must_use]
    pub fn sleep(mut self, duration: Duration) -> Self {
        self.steps.push(ScriptStep::Sleep(duration));
        self
    }

    #[must_use]
    pub fn wait_for_cancel(mut self) -> Self {
        self.steps.push(ScriptStep::WaitForCancel);
        self
    }

    #[must_use]
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::Fail(message.into()));
        self
    }

    #[must_use]
    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }
}

/// Deterministic scripted provider used by pipeline tests and local runs.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    model_id: String,
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedProvider {
    /// Creates a provider that answers successive invocations with `scripts`.
    #[must_use]
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            model_id: "mock".to_string(),
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Convenience constructor for plain-text responses.
    #[must_use]
    pub fn from_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(
            responses
                .into_iter()
                .map(|response| Script::from_text(response.as_ref()))
                .collect(),
        )
    }

    /// Returns every request received so far, in invocation order.
    #[must_use]
    pub fn requests(&self) -> Vec<StreamRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    #[must_use]
    pub fn invocation_count(&self) -> usize {
        lock_unpoisoned(&self.requests).len()
    }
}

impl ModelProvider for ScriptedProvider {
    fn profile(&self) -> ProviderProfile {
        ProviderProfile {
            provider_id: MOCK_PROVIDER_ID.to_string(),
            model_id: self.model_id.clone(),
        }
    }

    fn stream(
        &self,
        request: StreamRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(StreamEvent),
    ) -> Result<(), ProviderError> {
        lock_unpoisoned(&self.requests).push(request);
        let script = lock_unpoisoned(&self.scripts).pop_front().unwrap_or_default();

        for step in script.steps {
            if is_cancelled(&cancel) {
                return Err(ProviderError::Cancelled);
            }

            match step {
                ScriptStep::Emit(event) => emit(event),
                ScriptStep::Sleep(duration) => thread::sleep(duration),
                ScriptStep::WaitForCancel => {
                    let started = Instant::now();
                    while !is_cancelled(&cancel) {
                        if started.elapsed() > CANCEL_WAIT_LIMIT {
                            return Err(ProviderError::stream(
                                "scripted provider timed out waiting for cancellation",
                            ));
                        }
                        thread::sleep(CANCEL_POLL_INTERVAL);
                    }
                    return Err(ProviderError::Cancelled);
                }
                ScriptStep::Fail(message) => return Err(ProviderError::stream(message)),
            }
        }

        Ok(())
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use agent_provider::{new_cancel_signal, ModelMessage};
    use serde_json::json;

    use super::*;

    fn collect_events(
        provider: &ScriptedProvider,
        cancel: CancelSignal,
    ) -> (Vec<StreamEvent>, Result<(), ProviderError>) {
        let mut events = Vec::new();
        let result = provider.stream(
            StreamRequest::new(vec![ModelMessage::user("test")], "system instructions"),
            cancel,
            &mut |event| events.push(event),
        );
        (events, result)
    }

    #[test]
    fn text_tokens_keep_separators_attached() {
        let script = Script::from_text("one two\nthree");
        let texts: Vec<_> = script
            .steps()
            .iter()
            .map(|step| match step {
                ScriptStep::Emit(StreamEvent::TextDelta { text }) => text.as_str(),
                other => panic!("unexpected step {other:?}"),
            })
            .collect();

        assert_eq!(texts, vec!["one ", "two\n", "three"]);
    }

    #[test]
    fn scripts_are_consumed_in_invocation_order() {
        let provider = ScriptedProvider::from_responses(["first", "second"]);

        let (first, _) = collect_events(&provider, new_cancel_signal());
        let (second, _) = collect_events(&provider, new_cancel_signal());
        let (third, result) = collect_events(&provider, new_cancel_signal());

        assert_eq!(first, vec![StreamEvent::text("first")]);
        assert_eq!(second, vec![StreamEvent::text("second")]);
        assert!(third.is_empty());
        assert_eq!(result, Ok(()));
        assert_eq!(provider.invocation_count(), 3);
    }

    #[test]
    fn raised_cancel_signal_stops_before_next_step() {
        let provider = ScriptedProvider::new(vec![Script::new().text("ignored")]);
        let cancel = new_cancel_signal();
        cancel.store(true, Ordering::SeqCst);

        let (events, result) = collect_events(&provider, cancel);

        assert!(events.is_empty());
        assert_eq!(result, Err(ProviderError::Cancelled));
    }

    #[test]
    fn wait_for_cancel_returns_once_signal_is_raised() {
        let provider = ScriptedProvider::new(vec![Script::new().text("partial").wait_for_cancel()]);
        let cancel = new_cancel_signal();
        let remote = Arc::clone(&cancel);

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.store(true, Ordering::SeqCst);
        });

        let (events, result) = collect_events(&provider, cancel);
        canceller.join().expect("canceller thread should finish");

        assert_eq!(events, vec![StreamEvent::text("partial")]);
        assert_eq!(result, Err(ProviderError::Cancelled));
    }

    #[test]
    fn fail_step_surfaces_provider_error() {
        let provider = ScriptedProvider::new(vec![Script::new()
            .reasoning("thinking")
            .tool_call("fs", "read", json!({ "path": "a" }))
            .fail("upstream exploded")]);

        let (events, result) = collect_events(&provider, new_cancel_signal());

        assert_eq!(events.len(), 2);
        assert_eq!(result, Err(ProviderError::stream("upstream exploded")));
    }

    #[test]
    fn profile_exposes_mock_identity() {
        let profile = ScriptedProvider::default().profile();
        assert_eq!(profile.provider_id, MOCK_PROVIDER_ID);
    }
}
