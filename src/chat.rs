//! Chat entry points: one worker per chat runs stream, corrective loops and
//! the apply pass, then emits exactly one terminal event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use agent_provider::{is_cancelled, CancelSignal, ModelMessage, ModelProvider, StreamRequest};
use dyad_tags::{output_block, OutputKind};
use mutation_engine::{ApplyContext, FileUploads, MutationEngine};
use session_store::MessageStore;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::corrective::prompts::DEFAULT_SYSTEM_INSTRUCTIONS;
use crate::corrective::{run_corrective_loops, CorrectiveContext, CorrectiveExit, ProblemChecker};
use crate::events::{ChatEvent, ChatEventSink};
use crate::session::{RegistryError, SessionRegistry};
use crate::stream::{ChunkProcessor, ProcessingMode, StreamOutcome};

/// Prefix of the error reported when the provider stream fails.
pub const AI_ERROR_PREFIX: &str = "Sorry, there was an error from the AI: ";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat id must not be empty")]
    EmptyChatId,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to spawn worker for chat {chat_id}: {source}")]
    Spawn {
        chat_id: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    /// Saved into the app when the model writes the placeholder token.
    Upload,
    /// Inlined into the prompt as context.
    ChatContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub kind: AttachmentKind,
    pub bytes: Vec<u8>,
}

/// UI component the user pointed at when writing the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedComponent {
    pub name: String,
    pub relative_path: String,
    pub line_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub chat_id: String,
    pub prompt: String,
    pub history: Vec<ModelMessage>,
    pub attachments: Vec<Attachment>,
    pub selected_components: Vec<SelectedComponent>,
    /// Stream only: no corrective loops and no apply pass.
    pub read_only: bool,
}

impl ChatRequest {
    #[must_use]
    pub fn new(chat_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            prompt: prompt.into(),
            history: Vec::new(),
            attachments: Vec::new(),
            selected_components: Vec::new(),
            read_only: false,
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<ModelMessage>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    #[must_use]
    pub fn with_selected_component(mut self, component: SelectedComponent) -> Self {
        self.selected_components.push(component);
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

pub struct ChatPipeline {
    provider: Arc<dyn ModelProvider>,
    store: Arc<dyn MessageStore>,
    registry: SessionRegistry,
    engine: MutationEngine,
    config: PipelineConfig,
    app_path: PathBuf,
    checker: Option<Arc<dyn ProblemChecker>>,
    supabase_project_id: Option<String>,
}

impl ChatPipeline {
    #[must_use]
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        store: Arc<dyn MessageStore>,
        engine: MutationEngine,
        app_path: impl Into<PathBuf>,
        config: PipelineConfig,
    ) -> Self {
        let registry = SessionRegistry::new(Arc::clone(&store), config.persist_throttle());
        Self {
            provider,
            store,
            registry,
            engine,
            config,
            app_path: app_path.into(),
            checker: None,
            supabase_project_id: None,
        }
    }

    #[must_use]
    pub fn with_problem_checker(mut self, checker: Arc<dyn ProblemChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    #[must_use]
    pub fn with_supabase_project(mut self, project_id: impl Into<String>) -> Self {
        self.supabase_project_id = Some(project_id.into());
        self
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Starts a chat on its own worker thread and returns its id.
    ///
    /// Fails fast when the chat already has an active stream.
    pub fn stream_chat(
        self: &Arc<Self>,
        request: ChatRequest,
        sink: Arc<dyn ChatEventSink>,
    ) -> Result<String, ChatError> {
        let (message_id, cancel) = self.begin(&request)?;
        let chat_id = request.chat_id.clone();
        let pipeline = Arc::clone(self);

        let spawned = thread::Builder::new()
            .name(format!("dyad-chat-{chat_id}"))
            .spawn(move || {
                pipeline.drive(request, &message_id, &cancel, sink.as_ref());
            });
        if let Err(source) = spawned {
            self.release(&chat_id);
            return Err(ChatError::Spawn { chat_id, source });
        }
        Ok(chat_id)
    }

    /// Runs a chat on the calling thread and returns its terminal event,
    /// which is also sent to `sink`.
    pub fn run_chat(
        &self,
        request: ChatRequest,
        sink: &dyn ChatEventSink,
    ) -> Result<ChatEvent, ChatError> {
        let (message_id, cancel) = self.begin(&request)?;
        Ok(self.drive(request, &message_id, &cancel, sink))
    }

    /// Requests cooperative cancellation; false when the chat is not streaming.
    pub fn cancel_chat(&self, chat_id: &str) -> bool {
        self.registry.cancel(chat_id)
    }

    #[must_use]
    pub fn is_streaming(&self, chat_id: &str) -> bool {
        self.registry.is_active(chat_id)
    }

    fn begin(&self, request: &ChatRequest) -> Result<(String, CancelSignal), ChatError> {
        if request.chat_id.trim().is_empty() {
            return Err(ChatError::EmptyChatId);
        }
        let message_id = Uuid::new_v4().to_string();
        let cancel = self.registry.begin(&request.chat_id, &message_id)?;
        Ok((message_id, cancel))
    }

    fn drive(
        &self,
        request: ChatRequest,
        message_id: &str,
        cancel: &CancelSignal,
        sink: &dyn ChatEventSink,
    ) -> ChatEvent {
        let chat_id = request.chat_id.clone();
        let terminal = match catch_unwind(AssertUnwindSafe(|| {
            self.run_session(request, message_id, cancel, sink)
        })) {
            Ok(terminal) => terminal,
            Err(_) => {
                error!(chat_id = %chat_id, "chat worker panicked");
                self.release(&chat_id);
                ChatEvent::Error {
                    chat_id,
                    error: "Chat worker panicked".to_string(),
                }
            }
        };

        sink.send(terminal.clone());
        terminal
    }

    fn run_session(
        &self,
        request: ChatRequest,
        message_id: &str,
        cancel: &CancelSignal,
        sink: &dyn ChatEventSink,
    ) -> ChatEvent {
        let chat_id = request.chat_id.clone();
        let mut uploads = FileUploads::new();
        let mut messages = request.history.clone();
        messages.push(ModelMessage::user(build_prompt(&request, &mut uploads)));
        let instructions = self
            .config
            .system_instructions
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_INSTRUCTIONS);
        let profile = self.provider.profile();
        info!(
            chat_id = %chat_id,
            message_id,
            provider = %profile.provider_id,
            model = %profile.model_id,
            read_only = request.read_only,
            "chat stream started"
        );

        let mut processor = ChunkProcessor::new(&chat_id, &self.registry, sink);
        let outcome = processor.run(
            self.provider.as_ref(),
            StreamRequest::new(messages.clone(), instructions),
            cancel,
            ProcessingMode::Full,
        );
        let exit = match outcome {
            StreamOutcome::Completed => {
                let context = CorrectiveContext {
                    provider: self.provider.as_ref(),
                    cancel,
                    messages: &messages,
                    instructions,
                    app_path: &self.app_path,
                    config: &self.config,
                    checker: self.checker.as_deref(),
                };
                run_corrective_loops(&context, &mut processor, request.read_only).exit
            }
            StreamOutcome::Cancelled => CorrectiveExit::Cancelled,
            StreamOutcome::Failed(error) => CorrectiveExit::Failed(error),
        };

        let terminal = match exit {
            CorrectiveExit::Finished if is_cancelled(cancel) => self.finish_cancelled(&chat_id),
            CorrectiveExit::Finished if request.read_only => ChatEvent::End {
                chat_id: chat_id.clone(),
                updated_files: false,
                extra_files: Vec::new(),
                extra_files_error: None,
                commit_hash: None,
                cancelled: false,
            },
            CorrectiveExit::Finished => {
                self.apply_response(&chat_id, message_id, &mut processor, &uploads)
            }
            CorrectiveExit::Cancelled => self.finish_cancelled(&chat_id),
            CorrectiveExit::Failed(provider_error) => {
                warn!(chat_id = %chat_id, error = %provider_error, "provider stream failed");
                ChatEvent::Error {
                    chat_id: chat_id.clone(),
                    error: format!("{AI_ERROR_PREFIX}{provider_error}"),
                }
            }
        };

        self.release(&chat_id);
        info!(
            chat_id = %chat_id,
            terminal = terminal_kind(&terminal),
            "chat stream finished"
        );
        terminal
    }

    fn apply_response(
        &self,
        chat_id: &str,
        message_id: &str,
        processor: &mut ChunkProcessor<'_>,
        uploads: &FileUploads,
    ) -> ChatEvent {
        let mut context = ApplyContext::new(&self.app_path, uploads);
        context.supabase_project_id = self.supabase_project_id.as_deref();
        context.write_migration_files = self.config.enable_migration_files;

        let result = match self.engine.apply(processor.response(), &context) {
            Ok(result) => result,
            Err(apply_error) => {
                error!(chat_id, error = %apply_error, "apply pass failed");
                return ChatEvent::Error {
                    chat_id: chat_id.to_string(),
                    error: format!("Failed to apply changes: {apply_error}"),
                };
            }
        };

        let mut feedback = String::new();
        let blocks = result
            .warnings
            .iter()
            .map(|message| output_block(OutputKind::Warning, message))
            .chain(
                result
                    .errors
                    .iter()
                    .map(|message| output_block(OutputKind::Error, message)),
            );
        for block in blocks {
            feedback.push_str("\n\n");
            feedback.push_str(&block);
        }
        processor.append_text(&feedback);

        if let Some(hash) = &result.commit_hash {
            if let Err(store_error) = self.store.attach_commit(chat_id, message_id, hash) {
                warn!(chat_id, error = %store_error, "failed to record commit hash");
            }
        }

        ChatEvent::End {
            chat_id: chat_id.to_string(),
            updated_files: result.updated_files(),
            extra_files: result.uncommitted_paths,
            extra_files_error: result.extra_files_error,
            commit_hash: result.commit_hash,
            cancelled: false,
        }
    }

    fn finish_cancelled(&self, chat_id: &str) -> ChatEvent {
        info!(chat_id, "chat stream cancelled");
        if let Err(store_error) = self.registry.mark_cancelled(chat_id) {
            warn!(chat_id, error = %store_error, "failed to persist cancelled response");
        }
        ChatEvent::cancelled_end(chat_id)
    }

    fn release(&self, chat_id: &str) {
        if let Err(store_error) = self.registry.end(chat_id) {
            warn!(chat_id, error = %store_error, "failed to flush response on session end");
        }
    }
}

fn terminal_kind(event: &ChatEvent) -> &'static str {
    match event {
        ChatEvent::Snapshot { .. } => "snapshot",
        ChatEvent::Error { .. } => "error",
        ChatEvent::End {
            cancelled: true, ..
        } => "cancelled",
        ChatEvent::End { .. } => "end",
    }
}

/// User turn text: prompt, selected components, then attachments.
fn build_prompt(request: &ChatRequest, uploads: &mut FileUploads) -> String {
    let mut prompt = request.prompt.clone();

    for component in &request.selected_components {
        prompt.push_str(&format!(
            "\n\nSelected component: {} (file: {}, line {})",
            component.name, component.relative_path, component.line_number
        ));
    }

    for attachment in &request.attachments {
        match attachment.kind {
            AttachmentKind::Upload => {
                let token = uploads.register(&attachment.file_name, attachment.bytes.clone());
                prompt.push_str(&format!(
                    "\n\nAttachment: {} (file id: {token}). To save it in the app, \
write a dyad-write tag whose entire content is the file id.",
                    attachment.file_name
                ));
            }
            AttachmentKind::ChatContext => {
                prompt.push_str(&format!(
                    "\n\nAttachment: {}\n```\n{}\n```",
                    attachment.file_name,
                    String::from_utf8_lossy(&attachment.bytes)
                ));
            }
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn prompt_includes_components_and_attachments() {
        let request = ChatRequest::new("c", "Make it blue")
            .with_selected_component(SelectedComponent {
                name: "Header".to_string(),
                relative_path: "src/Header.tsx".to_string(),
                line_number: 12,
            })
            .with_attachment(Attachment {
                file_name: "logo.png".to_string(),
                kind: AttachmentKind::Upload,
                bytes: vec![1, 2, 3],
            })
            .with_attachment(Attachment {
                file_name: "notes.md".to_string(),
                kind: AttachmentKind::ChatContext,
                bytes: b"use brand colors".to_vec(),
            });
        let mut uploads = FileUploads::new();

        let prompt = build_prompt(&request, &mut uploads);

        assert!(prompt.starts_with("Make it blue\n\nSelected component: Header (file: src/Header.tsx, line 12)"));
        assert!(prompt.contains("logo.png (file id: DYAD_ATTACHMENT_0)"));
        assert!(prompt.ends_with("Attachment: notes.md\n```\nuse brand colors\n```"));
        assert_eq!(
            uploads.get("DYAD_ATTACHMENT_0").map(|file| file.bytes.clone()),
            Some(vec![1, 2, 3])
        );
    }

    #[test]
    fn terminal_kind_distinguishes_cancellation() {
        assert_eq!(terminal_kind(&ChatEvent::cancelled_end("c")), "cancelled");
        assert_eq!(
            terminal_kind(&ChatEvent::Error {
                chat_id: "c".to_string(),
                error: "x".to_string(),
            }),
            "error"
        );
    }
}
