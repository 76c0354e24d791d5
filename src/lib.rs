//! Streaming orchestration and code-mutation pipeline for tag-driven AI pair
//! programming.
//!
//! # Flow
//! A [`ChatRequest`] starts one model stream per chat. The [`ChunkProcessor`]
//! turns provider events into response text and live snapshots, the
//! corrective loops repair cut-off or failing output with bounded
//! re-invocations, and the [`mutation_engine::MutationEngine`] applies the
//! finalized `dyad-*` tags to the app directory in one git commit.
//!
//! Invariant: at most one stream per chat id, and every chat ends with
//! exactly one terminal [`ChatEvent`].

pub mod chat;
pub mod config;
pub mod corrective;
pub mod events;
pub mod logging;
pub mod session;
pub mod stream;

pub use crate::chat::{
    Attachment, AttachmentKind, ChatError, ChatPipeline, ChatRequest, SelectedComponent,
    AI_ERROR_PREFIX,
};
pub use crate::config::{ConfigError, PipelineConfig, MAX_CORRECTIVE_ATTEMPTS};
pub use crate::corrective::{
    run_corrective_loops, CheckError, CorrectiveContext, CorrectiveExit, CorrectiveReport,
    ProblemChecker, RepairTelemetry,
};
pub use crate::events::{ChatEvent, ChatEventSink, RecordingSink};
pub use crate::logging::init_logging;
pub use crate::session::{RegistryError, SessionRegistry, CANCELLATION_MARKER};
pub use crate::stream::{ChunkProcessor, ProcessingMode, StreamOutcome, ThinkingState};
