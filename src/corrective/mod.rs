//! Bounded corrective re-invocations run after a primary stream completes.
//!
//! Three loops run in a fixed order: continuation of a cut-off `dyad-write`,
//! search-replace repair, then problem auto-fix. Each loop re-invokes the
//! model at most `max_corrective_attempts` times, never more than two. Loops
//! check the cancel signal before every attempt and only append to the
//! response.

mod auto_fix;
mod continuation;
pub mod prompts;
mod search_replace;

use std::path::Path;

use agent_provider::{
    is_cancelled, CancelSignal, ModelMessage, ModelProvider, ProviderError, StreamRequest,
};
use tracing::debug;

pub use auto_fix::{CheckError, ProblemChecker};

use crate::config::{PipelineConfig, MAX_CORRECTIVE_ATTEMPTS};
use crate::stream::{ChunkProcessor, ProcessingMode, StreamOutcome};

/// Result of one search-replace repair attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairTelemetry {
    pub attempt: u32,
    pub success: bool,
    pub issue_count: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CorrectiveExit {
    #[default]
    Finished,
    Cancelled,
    Failed(ProviderError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrectiveReport {
    pub continuation_rounds: u32,
    pub search_replace_rounds: u32,
    pub auto_fix_rounds: u32,
    pub telemetry: Vec<RepairTelemetry>,
    pub exit: CorrectiveExit,
}

impl CorrectiveReport {
    #[must_use]
    pub fn total_rounds(&self) -> u32 {
        self.continuation_rounds + self.search_replace_rounds + self.auto_fix_rounds
    }
}

/// Inputs shared by every corrective loop of one chat.
pub struct CorrectiveContext<'a> {
    pub provider: &'a dyn ModelProvider,
    pub cancel: &'a CancelSignal,
    /// Conversation up to and including the user prompt.
    pub messages: &'a [ModelMessage],
    pub instructions: &'a str,
    pub app_path: &'a Path,
    pub config: &'a PipelineConfig,
    pub checker: Option<&'a dyn ProblemChecker>,
}

impl CorrectiveContext<'_> {
    /// Configured attempts, never more than [`MAX_CORRECTIVE_ATTEMPTS`].
    fn max_attempts(&self) -> u32 {
        self.config.max_corrective_attempts.min(MAX_CORRECTIVE_ATTEMPTS)
    }

    fn is_cancelled(&self) -> bool {
        is_cancelled(self.cancel)
    }

    /// Re-invokes the model with the response so far as the assistant turn,
    /// followed by `follow_up` when given.
    fn reinvoke(
        &self,
        processor: &mut ChunkProcessor<'_>,
        follow_up: Option<String>,
        mode: ProcessingMode,
    ) -> Result<(), CorrectiveExit> {
        let mut messages = self.messages.to_vec();
        messages.push(ModelMessage::assistant(processor.response()));
        if let Some(prompt) = follow_up {
            messages.push(ModelMessage::user(prompt));
        }

        let request = StreamRequest::new(messages, self.instructions);
        match processor.run(self.provider, request, self.cancel, mode) {
            StreamOutcome::Completed => Ok(()),
            StreamOutcome::Cancelled => Err(CorrectiveExit::Cancelled),
            StreamOutcome::Failed(error) => Err(CorrectiveExit::Failed(error)),
        }
    }
}

/// Runs the enabled loops in order and reports what happened.
///
/// Read-only chats skip every loop.
pub fn run_corrective_loops(
    context: &CorrectiveContext<'_>,
    processor: &mut ChunkProcessor<'_>,
    read_only: bool,
) -> CorrectiveReport {
    let mut report = CorrectiveReport::default();
    if read_only {
        return report;
    }

    let result = run_loops(context, processor, &mut report);
    if let Err(exit) = result {
        report.exit = exit;
    }
    debug!(
        continuation = report.continuation_rounds,
        search_replace = report.search_replace_rounds,
        auto_fix = report.auto_fix_rounds,
        exit = ?report.exit,
        "corrective loops finished"
    );
    report
}

fn run_loops(
    context: &CorrectiveContext<'_>,
    processor: &mut ChunkProcessor<'_>,
    report: &mut CorrectiveReport,
) -> Result<(), CorrectiveExit> {
    continuation::run(context, processor, report)?;
    if context.config.turbo_edits_v2 {
        search_replace::run(context, processor, report)?;
    }
    if let Some(checker) = context.checker.filter(|_| context.config.auto_fix_problems) {
        auto_fix::run(context, checker, processor, report)?;
    }
    Ok(())
}
