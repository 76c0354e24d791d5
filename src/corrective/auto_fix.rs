use dyad_tags::{output_block, parse_tags, OutputKind, ProblemReport, Tag, TagSet};
use mutation_engine::VirtualFileSystem;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::prompts::{auto_fix_prompt, auto_fix_unresolved};
use super::{CorrectiveContext, CorrectiveExit, CorrectiveReport};
use crate::stream::{ChunkProcessor, ProcessingMode};

#[derive(Debug, Error)]
#[error("problem check failed: {message}")]
pub struct CheckError {
    pub message: String,
}

impl CheckError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Static analysis run against the proposed file state.
pub trait ProblemChecker: Send + Sync {
    fn check(&self, files: &VirtualFileSystem) -> Result<ProblemReport, CheckError>;
}

/// Appends a problem report and asks the model to fix it, while problems
/// remain.
///
/// Responses that add dependencies are skipped since the checker cannot see
/// packages that are not installed yet. Problems left after the last attempt
/// are reported as a warning.
pub(super) fn run(
    context: &CorrectiveContext<'_>,
    checker: &dyn ProblemChecker,
    processor: &mut ChunkProcessor<'_>,
    report: &mut CorrectiveReport,
) -> Result<(), CorrectiveExit> {
    let max_attempts = context.max_attempts();
    for attempt in 1..=max_attempts {
        if context.is_cancelled() {
            return Err(CorrectiveExit::Cancelled);
        }

        let Some(problems) = current_problems(context, checker, processor.response()) else {
            return Ok(());
        };

        info!(attempt, problems = problems.problems.len(), "auto-fixing problems");
        processor.append_text(&format!("\n\n{}\n\n", problems.to_block()));
        report.auto_fix_rounds += 1;
        context.reinvoke(
            processor,
            Some(auto_fix_prompt(&problems)),
            ProcessingMode::Full,
        )?;
    }

    if max_attempts == 0 {
        return Ok(());
    }
    if let Some(problems) = current_problems(context, checker, processor.response()) {
        warn!(
            problems = problems.problems.len(),
            "problems unresolved after auto-fix attempts"
        );
        processor.append_text(&format!(
            "\n\n{}",
            output_block(
                OutputKind::Warning,
                &auto_fix_unresolved(&problems, max_attempts)
            )
        ));
    }
    Ok(())
}

/// Problems in the proposed file state, or `None` when there is nothing to
/// fix or the check cannot run.
fn current_problems(
    context: &CorrectiveContext<'_>,
    checker: &dyn ProblemChecker,
    response: &str,
) -> Option<ProblemReport> {
    let tags = parse_tags(response);
    if tags
        .iter()
        .any(|tag| matches!(tag, Tag::AddDependency { .. }))
    {
        debug!("skipping auto-fix for response that adds dependencies");
        return None;
    }

    let (overlay, overlay_errors) =
        VirtualFileSystem::from_tags(context.app_path, &TagSet::from_tags(&tags));
    if !overlay_errors.is_empty() {
        debug!(errors = ?overlay_errors, "overlay skipped some tags");
    }

    match checker.check(&overlay) {
        Ok(problems) if problems.is_empty() => None,
        Ok(problems) => Some(problems),
        Err(error) => {
            warn!(%error, "stopping auto-fix");
            None
        }
    }
}
