use dyad_tags::has_unclosed_write;
use tracing::info;

use super::{CorrectiveContext, CorrectiveExit, CorrectiveReport};
use crate::stream::{ChunkProcessor, ProcessingMode};

/// Continues the assistant turn while the last `dyad-write` is left open.
pub(super) fn run(
    context: &CorrectiveContext<'_>,
    processor: &mut ChunkProcessor<'_>,
    report: &mut CorrectiveReport,
) -> Result<(), CorrectiveExit> {
    for attempt in 1..=context.max_attempts() {
        if !has_unclosed_write(processor.response()) {
            break;
        }
        if context.is_cancelled() {
            return Err(CorrectiveExit::Cancelled);
        }

        info!(attempt, "continuing response with unclosed dyad-write");
        report.continuation_rounds += 1;
        context.reinvoke(processor, None, ProcessingMode::ContinuationOnly)?;
    }
    Ok(())
}
