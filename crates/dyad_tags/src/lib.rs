//! Tag model and lexer for `dyad-*` directives embedded in model output.
//!
//! [`parse_tags`] is the only place raw response text is turned into typed
//! [`Tag`] records. The remaining helpers format the non-mutation output
//! wrappers the pipeline appends to a response (`dyad-output`,
//! `dyad-problem-report`, tool-call blocks) and keep payload text from forging
//! control tags.

mod escape;
mod lexer;
mod output;
mod problems;
mod tag;

pub use escape::{
    escape_attr, escape_dyad_tags, normalize_response, unescape_attr, LOOKALIKE_GT, LOOKALIKE_LT,
};
pub use lexer::{has_unclosed_write, parse_tags};
pub use output::{
    output_block, tool_call_block, tool_result_block, OutputKind, THINK_CLOSE, THINK_OPEN,
};
pub use problems::{parse_problem_report, Problem, ProblemReport, TagParseError};
pub use tag::{FileEdit, RenameOp, SqlOp, Tag, TagSet};
