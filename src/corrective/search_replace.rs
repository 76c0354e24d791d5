use std::collections::BTreeSet;
use std::path::Path;

use dyad_tags::{output_block, parse_tags, OutputKind, Tag};
use mutation_engine::{dry_run_search_replace, resolve_app_path, SearchReplaceIssue};
use tracing::{info, warn};

use super::prompts::{search_replace_repair_prompt, search_replace_unresolved, search_replace_warning};
use super::{CorrectiveContext, CorrectiveExit, CorrectiveReport, RepairTelemetry};
use crate::stream::{ChunkProcessor, ProcessingMode};

/// Dry-runs the search-replace tags of the response and asks the model to
/// repair the failing ones.
pub(super) fn run(
    context: &CorrectiveContext<'_>,
    processor: &mut ChunkProcessor<'_>,
    report: &mut CorrectiveReport,
) -> Result<(), CorrectiveExit> {
    let mut issues = validate(context.app_path, processor.response()).issues;
    if issues.is_empty() {
        return Ok(());
    }

    let max_attempts = context.max_attempts();
    for attempt in 1..=max_attempts {
        if context.is_cancelled() {
            return Err(CorrectiveExit::Cancelled);
        }

        processor.append_text(&format!(
            "\n\n{}\n\n",
            output_block(OutputKind::Warning, &search_replace_warning(&issues))
        ));
        let segment_start = processor.response().len();
        report.search_replace_rounds += 1;
        context.reinvoke(
            processor,
            Some(search_replace_repair_prompt(attempt, &issues)),
            ProcessingMode::Full,
        )?;

        let segment = processor.response().get(segment_start..).unwrap_or_default();
        issues = carry_unresolved(issues, validate(context.app_path, segment));
        let telemetry = RepairTelemetry {
            attempt,
            success: issues.is_empty(),
            issue_count: issues.len(),
            errors: issues.iter().map(|issue| issue.message.clone()).collect(),
        };
        info!(
            attempt = telemetry.attempt,
            success = telemetry.success,
            issue_count = telemetry.issue_count,
            "search-replace repair attempt"
        );
        report.telemetry.push(telemetry);

        if issues.is_empty() {
            return Ok(());
        }
    }

    warn!(
        issue_count = issues.len(),
        "search-replace issues unresolved after repair attempts"
    );
    processor.append_text(&format!(
        "\n\n{}",
        output_block(
            OutputKind::Warning,
            &search_replace_unresolved(&issues, max_attempts)
        )
    ));
    Ok(())
}

/// Dry-run outcome of the search-replace and write tags in one piece of text.
#[derive(Debug, Default)]
struct Validation {
    issues: Vec<SearchReplaceIssue>,
    /// Paths covered by a passing search-replace or a full write.
    repaired: BTreeSet<String>,
}

/// Checks search-replace tags whose target exists on disk; tags aimed at
/// missing files are left for the apply pass to report.
fn validate(app_path: &Path, text: &str) -> Validation {
    let mut validation = Validation::default();
    for tag in parse_tags(text) {
        match tag {
            Tag::Write { path, .. } => {
                validation.repaired.insert(path);
            }
            Tag::SearchReplace { path, content, .. } => {
                if !resolve_app_path(app_path, &path).is_ok_and(|full_path| full_path.is_file()) {
                    continue;
                }
                match dry_run_search_replace(app_path, &path, &content) {
                    Some(issue) => validation.issues.push(issue),
                    None => {
                        validation.repaired.insert(path);
                    }
                }
            }
            _ => {}
        }
    }
    validation
}

/// Earlier issues stay open until a later segment repairs their path; a new
/// failure on the same path replaces the earlier one.
fn carry_unresolved(
    previous: Vec<SearchReplaceIssue>,
    segment: Validation,
) -> Vec<SearchReplaceIssue> {
    let mut remaining: Vec<SearchReplaceIssue> = previous
        .into_iter()
        .filter(|issue| {
            !segment.repaired.contains(&issue.path)
                && !segment.issues.iter().any(|new| new.path == issue.path)
        })
        .collect();
    remaining.extend(segment.issues);
    remaining
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn search_replace_tag(path: &str, search: &str, replace: &str) -> String {
        format!(
            "<dyad-search-replace path=\"{path}\">\n<<<<<<< SEARCH\n{search}\n=======\n{replace}\n>>>>>>> REPLACE\n</dyad-search-replace>"
        )
    }

    #[test]
    fn validate_skips_missing_targets_and_reports_mismatches() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.ts"), "const a = 1;\n").expect("write");

        let text = [
            search_replace_tag("a.ts", "const a = 1;", "const a = 2;"),
            search_replace_tag("a.ts", "const b = 1;", "const b = 2;"),
            search_replace_tag("missing.ts", "x", "y"),
        ]
        .join("\n");

        let validation = validate(dir.path(), &text);

        assert_eq!(validation.issues.len(), 1);
        assert_eq!(validation.issues[0].path, "a.ts");
        assert!(validation.repaired.contains("a.ts"));
    }

    fn issue(path: &str, message: &str) -> SearchReplaceIssue {
        SearchReplaceIssue {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn prose_only_segment_keeps_earlier_issues() {
        let dir = tempfile::tempdir().expect("tempdir");

        let remaining = carry_unresolved(
            vec![issue("a.ts", "no match")],
            validate(dir.path(), "I double-checked the file and it looks fine."),
        );

        assert_eq!(remaining, vec![issue("a.ts", "no match")]);
    }

    #[test]
    fn write_or_passing_edit_resolves_only_its_own_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.ts"), "const a = 1;\n").expect("write");
        let previous = vec![
            issue("a.ts", "no match"),
            issue("b.ts", "no match"),
            issue("c.ts", "no match"),
        ];
        let segment = [
            search_replace_tag("a.ts", "const a = 1;", "const a = 2;"),
            "<dyad-write path=\"b.ts\">const b = 2;</dyad-write>".to_string(),
        ]
        .join("\n");

        let remaining = carry_unresolved(previous, validate(dir.path(), &segment));

        assert_eq!(remaining, vec![issue("c.ts", "no match")]);
    }

    #[test]
    fn new_failure_replaces_earlier_issue_for_same_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.ts"), "const a = 1;\n").expect("write");

        let remaining = carry_unresolved(
            vec![issue("a.ts", "first failure")],
            validate(
                dir.path(),
                &search_replace_tag("a.ts", "const z = 1;", "const z = 2;"),
            ),
        );

        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].path, "a.ts");
        assert_ne!(remaining[0].message, "first failure");
    }
}
