//! Instruction text sent to the model by the corrective loops.

use dyad_tags::ProblemReport;
use mutation_engine::SearchReplaceIssue;

/// Default system instructions describing the tag grammar.
pub const DEFAULT_SYSTEM_INSTRUCTIONS: &str = "\
You are an AI pair programmer editing a web application. Describe every change with tags:
- <dyad-write path=\"src/file.tsx\" description=\"...\">full file contents</dyad-write>
- <dyad-search-replace path=\"src/file.tsx\">SEARCH/REPLACE blocks</dyad-search-replace>
- <dyad-rename from=\"old/path\" to=\"new/path\"></dyad-rename>
- <dyad-delete path=\"src/file.tsx\"></dyad-delete>
- <dyad-add-dependency packages=\"pkg-a pkg-b\"></dyad-add-dependency>
- <dyad-execute-sql description=\"...\">SQL</dyad-execute-sql>
- <dyad-chat-summary>short summary of the change</dyad-chat-summary>
Always close every tag you open.";

#[must_use]
pub fn format_issues(issues: &[SearchReplaceIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("- {}: {}", issue.path, issue.message))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Warning shown to the user before a repair attempt.
#[must_use]
pub fn search_replace_warning(issues: &[SearchReplaceIssue]) -> String {
    let paths = issues
        .iter()
        .map(|issue| issue.path.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{} search-replace edit(s) could not be applied ({paths}). Retrying.",
        issues.len()
    )
}

#[must_use]
pub fn search_replace_unresolved(issues: &[SearchReplaceIssue], attempts: u32) -> String {
    format!(
        "Search-replace edits still failed after {attempts} attempt(s):\n{}",
        format_issues(issues)
    )
}

/// Repair instruction; the second attempt asks for full file writes instead.
#[must_use]
pub fn search_replace_repair_prompt(attempt: u32, issues: &[SearchReplaceIssue]) -> String {
    let instruction = if attempt <= 1 {
        "There was an issue with the following `dyad-search-replace` tags. \
Re-read the latest version of each file and try the search and replace again, \
making sure every SEARCH section matches the file exactly."
    } else {
        "There was still an issue with the following `dyad-search-replace` tags. \
Do not use search and replace again. Write the complete updated contents of each \
file with a `dyad-write` tag instead."
    };
    format!("{instruction}\n\n{}", format_issues(issues))
}

#[must_use]
pub fn auto_fix_prompt(report: &ProblemReport) -> String {
    let mut prompt = format!(
        "Fix these {} TypeScript compile-time error(s):\n",
        report.problems.len()
    );
    for (index, problem) in report.problems.iter().enumerate() {
        prompt.push_str(&format!(
            "\n{}. {}:{}:{} - {} (TS{})",
            index + 1,
            problem.file,
            problem.line,
            problem.column,
            problem.message,
            problem.code
        ));
    }
    prompt.push_str("\n\nPlease fix all errors in a concise way.");
    prompt
}

#[must_use]
pub fn auto_fix_unresolved(report: &ProblemReport, attempts: u32) -> String {
    let mut message = format!(
        "{} remained after {attempts} auto-fix attempt(s):",
        report.summary()
    );
    for problem in &report.problems {
        message.push_str(&format!(
            "\n- {}:{}:{} - {}",
            problem.file, problem.line, problem.column, problem.message
        ));
    }
    message
}
