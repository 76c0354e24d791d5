//! SEARCH/REPLACE block parsing and application.
//!
//! A block looks like:
//!
//! ```text
//! <<<<<<< SEARCH
//! old lines
//! =======
//! new lines
//! >>>>>>> REPLACE
//! ```
//!
//! Each SEARCH section must locate exactly one region of the current file.
//! Exact text is tried first, then a match that ignores leading and trailing
//! whitespace on every line.

use std::path::Path;

use similar::TextDiff;

use crate::error::SearchReplaceError;
use crate::paths::resolve_app_path;

const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
const DIVIDER_MARKER: &str = "=======";
const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

/// Minimum similarity for a near-miss to be mentioned in a no-match error.
const HINT_THRESHOLD: f32 = 0.6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReplaceBlock {
    pub search: String,
    pub replace: String,
}

/// A search-replace tag that would fail to apply against the current disk state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReplaceIssue {
    pub path: String,
    pub message: String,
}

enum ParseState {
    Outside,
    Search(Vec<String>),
    Replace(Vec<String>, Vec<String>),
}

pub fn parse_blocks(content: &str) -> Result<Vec<SearchReplaceBlock>, SearchReplaceError> {
    let mut blocks = Vec::new();
    let mut state = ParseState::Outside;

    for line in content.lines() {
        let marker = line.trim_end();
        state = match state {
            ParseState::Outside if marker == SEARCH_MARKER => ParseState::Search(Vec::new()),
            ParseState::Outside => ParseState::Outside,
            ParseState::Search(search) if marker == DIVIDER_MARKER => {
                ParseState::Replace(search, Vec::new())
            }
            ParseState::Search(_) if marker == REPLACE_MARKER || marker == SEARCH_MARKER => {
                return Err(SearchReplaceError::Malformed {
                    reason: format!("expected `{DIVIDER_MARKER}` before `{marker}`"),
                })
            }
            ParseState::Search(mut search) => {
                search.push(line.to_string());
                ParseState::Search(search)
            }
            ParseState::Replace(search, replace) if marker == REPLACE_MARKER => {
                blocks.push(SearchReplaceBlock {
                    search: search.join("\n"),
                    replace: replace.join("\n"),
                });
                ParseState::Outside
            }
            ParseState::Replace(_, _) if marker == SEARCH_MARKER => {
                return Err(SearchReplaceError::Malformed {
                    reason: format!("expected `{REPLACE_MARKER}` before the next block"),
                })
            }
            ParseState::Replace(search, mut replace) => {
                replace.push(line.to_string());
                ParseState::Replace(search, replace)
            }
        };
    }

    if !matches!(state, ParseState::Outside) {
        return Err(SearchReplaceError::Malformed {
            reason: "unterminated block".to_string(),
        });
    }
    if blocks.is_empty() {
        return Err(SearchReplaceError::Malformed {
            reason: "no SEARCH/REPLACE blocks found".to_string(),
        });
    }

    Ok(blocks)
}

/// Applies every block in `content` to `original`, in order.
pub fn apply_search_replace(original: &str, content: &str) -> Result<String, SearchReplaceError> {
    let blocks = parse_blocks(content)?;
    let mut current = original.to_string();

    for (index, block) in blocks.iter().enumerate() {
        current = apply_block(&current, block, index + 1)?;
    }

    Ok(current)
}

/// Checks whether a search-replace tag would apply to the file currently on disk.
///
/// Never fails: a missing or unreadable target is reported as an issue.
#[must_use]
pub fn dry_run_search_replace(
    app_path: &Path,
    path: &str,
    content: &str,
) -> Option<SearchReplaceIssue> {
    let issue = |message: String| SearchReplaceIssue {
        path: path.to_string(),
        message,
    };

    let full_path = match resolve_app_path(app_path, path) {
        Ok(full_path) => full_path,
        Err(error) => return Some(issue(error.to_string())),
    };
    if !full_path.is_file() {
        return Some(issue(format!("target file does not exist: {path}")));
    }
    let original = match std::fs::read_to_string(&full_path) {
        Ok(original) => original,
        Err(error) => return Some(issue(format!("failed to read {path}: {error}"))),
    };

    apply_search_replace(&original, content)
        .err()
        .map(|error| issue(error.to_string()))
}

fn apply_block(
    current: &str,
    block: &SearchReplaceBlock,
    number: usize,
) -> Result<String, SearchReplaceError> {
    if block.search.trim().is_empty() {
        return Err(SearchReplaceError::EmptySearch { block: number });
    }

    match current.matches(block.search.as_str()).count() {
        1 => return Ok(current.replacen(block.search.as_str(), &block.replace, 1)),
        0 => {}
        count => {
            return Err(SearchReplaceError::Ambiguous {
                block: number,
                count,
            })
        }
    }

    let lines: Vec<&str> = current.lines().collect();
    let search_lines: Vec<&str> = block.search.lines().collect();
    let starts = trimmed_line_matches(&lines, &search_lines);

    match starts.as_slice() {
        [start] => {
            let mut updated: Vec<&str> = lines[..*start].to_vec();
            updated.extend(block.replace.lines());
            updated.extend(&lines[start + search_lines.len()..]);
            let mut joined = updated.join("\n");
            if current.ends_with('\n') {
                joined.push('\n');
            }
            Ok(joined)
        }
        [] => Err(SearchReplaceError::NoMatch {
            block: number,
            hint: closest_match_hint(&lines, &search_lines),
        }),
        many => Err(SearchReplaceError::Ambiguous {
            block: number,
            count: many.len(),
        }),
    }
}

fn trimmed_line_matches(lines: &[&str], search_lines: &[&str]) -> Vec<usize> {
    if search_lines.is_empty() || search_lines.len() > lines.len() {
        return Vec::new();
    }

    (0..=lines.len() - search_lines.len())
        .filter(|start| {
            lines[*start..start + search_lines.len()]
                .iter()
                .zip(search_lines)
                .all(|(line, search)| line.trim() == search.trim())
        })
        .collect()
}

fn closest_match_hint(lines: &[&str], search_lines: &[&str]) -> Option<String> {
    if lines.is_empty() || search_lines.is_empty() {
        return None;
    }

    let window = search_lines.len().min(lines.len());
    let needle = search_lines.join("\n");
    let (start, ratio) = (0..=lines.len() - window)
        .map(|start| {
            let candidate = lines[start..start + window].join("\n");
            (start, TextDiff::from_chars(needle.as_str(), candidate.as_str()).ratio())
        })
        .max_by(|left, right| left.1.total_cmp(&right.1))?;

    (ratio >= HINT_THRESHOLD).then(|| {
        format!(
            "closest match starts at line {} with {:.0}% similarity",
            start + 1,
            ratio * 100.0
        )
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    fn block(search: &str, replace: &str) -> String {
        format!("{SEARCH_MARKER}\n{search}\n{DIVIDER_MARKER}\n{replace}\n{REPLACE_MARKER}")
    }

    #[test]
    fn exact_match_is_replaced_once() {
        let updated = apply_search_replace(
            "const a = 1;\nconst b = 2;\n",
            &block("const b = 2;", "const b = 3;"),
        )
        .expect("block applies");
        assert_eq!(updated, "const a = 1;\nconst b = 3;\n");
    }

    #[test]
    fn whitespace_insensitive_match_replaces_whole_lines() {
        let updated = apply_search_replace(
            "function f() {\n    return 1;\n}\n",
            &block("\treturn 1;", "    return 2;"),
        )
        .expect("block applies");
        assert_eq!(updated, "function f() {\n    return 2;\n}\n");
    }

    #[test]
    fn blocks_apply_sequentially() {
        let content = format!("{}\n{}", block("a", "b"), block("b\nc", "d"));
        let updated = apply_search_replace("a\nc\n", &content).expect("blocks apply");
        assert_eq!(updated, "d\n");
    }

    #[test]
    fn ambiguous_and_missing_matches_fail() {
        assert_matches!(
            apply_search_replace("x\nx\n", &block("x", "y")),
            Err(SearchReplaceError::Ambiguous { block: 1, count: 2 })
        );
        assert_matches!(
            apply_search_replace("let value = 1;\n", &block("let valu = 1;", "z")),
            Err(SearchReplaceError::NoMatch { block: 1, hint: Some(_) })
        );
        assert_matches!(
            apply_search_replace("a\n", &block("", "z")),
            Err(SearchReplaceError::EmptySearch { block: 1 })
        );
    }

    #[test]
    fn malformed_content_is_rejected() {
        assert_matches!(
            parse_blocks("no markers here"),
            Err(SearchReplaceError::Malformed { .. })
        );
        assert_matches!(
            parse_blocks("<<<<<<< SEARCH\na\n=======\nb\n"),
            Err(SearchReplaceError::Malformed { .. })
        );
    }
}
