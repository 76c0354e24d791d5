use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::escape::{escape_attr, unescape_attr};

const REPORT_OPEN: &str = "<dyad-problem-report";
const REPORT_CLOSE: &str = "</dyad-problem-report>";

/// One diagnostic produced by a static checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub code: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemReport {
    pub problems: Vec<Problem>,
}

impl ProblemReport {
    #[must_use]
    pub fn new(problems: Vec<Problem>) -> Self {
        Self { problems }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// `"1 problem"` or `"N problems"`.
    #[must_use]
    pub fn summary(&self) -> String {
        match self.problems.len() {
            1 => "1 problem".to_string(),
            count => format!("{count} problems"),
        }
    }

    /// Formats the report as a `dyad-problem-report` block.
    #[must_use]
    pub fn to_block(&self) -> String {
        let mut block = format!("{REPORT_OPEN} summary=\"{}\">\n", self.summary());
        for problem in &self.problems {
            block.push_str(&format!(
                "<problem file=\"{}\" line=\"{}\" column=\"{}\" code=\"{}\">{}</problem>\n",
                escape_attr(&problem.file),
                problem.line,
                problem.column,
                problem.code,
                escape_attr(&problem.message)
            ));
        }
        block.push_str(REPORT_CLOSE);
        block
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagParseError {
    #[error("no dyad-problem-report block found")]
    MissingReport,
    #[error("problem entry is missing the {attribute} attribute")]
    MissingAttribute { attribute: &'static str },
    #[error("problem attribute {attribute} has invalid value {value:?}")]
    InvalidNumber { attribute: &'static str, value: String },
}

/// Parses the first `dyad-problem-report` block found in `text`.
pub fn parse_problem_report(text: &str) -> Result<ProblemReport, TagParseError> {
    let start = text.find(REPORT_OPEN).ok_or(TagParseError::MissingReport)?;
    let body = &text[start..];
    let end = body.find(REPORT_CLOSE).ok_or(TagParseError::MissingReport)?;
    let body = &body[..end];

    let mut problems = Vec::new();
    for captures in problem_regex().captures_iter(body) {
        let attrs: HashMap<&str, &str> = attr_regex()
            .captures_iter(captures.get(1).map_or("", |m| m.as_str()))
            .filter_map(|attr| Some((attr.get(1)?.as_str(), attr.get(2)?.as_str())))
            .collect();
        let message = captures.get(2).map_or("", |m| m.as_str());

        problems.push(Problem {
            file: unescape_attr(required(&attrs, "file")?),
            line: number(&attrs, "line")?,
            column: number(&attrs, "column")?,
            code: number(&attrs, "code")?,
            message: unescape_attr(message),
        });
    }

    Ok(ProblemReport { problems })
}

fn required<'a>(
    attrs: &HashMap<&str, &'a str>,
    attribute: &'static str,
) -> Result<&'a str, TagParseError> {
    attrs
        .get(attribute)
        .copied()
        .ok_or(TagParseError::MissingAttribute { attribute })
}

fn number(attrs: &HashMap<&str, &str>, attribute: &'static str) -> Result<u32, TagParseError> {
    let value = required(attrs, attribute)?;
    value.parse().map_err(|_| TagParseError::InvalidNumber {
        attribute,
        value: value.to_string(),
    })
}

fn problem_regex() -> &'static Regex {
    static PROBLEM: OnceLock<Regex> = OnceLock::new();
    PROBLEM.get_or_init(|| {
        Regex::new(r"(?s)<problem\b([^>]*)>(.*?)</problem>").expect("problem regex must compile")
    })
}

fn attr_regex() -> &'static Regex {
    static ATTR: OnceLock<Regex> = OnceLock::new();
    ATTR.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][\w-]*)="([^"]*)""#).expect("attribute regex must compile")
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn problem(file: &str, line: u32, message: &str) -> Problem {
        Problem {
            file: file.to_string(),
            line,
            column: 7,
            code: 2304,
            message: message.to_string(),
        }
    }

    #[test]
    fn report_round_trips_through_block() {
        let report = ProblemReport::new(vec![
            problem("src/App.tsx", 3, "Cannot find name 'Button'."),
            problem("src/lib/a.ts", 10, "Type '<T>' is not \"assignable\" & wrong."),
        ]);

        let parsed = parse_problem_report(&report.to_block()).expect("report should parse");

        assert_eq!(parsed, report);
    }

    #[test]
    fn summary_pluralizes() {
        assert_eq!(ProblemReport::new(vec![problem("a", 1, "m")]).summary(), "1 problem");
        assert_eq!(ProblemReport::default().summary(), "0 problems");
        assert!(ProblemReport::default()
            .to_block()
            .starts_with("<dyad-problem-report summary=\"0 problems\">"));
    }

    #[test]
    fn parse_reports_missing_block_and_bad_numbers() {
        assert_eq!(
            parse_problem_report("plain text"),
            Err(TagParseError::MissingReport)
        );
        assert_eq!(
            parse_problem_report(
                "<dyad-problem-report summary=\"1 problem\">\n<problem file=\"a\" line=\"x\" column=\"1\" code=\"1\">m</problem>\n</dyad-problem-report>"
            ),
            Err(TagParseError::InvalidNumber {
                attribute: "line",
                value: "x".to_string()
            })
        );
    }
}
