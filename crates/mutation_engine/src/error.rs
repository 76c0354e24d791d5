use std::path::PathBuf;

use thiserror::Error;

/// Unrecoverable failure of an apply pass. Per-tag problems are reported in
/// [`crate::MutationResult`] instead.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Git(#[from] GitError),
}

impl ApplyError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("absolute paths are not allowed: {path}")]
    Absolute { path: String },
    #[error("path escapes the app directory: {path}")]
    ParentEscape { path: String },
    #[error("paths inside .git are not allowed: {path}")]
    GitDirectory { path: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchReplaceError {
    #[error("malformed search-replace content: {reason}")]
    Malformed { reason: String },

    #[error("block {block} has an empty SEARCH section")]
    EmptySearch { block: usize },

    #[error("block {block}: SEARCH text not found in file{}", hint_suffix(.hint))]
    NoMatch { block: usize, hint: Option<String> },

    #[error("block {block}: SEARCH text matches {count} locations; it must be unique")]
    Ambiguous { block: usize, count: usize },
}

fn hint_suffix(hint: &Option<String>) -> String {
    hint.as_deref()
        .map(|hint| format!(" ({hint})"))
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run `git {command}` in {repo}: {source}")]
    Spawn {
        command: String,
        repo: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`git {command}` failed with status {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{action} failed: {message}")]
    Failed {
        action: &'static str,
        message: String,
    },

    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AdapterError {
    #[must_use]
    pub fn failed(action: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            action,
            message: message.into(),
        }
    }
}
