use std::path::Path;
use std::process::{Command, Output};

use crate::error::GitError;

/// Version-control operations the apply engine needs.
pub trait VersionControl: Send + Sync {
    /// Stages additions, modifications and deletions of `path`.
    fn stage(&self, repo: &Path, path: &str) -> Result<(), GitError>;

    /// Removes `path` from the index; a path that was never tracked is not an error.
    fn remove(&self, repo: &Path, path: &str) -> Result<(), GitError>;

    fn stage_all(&self, repo: &Path) -> Result<(), GitError>;

    fn has_staged_changes(&self, repo: &Path) -> Result<bool, GitError>;

    /// Commits the index and returns the new commit hash.
    fn commit(&self, repo: &Path, message: &str) -> Result<String, GitError>;

    /// Amends the last commit with the index and returns the new commit hash.
    fn amend(&self, repo: &Path, message: &str) -> Result<String, GitError>;

    /// Paths with staged, unstaged or untracked changes.
    fn uncommitted_paths(&self, repo: &Path) -> Result<Vec<String>, GitError>;
}

/// Directory holding dyad's own state (chat logs) inside an app.
///
/// [`GitCli`] neither reports nor sweeps it into commits.
pub const DYAD_STATE_DIR: &str = ".dyad";

/// [`VersionControl`] backed by the `git` binary on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns true when a usable `git` binary is available.
    #[must_use]
    pub fn is_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn output(&self, repo: &Path, args: &[&str]) -> Result<Output, GitError> {
        Command::new("git")
            .current_dir(repo)
            .args(args)
            .output()
            .map_err(|source| GitError::Spawn {
                command: args.join(" "),
                repo: repo.to_path_buf(),
                source,
            })
    }

    fn run(&self, repo: &Path, args: &[&str]) -> Result<String, GitError> {
        let output = self.output(repo, args)?;
        if !output.status.success() {
            return Err(failed(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn head(&self, repo: &Path) -> Result<String, GitError> {
        Ok(self.run(repo, &["rev-parse", "HEAD"])?.trim().to_string())
    }
}

impl VersionControl for GitCli {
    fn stage(&self, repo: &Path, path: &str) -> Result<(), GitError> {
        self.run(repo, &["add", "-A", "--", path]).map(|_| ())
    }

    fn remove(&self, repo: &Path, path: &str) -> Result<(), GitError> {
        self.run(
            repo,
            &["rm", "-r", "--cached", "--ignore-unmatch", "--quiet", "--", path],
        )
        .map(|_| ())
    }

    fn stage_all(&self, repo: &Path) -> Result<(), GitError> {
        let exclude = format!(":(exclude){DYAD_STATE_DIR}");
        self.run(repo, &["add", "-A", "--", ".", exclude.as_str()]).map(|_| ())
    }

    fn has_staged_changes(&self, repo: &Path) -> Result<bool, GitError> {
        let args = ["diff", "--cached", "--quiet"];
        let output = self.output(repo, &args)?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(failed(&args, &output)),
        }
    }

    fn commit(&self, repo: &Path, message: &str) -> Result<String, GitError> {
        self.run(repo, &["commit", "--quiet", "-m", message])?;
        self.head(repo)
    }

    fn amend(&self, repo: &Path, message: &str) -> Result<String, GitError> {
        self.run(repo, &["commit", "--quiet", "--amend", "-m", message])?;
        self.head(repo)
    }

    fn uncommitted_paths(&self, repo: &Path) -> Result<Vec<String>, GitError> {
        let porcelain = self.run(
            repo,
            &["status", "--porcelain", "-z", "--untracked-files=all"],
        )?;
        Ok(parse_porcelain(&porcelain)
            .into_iter()
            .filter(|path| !is_dyad_state(path))
            .collect())
    }
}

fn failed(args: &[&str], output: &Output) -> GitError {
    GitError::Failed {
        command: args.join(" "),
        status: output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |code| code.to_string()),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

/// Extracts paths from `git status --porcelain -z` (v1) output.
///
/// Entries are NUL-terminated and paths are not quoted. Renames and copies
/// carry the original path as an extra entry, which is skipped.
fn parse_porcelain(porcelain: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut entries = porcelain.split('\0');
    while let Some(entry) = entries.next() {
        let (Some(status), Some(path)) = (entry.get(..3), entry.get(3..)) else {
            continue;
        };
        if path.is_empty() {
            continue;
        }
        if status.starts_with(['R', 'C']) {
            entries.next();
        }
        paths.push(path.to_string());
    }
    paths
}

fn is_dyad_state(path: &str) -> bool {
    path == DYAD_STATE_DIR
        || path
            .strip_prefix(DYAD_STATE_DIR)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn porcelain_paths_include_rename_targets_and_untracked() {
        let porcelain = " M src/App.tsx\0R  new.ts\0old.ts\0?? notes file.md\0?? caf\u{e9}.md\0";
        assert_eq!(
            parse_porcelain(porcelain),
            vec!["src/App.tsx", "new.ts", "notes file.md", "caf\u{e9}.md"]
        );
    }

    #[test]
    fn dyad_state_paths_are_recognized() {
        assert!(is_dyad_state(".dyad"));
        assert!(is_dyad_state(".dyad/chats/chat-1.jsonl"));
        assert!(!is_dyad_state(".dyadrc"));
        assert!(!is_dyad_state("src/.dyad/x.ts"));
    }
}
