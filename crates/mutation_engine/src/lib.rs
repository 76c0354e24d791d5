//! Applies `dyad-*` directives from a finalized model response to an app
//! directory under git.
//!
//! The engine owns the only code path that mutates the working tree. The
//! search-replace engine and [`VirtualFileSystem`] are also used before apply
//! time to validate proposed edits without touching disk.

mod adapters;
mod deploy;
mod engine;
mod error;
mod git;
mod paths;
mod search_replace;
mod uploads;
mod vfs;

pub use adapters::{write_numbered_migration, ActionAdapters, NoopAdapters};
pub use deploy::{function_name, DeployAction, DeployPlan};
pub use engine::{commit_message, ApplyContext, MutationEngine, MutationResult};
pub use error::{AdapterError, ApplyError, GitError, PathError, SearchReplaceError};
pub use git::{GitCli, VersionControl, DYAD_STATE_DIR};
pub use paths::{normalize_tag_path, resolve_app_path};
pub use search_replace::{
    apply_search_replace, dry_run_search_replace, parse_blocks, SearchReplaceBlock,
    SearchReplaceIssue,
};
pub use uploads::{FileUploads, UploadedFile};
pub use vfs::VirtualFileSystem;
