use std::path::Path;
use std::sync::Arc;

use dyad_tags::{parse_tags, TagSet};
use tracing::{info, warn};

use crate::adapters::ActionAdapters;
use crate::deploy::{function_name, DeployAction, DeployPlan};
use crate::error::ApplyError;
use crate::git::VersionControl;
use crate::paths::{normalize_tag_path, resolve_app_path};
use crate::search_replace::apply_search_replace;
use crate::uploads::FileUploads;

const DEFAULT_SUMMARY: &str = "changes";
const AMEND_SUFFIX: &str = " + extra files edited outside of dyad";
const MANIFEST_FILES: [&str; 5] = [
    "package.json",
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "bun.lockb",
];

/// Per-pass inputs for [`MutationEngine::apply`].
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext<'a> {
    pub app_path: &'a Path,
    pub uploads: &'a FileUploads,
    pub supabase_project_id: Option<&'a str>,
    pub write_migration_files: bool,
}

impl<'a> ApplyContext<'a> {
    #[must_use]
    pub fn new(app_path: &'a Path, uploads: &'a FileUploads) -> Self {
        Self {
            app_path,
            uploads,
            supabase_project_id: None,
            write_migration_files: false,
        }
    }
}

/// Outcome of one apply pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationResult {
    pub written_paths: Vec<String>,
    pub renamed_paths: Vec<String>,
    pub deleted_paths: Vec<String>,
    pub added_packages: Vec<String>,
    pub executed_sql_count: usize,
    pub commit_hash: Option<String>,
    pub commit_message: Option<String>,
    /// Paths changed outside the pass and folded into the commit by amending.
    pub uncommitted_paths: Vec<String>,
    pub extra_files_error: Option<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl MutationResult {
    #[must_use]
    pub fn updated_files(&self) -> bool {
        !(self.written_paths.is_empty()
            && self.renamed_paths.is_empty()
            && self.deleted_paths.is_empty())
    }

    fn push_written(&mut self, path: String) {
        if !self.written_paths.contains(&path) {
            self.written_paths.push(path);
        }
    }
}

/// Applies the directives of a finalized response to an app directory and
/// records the result in one commit.
pub struct MutationEngine {
    vcs: Arc<dyn VersionControl>,
    adapters: Arc<dyn ActionAdapters>,
}

impl MutationEngine {
    #[must_use]
    pub fn new(vcs: Arc<dyn VersionControl>, adapters: Arc<dyn ActionAdapters>) -> Self {
        Self { vcs, adapters }
    }

    /// Applies tags in order: SQL, deletes, renames, search-replace edits,
    /// writes, dependency installs, then function deploys and the commit.
    ///
    /// Per-tag failures are collected as warnings or errors on the result and
    /// never roll back earlier steps. Filesystem failures and a failing
    /// commit abort the pass.
    pub fn apply(
        &self,
        response: &str,
        context: &ApplyContext<'_>,
    ) -> Result<MutationResult, ApplyError> {
        let tags = TagSet::from_tags(&parse_tags(response));
        let mut result = MutationResult::default();
        let mut deploys = DeployPlan::new();
        let app_path = context.app_path;

        self.execute_sql(&tags, context, &mut result);

        for raw in &tags.deletes {
            let Some((path, full_path)) = resolve(app_path, raw, &mut result) else {
                continue;
            };
            if !full_path.exists() {
                result
                    .warnings
                    .push(format!("File to delete does not exist: {path}"));
                continue;
            }
            if full_path.is_dir() {
                std::fs::remove_dir_all(&full_path)
                    .map_err(|source| ApplyError::io("deleting directory", &full_path, source))?;
            } else {
                std::fs::remove_file(&full_path)
                    .map_err(|source| ApplyError::io("deleting file", &full_path, source))?;
            }
            self.vcs.remove(app_path, &path)?;
            deploys.record_deleted(&path);
            result.deleted_paths.push(path);
        }

        for rename in &tags.renames {
            let Some((from, from_path)) = resolve(app_path, &rename.from, &mut result) else {
                continue;
            };
            let Some((to, to_path)) = resolve(app_path, &rename.to, &mut result) else {
                continue;
            };
            if !from_path.exists() {
                result
                    .warnings
                    .push(format!("File to rename does not exist: {from}"));
                continue;
            }
            create_parent(&to_path)?;
            std::fs::rename(&from_path, &to_path)
                .map_err(|source| ApplyError::io("renaming", &from_path, source))?;
            self.vcs.remove(app_path, &from)?;
            self.vcs.stage(app_path, &to)?;

            if function_name(&from) != function_name(&to) {
                deploys.record_deleted(&from);
            }
            deploys.record_touched(&to);
            result.renamed_paths.push(to);
        }

        for edit in &tags.search_replaces {
            let Some((path, full_path)) = resolve(app_path, &edit.path, &mut result) else {
                continue;
            };
            if !full_path.is_file() {
                result
                    .errors
                    .push(format!("Search-replace target does not exist: {path}"));
                continue;
            }
            let original = std::fs::read_to_string(&full_path)
                .map_err(|source| ApplyError::io("reading search-replace target", &full_path, source))?;
            match apply_search_replace(&original, &edit.content) {
                Ok(updated) => {
                    std::fs::write(&full_path, updated)
                        .map_err(|source| ApplyError::io("writing file", &full_path, source))?;
                    self.vcs.stage(app_path, &path)?;
                    deploys.record_touched(&path);
                    result.push_written(path);
                }
                Err(error) => {
                    warn!(path = %path, error = %error, "search-replace failed to apply");
                    result
                        .errors
                        .push(format!("Failed to apply search-replace to {path}: {error}"));
                }
            }
        }

        for edit in &tags.writes {
            let Some((path, full_path)) = resolve(app_path, &edit.path, &mut result) else {
                continue;
            };
            let bytes = match context.uploads.get(&edit.content) {
                Some(upload) => upload.bytes.clone(),
                None => edit.content.as_bytes().to_vec(),
            };
            create_parent(&full_path)?;
            std::fs::write(&full_path, bytes)
                .map_err(|source| ApplyError::io("writing file", &full_path, source))?;
            self.vcs.stage(app_path, &path)?;
            deploys.record_touched(&path);
            result.push_written(path);
        }

        self.install_dependencies(&tags, context, &mut result)?;
        self.run_deploys(&deploys, context, &mut result);
        self.commit(&tags, app_path, &mut result)?;

        info!(
            app_path = %app_path.display(),
            written = result.written_paths.len(),
            renamed = result.renamed_paths.len(),
            deleted = result.deleted_paths.len(),
            warnings = result.warnings.len(),
            errors = result.errors.len(),
            commit = result.commit_hash.as_deref().unwrap_or("none"),
            "applied response changes"
        );

        Ok(result)
    }

    fn execute_sql(&self, tags: &TagSet, context: &ApplyContext<'_>, result: &mut MutationResult) {
        for query in &tags.sql {
            let Some(project_id) = context.supabase_project_id else {
                result.errors.push(
                    "Cannot execute SQL: no Supabase project is linked to this app".to_string(),
                );
                continue;
            };

            if let Err(error) = self.adapters.execute_sql(project_id, &query.content) {
                result.errors.push(format!("Failed to execute SQL: {error}"));
                continue;
            }
            result.executed_sql_count += 1;

            if context.write_migration_files {
                match self.adapters.write_migration_file(
                    context.app_path,
                    &query.content,
                    query.description.as_deref(),
                ) {
                    Ok(path) => match normalize_tag_path(&path) {
                        Ok(path) => {
                            if let Err(error) = self.vcs.stage(context.app_path, &path) {
                                result
                                    .errors
                                    .push(format!("Failed to stage migration {path}: {error}"));
                            }
                            result.push_written(path);
                        }
                        Err(error) => result.errors.push(error.to_string()),
                    },
                    Err(error) => result
                        .warnings
                        .push(format!("Failed to write migration file: {error}")),
                }
            }
        }
    }

    fn install_dependencies(
        &self,
        tags: &TagSet,
        context: &ApplyContext<'_>,
        result: &mut MutationResult,
    ) -> Result<(), ApplyError> {
        if tags.dependencies.is_empty() {
            return Ok(());
        }

        if let Err(error) = self
            .adapters
            .install_dependencies(&tags.dependencies, context.app_path)
        {
            result.errors.push(format!(
                "Failed to add dependencies {}: {error}",
                tags.dependencies.join(", ")
            ));
            return Ok(());
        }

        result.added_packages = tags.dependencies.clone();
        for manifest in MANIFEST_FILES {
            if context.app_path.join(manifest).is_file() {
                self.vcs.stage(context.app_path, manifest)?;
                result.push_written(manifest.to_string());
            }
        }
        Ok(())
    }

    fn run_deploys(&self, plan: &DeployPlan, context: &ApplyContext<'_>, result: &mut MutationResult) {
        let Some(project_id) = context.supabase_project_id else {
            return;
        };

        for action in plan.actions() {
            let outcome = match &action {
                DeployAction::DeleteFunction(name) => self
                    .adapters
                    .delete_function(project_id, name)
                    .map_err(|error| format!("Failed to delete function {name}: {error}")),
                DeployAction::DeployFunction(name) => self
                    .adapters
                    .deploy_function(project_id, context.app_path, name)
                    .map_err(|error| format!("Failed to deploy function {name}: {error}")),
                DeployAction::DeployAll => self
                    .adapters
                    .deploy_all_functions(project_id, context.app_path)
                    .map_err(|error| format!("Failed to redeploy functions: {error}")),
            };
            if let Err(message) = outcome {
                result.errors.push(message);
            }
        }
    }

    fn commit(
        &self,
        tags: &TagSet,
        app_path: &Path,
        result: &mut MutationResult,
    ) -> Result<(), ApplyError> {
        if !self.vcs.has_staged_changes(app_path)? {
            return Ok(());
        }

        let message = commit_message(tags.chat_summary.as_deref(), result);
        let hash = self.vcs.commit(app_path, &message)?;
        result.commit_hash = Some(hash);

        let uncommitted = match self.vcs.uncommitted_paths(app_path) {
            Ok(paths) => paths,
            Err(error) => {
                warn!(error = %error, "failed to list files edited outside the response");
                result.extra_files_error = Some(error.to_string());
                result.commit_message = Some(message);
                return Ok(());
            }
        };

        if uncommitted.is_empty() {
            result.commit_message = Some(message);
            return Ok(());
        }

        let amended_message = format!("{message}{AMEND_SUFFIX}");
        let amended = self
            .vcs
            .stage_all(app_path)
            .and_then(|()| self.vcs.amend(app_path, &amended_message));
        match amended {
            Ok(hash) => {
                result.commit_hash = Some(hash);
                result.commit_message = Some(amended_message);
            }
            Err(error) => {
                warn!(error = %error, "failed to amend commit with extra files");
                result.extra_files_error = Some(error.to_string());
                result.commit_message = Some(message);
            }
        }
        result.uncommitted_paths = uncommitted;
        Ok(())
    }
}

fn resolve(
    app_path: &Path,
    raw: &str,
    result: &mut MutationResult,
) -> Option<(String, std::path::PathBuf)> {
    match normalize_tag_path(raw).and_then(|path| {
        let full_path = resolve_app_path(app_path, &path)?;
        Ok((path, full_path))
    }) {
        Ok(resolved) => Some(resolved),
        Err(error) => {
            result.errors.push(format!("Rejected path {raw:?}: {error}"));
            None
        }
    }
}

fn create_parent(path: &Path) -> Result<(), ApplyError> {
    match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent)
            .map_err(|source| ApplyError::io("creating parent directory", parent, source)),
        None => Ok(()),
    }
}

/// `[dyad] <summary> - wrote N file(s), ...` listing only non-zero parts.
#[must_use]
pub fn commit_message(summary: Option<&str>, result: &MutationResult) -> String {
    let summary = summary
        .map(str::trim)
        .filter(|summary| !summary.is_empty())
        .unwrap_or(DEFAULT_SUMMARY);

    let mut parts = Vec::new();
    if !result.written_paths.is_empty() {
        parts.push(format!("wrote {} file(s)", result.written_paths.len()));
    }
    if !result.renamed_paths.is_empty() {
        parts.push(format!("renamed {} file(s)", result.renamed_paths.len()));
    }
    if !result.deleted_paths.is_empty() {
        parts.push(format!("deleted {} file(s)", result.deleted_paths.len()));
    }
    if !result.added_packages.is_empty() {
        parts.push(format!(
            "added {} package(s)",
            result.added_packages.join(", ")
        ));
    }
    if result.executed_sql_count > 0 {
        parts.push(format!(
            "executed {} SQL queries",
            result.executed_sql_count
        ));
    }

    if parts.is_empty() {
        format!("[dyad] {summary}")
    } else {
        format!("[dyad] {summary} - {}", parts.join(", "))
    }
}
