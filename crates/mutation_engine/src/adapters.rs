use std::path::Path;

use crate::error::AdapterError;

const MIGRATIONS_DIR: &str = "supabase/migrations";

/// Side effects the apply engine delegates to external systems.
///
/// Each call is made at most once per target per apply pass, except for
/// [`ActionAdapters::deploy_all_functions`], which replaces per-function
/// deploys when shared code changed.
pub trait ActionAdapters: Send + Sync {
    fn install_dependencies(&self, packages: &[String], app_path: &Path)
        -> Result<(), AdapterError>;

    fn execute_sql(&self, project_id: &str, sql: &str) -> Result<(), AdapterError>;

    fn deploy_function(
        &self,
        project_id: &str,
        app_path: &Path,
        function_name: &str,
    ) -> Result<(), AdapterError>;

    fn delete_function(&self, project_id: &str, function_name: &str) -> Result<(), AdapterError>;

    fn deploy_all_functions(&self, project_id: &str, app_path: &Path) -> Result<(), AdapterError>;

    /// Records executed SQL as a numbered migration file and returns its
    /// app-relative path.
    fn write_migration_file(
        &self,
        app_path: &Path,
        sql: &str,
        description: Option<&str>,
    ) -> Result<String, AdapterError> {
        write_numbered_migration(app_path, sql, description)
    }
}

/// Adapters for apps with no external integrations; every action succeeds
/// without doing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAdapters;

impl ActionAdapters for NoopAdapters {
    fn install_dependencies(&self, _: &[String], _: &Path) -> Result<(), AdapterError> {
        Ok(())
    }

    fn execute_sql(&self, _: &str, _: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    fn deploy_function(&self, _: &str, _: &Path, _: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    fn delete_function(&self, _: &str, _: &str) -> Result<(), AdapterError> {
        Ok(())
    }

    fn deploy_all_functions(&self, _: &str, _: &Path) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// Writes `supabase/migrations/NNNN_<slug>.sql`, numbering after existing files.
pub fn write_numbered_migration(
    app_path: &Path,
    sql: &str,
    description: Option<&str>,
) -> Result<String, AdapterError> {
    let dir = app_path.join(MIGRATIONS_DIR);
    std::fs::create_dir_all(&dir).map_err(|source| AdapterError::Io {
        operation: "creating migrations directory",
        path: dir.clone(),
        source,
    })?;

    let entries = std::fs::read_dir(&dir).map_err(|source| AdapterError::Io {
        operation: "listing migrations",
        path: dir.clone(),
        source,
    })?;
    let next = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let (number, _) = name.split_once('_')?;
            number.parse::<u32>().ok()
        })
        .max()
        .map_or(0, |highest| highest + 1);

    let file_name = format!("{next:04}_{}.sql", slugify(description.unwrap_or("migration")));
    let path = dir.join(&file_name);
    std::fs::write(&path, format!("{}\n", sql.trim_end())).map_err(|source| AdapterError::Io {
        operation: "writing migration",
        path: path.clone(),
        source,
    })?;

    Ok(format!("{MIGRATIONS_DIR}/{file_name}"))
}

fn slugify(description: &str) -> String {
    let mut slug = String::new();
    for ch in description.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    let slug = slug.trim_end_matches('_');
    if slug.is_empty() {
        "migration".to_string()
    } else {
        slug.chars().take(48).collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn migrations_are_numbered_sequentially() {
        let dir = tempdir().expect("tempdir");

        let first = NoopAdapters
            .write_migration_file(dir.path(), "create table a();", Some("Create table A!"))
            .expect("first migration");
        let second = NoopAdapters
            .write_migration_file(dir.path(), "drop table a;", None)
            .expect("second migration");

        assert_eq!(first, "supabase/migrations/0000_create_table_a.sql");
        assert_eq!(second, "supabase/migrations/0001_migration.sql");
        assert_eq!(
            std::fs::read_to_string(dir.path().join(&first)).expect("read"),
            "create table a();\n"
        );
    }
}
