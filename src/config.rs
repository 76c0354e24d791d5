//! Pipeline configuration: defaults, optional JSON file, environment overrides.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "DYAD_CONFIG_PATH";
pub const AUTO_FIX_ENV: &str = "DYAD_AUTO_FIX";
pub const TURBO_EDITS_V2_ENV: &str = "DYAD_TURBO_EDITS_V2";
pub const MIGRATION_FILES_ENV: &str = "DYAD_MIGRATION_FILES";
pub const SYSTEM_INSTRUCTIONS_ENV: &str = "DYAD_SYSTEM_INSTRUCTIONS";

pub const DEFAULT_PERSIST_THROTTLE_MS: u64 = 150;
/// Re-invocations allowed per corrective loop.
pub const MAX_CORRECTIVE_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub auto_fix_problems: bool,
    pub turbo_edits_v2: bool,
    pub enable_migration_files: bool,
    pub persist_throttle_ms: u64,
    /// Lowers the per-loop re-invocation cap; values above
    /// [`MAX_CORRECTIVE_ATTEMPTS`] are clamped.
    pub max_corrective_attempts: u32,
    pub system_instructions: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_fix_problems: false,
            turbo_edits_v2: false,
            enable_migration_files: false,
            persist_throttle_ms: DEFAULT_PERSIST_THROTTLE_MS,
            max_corrective_attempts: MAX_CORRECTIVE_ATTEMPTS,
            system_instructions: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error while reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineConfig {
    /// Defaults, then `DYAD_CONFIG_PATH` if set, then environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match env_string_opt(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies overrides read through `lookup`; flags accept `1` or `true`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(AUTO_FIX_ENV) {
            self.auto_fix_problems = is_truthy(&value);
        }
        if let Some(value) = lookup(TURBO_EDITS_V2_ENV) {
            self.turbo_edits_v2 = is_truthy(&value);
        }
        if let Some(value) = lookup(MIGRATION_FILES_ENV) {
            self.enable_migration_files = is_truthy(&value);
        }
        if let Some(value) = lookup(SYSTEM_INSTRUCTIONS_ENV).filter(|value| !value.trim().is_empty())
        {
            self.system_instructions = Some(value);
        }
    }

    #[must_use]
    pub fn persist_throttle(&self) -> Duration {
        Duration::from_millis(self.persist_throttle_ms)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True")
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert!(!config.auto_fix_problems);
        assert!(!config.turbo_edits_v2);
        assert_eq!(config.persist_throttle(), Duration::from_millis(150));
        assert_eq!(config.max_corrective_attempts, 2);
    }

    #[test]
    fn env_flags_set_to_one_or_true_enable() {
        let mut config = PipelineConfig::default();
        config.apply_env_overrides(lookup_from(&[
            (AUTO_FIX_ENV, "1"),
            (TURBO_EDITS_V2_ENV, "true"),
            (MIGRATION_FILES_ENV, "0"),
            (SYSTEM_INSTRUCTIONS_ENV, "Be terse."),
        ]));

        assert!(config.auto_fix_problems);
        assert!(config.turbo_edits_v2);
        assert!(!config.enable_migration_files);
        assert_eq!(config.system_instructions.as_deref(), Some("Be terse."));
    }

    #[test]
    fn empty_system_instructions_are_ignored() {
        let mut config = PipelineConfig::default();
        config.apply_env_overrides(lookup_from(&[(SYSTEM_INSTRUCTIONS_ENV, "  ")]));
        assert_eq!(config.system_instructions, None);
    }

    #[test]
    fn file_values_fill_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "auto_fix_problems": true, "persist_throttle_ms": 10 }"#)
            .expect("write config");

        let config = PipelineConfig::from_file(&path).expect("config parses");

        assert!(config.auto_fix_problems);
        assert_eq!(config.persist_throttle_ms, 10);
        assert_eq!(config.max_corrective_attempts, 2);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "auto_fix": true }"#).expect("write config");

        assert_matches!(
            PipelineConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        );
    }
}
