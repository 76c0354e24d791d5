use std::path::{Component, Path, PathBuf};

use crate::error::PathError;

/// Resolves a tag path relative to `app_path`, rejecting absolute paths,
/// `..` escapes and anything under `.git`.
pub fn resolve_app_path(app_path: &Path, relative: &str) -> Result<PathBuf, PathError> {
    let relative = normalize_tag_path(relative)?;
    Ok(app_path.join(relative))
}

/// Normalizes separators and validates a tag path without touching the disk.
pub fn normalize_tag_path(raw: &str) -> Result<String, PathError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }

    let unified = trimmed.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) || Path::new(&unified).is_absolute()
    {
        return Err(PathError::Absolute {
            path: raw.to_string(),
        });
    }

    let mut parts = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => {
                if part == ".git" {
                    return Err(PathError::GitDirectory {
                        path: raw.to_string(),
                    });
                }
                parts.push(part.to_string_lossy().into_owned());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(PathError::ParentEscape {
                    path: raw.to_string(),
                })
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::Absolute {
                    path: raw.to_string(),
                })
            }
        }
    }

    if parts.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(parts.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
