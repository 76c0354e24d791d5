use std::collections::BTreeMap;
use std::path::PathBuf;

use dyad_tags::TagSet;

use crate::paths::normalize_tag_path;
use crate::search_replace::apply_search_replace;

/// In-memory overlay of proposed file changes on top of an app directory.
///
/// Tags are applied in the same order the apply engine uses, but nothing is
/// written to disk. Reads fall through to the real file when the overlay has
/// no entry for a path.
#[derive(Debug, Clone)]
pub struct VirtualFileSystem {
    root: PathBuf,
    /// `None` marks a deleted path.
    overlay: BTreeMap<String, Option<String>>,
}

impl VirtualFileSystem {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            overlay: BTreeMap::new(),
        }
    }

    /// Builds an overlay from `tags`; returns the overlay and any tag that
    /// could not be applied.
    #[must_use]
    pub fn from_tags(root: impl Into<PathBuf>, tags: &TagSet) -> (Self, Vec<String>) {
        let mut vfs = Self::new(root);
        let errors = vfs.apply_tags(tags);
        (vfs, errors)
    }

    pub fn apply_tags(&mut self, tags: &TagSet) -> Vec<String> {
        let mut errors = Vec::new();

        for path in &tags.deletes {
            if let Err(error) = self.delete(path) {
                errors.push(error);
            }
        }
        for rename in &tags.renames {
            if let Err(error) = self.rename(&rename.from, &rename.to) {
                errors.push(error);
            }
        }
        for edit in &tags.search_replaces {
            let result = self
                .read(&edit.path)
                .ok_or_else(|| format!("search-replace target does not exist: {}", edit.path))
                .and_then(|original| {
                    apply_search_replace(&original, &edit.content).map_err(|error| error.to_string())
                });
            match result {
                Ok(updated) => {
                    if let Err(error) = self.write(&edit.path, updated) {
                        errors.push(error);
                    }
                }
                Err(error) => errors.push(format!("{}: {error}", edit.path)),
            }
        }
        for edit in &tags.writes {
            if let Err(error) = self.write(&edit.path, edit.content.clone()) {
                errors.push(error);
            }
        }

        errors
    }

    pub fn write(&mut self, path: &str, content: String) -> Result<(), String> {
        let key = key(path)?;
        self.overlay.insert(key, Some(content));
        Ok(())
    }

    pub fn delete(&mut self, path: &str) -> Result<(), String> {
        let key = key(path)?;
        let children: Vec<String> = self
            .overlay
            .keys()
            .filter(|existing| is_under(existing, &key))
            .cloned()
            .collect();
        for child in children {
            self.overlay.insert(child, None);
        }
        self.overlay.insert(key, None);
        Ok(())
    }

    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), String> {
        let from_key = key(from)?;
        let to_key = key(to)?;

        if let Some(content) = self.read(&from_key) {
            self.overlay.insert(from_key, None);
            self.overlay.insert(to_key, Some(content));
            return Ok(());
        }

        let moved: Vec<(String, String, String)> = self
            .files_under(&from_key)
            .into_iter()
            .filter_map(|file| {
                let content = self.read(&file)?;
                let target = format!("{to_key}{}", &file[from_key.len()..]);
                Some((file, target, content))
            })
            .collect();

        if moved.is_empty() {
            return Err(format!("rename source does not exist: {from}"));
        }
        for (source, target, content) in moved {
            self.overlay.insert(source, None);
            self.overlay.insert(target, Some(content));
        }
        self.overlay.insert(from_key, None);
        Ok(())
    }

    /// Current content of `path`, consulting the overlay before the disk.
    #[must_use]
    pub fn read(&self, path: &str) -> Option<String> {
        let key = key(path).ok()?;
        if let Some(entry) = self.overlay.get(&key) {
            return entry.clone();
        }
        if self.deleted_ancestor(&key) {
            return None;
        }
        std::fs::read_to_string(self.root.join(&key)).ok()
    }

    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.read(path).is_some()
    }

    fn deleted_ancestor(&self, key: &str) -> bool {
        self.overlay
            .iter()
            .any(|(path, content)| content.is_none() && is_under(key, path))
    }

    fn files_under(&self, dir: &str) -> Vec<String> {
        let mut files: Vec<String> = self
            .overlay
            .iter()
            .filter(|(path, content)| content.is_some() && is_under(path, dir))
            .map(|(path, _)| path.clone())
            .collect();

        let mut pending = vec![self.root.join(dir)];
        while let Some(current) = pending.pop() {
            let Ok(entries) = std::fs::read_dir(&current) else {
                continue;
            };
            for entry in entries.flatten() {
                let entry_path = entry.path();
                if entry_path.is_dir() {
                    pending.push(entry_path);
                } else if let Ok(relative) = entry_path.strip_prefix(&self.root) {
                    let relative = relative.to_string_lossy().replace('\\', "/");
                    if !files.contains(&relative) && !self.overlay.contains_key(&relative) {
                        files.push(relative);
                    }
                }
            }
        }

        files
    }
}

fn key(path: &str) -> Result<String, String> {
    normalize_tag_path(path).map_err(|error| error.to_string())
}

fn is_under(path: &str, dir: &str) -> bool {
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

#[cfg(test)]
mod tests {
    use dyad_tags::{FileEdit, RenameOp};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn overlay_shadows_disk_without_touching_it() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("src")).expect("mkdir");
        std::fs::write(dir.path().join("src/a.ts"), "disk").expect("seed");

        let mut vfs = VirtualFileSystem::new(dir.path());
        vfs.write("src/a.ts", "overlay".to_string()).expect("write");

        assert_eq!(vfs.read("src/a.ts").as_deref(), Some("overlay"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/a.ts")).expect("read"),
            "disk"
        );
    }

    #[test]
    fn tags_apply_in_engine_order() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("old.ts"), "const x = 1;\n").expect("seed");

        let tags = TagSet {
            deletes: vec!["gone.ts".to_string()],
            renames: vec![RenameOp {
                from: "old.ts".to_string(),
                to: "new.ts".to_string(),
            }],
            search_replaces: vec![FileEdit {
                path: "new.ts".to_string(),
                content: "<<<<<<< SEARCH\nconst x = 1;\n=======\nconst x = 2;\n>>>>>>> REPLACE"
                    .to_string(),
            }],
            writes: vec![FileEdit {
                path: "gone.ts".to_string(),
                content: "back".to_string(),
            }],
            ..TagSet::default()
        };

        let (vfs, errors) = VirtualFileSystem::from_tags(dir.path(), &tags);

        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert_eq!(vfs.read("old.ts"), None);
        assert_eq!(vfs.read("new.ts").as_deref(), Some("const x = 2;\n"));
        assert_eq!(vfs.read("gone.ts").as_deref(), Some("back"));
    }

    #[test]
    fn deleting_directory_hides_disk_children() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("lib")).expect("mkdir");
        std::fs::write(dir.path().join("lib/util.ts"), "x").expect("seed");

        let mut vfs = VirtualFileSystem::new(dir.path());
        vfs.delete("lib").expect("delete");

        assert!(!vfs.exists("lib/util.ts"));
    }

    #[test]
    fn renaming_directory_moves_files() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("a/b")).expect("mkdir");
        std::fs::write(dir.path().join("a/b/c.ts"), "c").expect("seed");

        let mut vfs = VirtualFileSystem::new(dir.path());
        vfs.rename("a", "z").expect("rename");

        assert_eq!(vfs.read("z/b/c.ts").as_deref(), Some("c"));
        assert!(!vfs.exists("a/b/c.ts"));
    }
}
