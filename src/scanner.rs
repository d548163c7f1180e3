use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::ScriptRootConfig;

/// A discovered script: its logical name and where it lives on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptFile {
    name: String,
    path: PathBuf,
}

impl ScriptFile {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), path: path.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn scan_root(config: &ScriptRootConfig) -> Vec<ScriptFile> {
    scan(&config.root, config.recursive, &config.suffix)
}

/// Lists every file under `root` whose name ends with `suffix` (ASCII case-insensitive),
/// in lexical order. A missing or unreadable root yields nothing.
pub fn scan(root: &Path, recursive: bool, suffix: &str) -> Vec<ScriptFile> {
    let mut results = Vec::new();
    if !root.is_dir() {
        log::debug!("Script root [{}] does not exist", root.display());
        return results;
    }

    log::info!("Scanning [{}]", root.display());
    let suffix = suffix.to_ascii_lowercase();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(if recursive { usize::MAX } else { 1 })
        .follow_links(true)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::debug!("Skipping unreadable entry under [{}]: {err}", root.display());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };
        let Some(name) = logical_name(file_name, &suffix) else {
            continue;
        };
        log::debug!("Found script-file [{}]", entry.path().display());
        results.push(ScriptFile::new(name, entry.path()));
    }
    results
}

fn logical_name(file_name: &str, lowered_suffix: &str) -> Option<String> {
    let lowered = file_name.to_ascii_lowercase();
    if !lowered.ends_with(lowered_suffix) {
        return None;
    }
    let stem = &file_name[..file_name.len() - lowered_suffix.len()];
    if stem.is_empty() {
        log::warn!("Ignoring script-file [{file_name}] with an empty logical name");
        return None;
    }
    Some(stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, "// script").expect("write script");
    }

    #[test]
    fn missing_root_yields_nothing() {
        let dir = tempdir().expect("temp dir");
        assert!(scan(&dir.path().join("absent"), true, ".tileset.rhai").is_empty());
    }

    #[test]
    fn strips_compound_suffix_case_insensitively() {
        let dir = tempdir().expect("temp dir");
        touch(&dir.path().join("Roads.TileSet.RHAI"));
        touch(&dir.path().join("parks.tileset.rhai"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join(".tileset.rhai"));

        let names: Vec<_> =
            scan(dir.path(), false, ".tileset.rhai").into_iter().map(|f| f.name().to_string()).collect();
        assert_eq!(names, vec!["Roads".to_string(), "parks".to_string()]);
    }

    #[test]
    fn recursion_is_opt_in_and_order_is_stable() {
        let dir = tempdir().expect("temp dir");
        touch(&dir.path().join("b.tileset.rhai"));
        touch(&dir.path().join("a.tileset.rhai"));
        touch(&dir.path().join("nested/c.tileset.rhai"));

        let flat = scan(dir.path(), false, ".tileset.rhai");
        assert_eq!(flat.len(), 2);

        let first = scan(dir.path(), true, ".tileset.rhai");
        let second = scan(dir.path(), true, ".tileset.rhai");
        assert_eq!(first, second);
        let names: Vec<_> = first.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
