//! Lazy directory traversal for backup passes.
//!
//! The enumerator yields one [`FileEntry`] per regular file under the root.
//! Excluded directories are pruned at their first occurrence, so nothing
//! beneath them is ever read.

use crate::config::DEFAULT_EXCLUDED_DIRS;
use crate::utils::errors::Result;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Directory basenames never descended into (exact match)
    pub exclude_dirs: Vec<String>,

    /// Absolute paths left out regardless of name: a directory is pruned
    /// with everything below it, a file is simply not yielded (e.g. a backup
    /// root or state file that happens to live inside the source tree)
    pub skip_paths: Vec<PathBuf>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            exclude_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|d| d.to_string()).collect(),
            skip_paths: Vec::new(),
        }
    }
}

/// A file discovered during a backup pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Full path to the live file
    pub source_path: PathBuf,

    /// Path relative to the tree root
    pub relative_path: PathBuf,
}

impl FileEntry {
    /// Returns None for directories, symlinks to directories and broken symlinks.
    fn from_entry(entry: &DirEntry, root: &Path) -> Option<Self> {
        let file_type = entry.file_type();
        if file_type.is_dir() {
            return None;
        }

        if file_type.is_symlink() {
            // Links are not followed during the walk; a link to a regular file
            // is backed up by content, anything else is skipped.
            match std::fs::metadata(entry.path()) {
                Ok(resolved) if resolved.is_file() => {}
                _ => return None,
            }
        }

        let source_path = entry.path().to_path_buf();
        let relative_path = source_path.strip_prefix(root).ok()?.to_path_buf();

        Some(Self {
            source_path,
            relative_path,
        })
    }
}

type DirEntries = Box<dyn Iterator<Item = walkdir::Result<DirEntry>> + Send>;

/// Finite, non-restartable sequence of files under a root.
///
/// Ordering is whatever the filesystem returns. Unreadable directories are
/// reported as `Err` items and the walk carries on past them.
pub struct TreeEnumerator {
    root: PathBuf,
    inner: DirEntries,
}

impl Iterator for TreeEnumerator {
    type Item = Result<FileEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(entry) => {
                    if let Some(file) = FileEntry::from_entry(&entry, &self.root) {
                        return Some(Ok(file));
                    }
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

/// Start enumerating `root`.
///
/// # Example
/// ```no_run
/// use autobackup_agent::fs::walker::{enumerate, WalkOptions};
/// use std::path::Path;
///
/// for entry in enumerate(Path::new("/srv/app"), WalkOptions::default()) {
///     let entry = entry.unwrap();
///     println!("{}", entry.relative_path.display());
/// }
/// ```
pub fn enumerate(root: &Path, options: WalkOptions) -> TreeEnumerator {
    let WalkOptions {
        exclude_dirs,
        skip_paths,
    } = options;

    let inner = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(move |entry| !should_prune(entry, &exclude_dirs, &skip_paths));

    TreeEnumerator {
        root: root.to_path_buf(),
        inner: Box::new(inner),
    }
}

/// Check whether an entry should be cut from the walk
fn should_prune(entry: &DirEntry, exclude_dirs: &[String], skip_paths: &[PathBuf]) -> bool {
    if entry.depth() == 0 {
        return false;
    }

    if skip_paths.iter().any(|p| p == entry.path()) {
        return true;
    }

    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    exclude_dirs.iter().any(|d| *d == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::TempDir;

    fn relative_paths(root: &Path, options: WalkOptions) -> BTreeSet<PathBuf> {
        enumerate(root, options)
            .map(|e| e.unwrap().relative_path)
            .collect()
    }

    #[test]
    fn test_walk_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        assert!(relative_paths(temp_dir.path(), WalkOptions::default()).is_empty());
    }

    #[test]
    fn test_walk_with_subdirectories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("src/nested"))?;
        fs::write(temp_dir.path().join("app.py"), b"print()")?;
        fs::write(temp_dir.path().join("src/nested/lib.py"), b"x = 1")?;

        let files: Vec<FileEntry> = enumerate(temp_dir.path(), WalkOptions::default())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(files.len(), 2);

        let lib = files
            .iter()
            .find(|f| f.relative_path == Path::new("src/nested/lib.py"))
            .unwrap();
        assert_eq!(lib.source_path, temp_dir.path().join("src/nested/lib.py"));

        Ok(())
    }

    #[test]
    fn test_excluded_directory_is_pruned() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let project = temp_dir.path();

        fs::create_dir_all(project.join(".git/objects"))?;
        fs::write(project.join(".git/config"), b"[core]")?;
        fs::write(project.join(".git/objects/ab"), b"blob")?;
        fs::write(project.join("app.py"), b"print()")?;

        let files = relative_paths(project, WalkOptions::default());
        assert_eq!(files, BTreeSet::from([PathBuf::from("app.py")]));

        Ok(())
    }

    #[test]
    fn test_exclusion_matches_whole_basename() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir_all(temp_dir.path().join("environment"))?;
        fs::create_dir_all(temp_dir.path().join("deep/env"))?;
        fs::write(temp_dir.path().join("environment/keep.txt"), b"1")?;
        fs::write(temp_dir.path().join("deep/env/drop.txt"), b"2")?;

        let files = relative_paths(temp_dir.path(), WalkOptions::default());
        assert_eq!(files, BTreeSet::from([PathBuf::from("environment/keep.txt")]));

        Ok(())
    }

    #[test]
    fn test_excluded_name_as_root_is_walked() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("venv");
        fs::create_dir_all(&root)?;
        fs::write(root.join("a.txt"), b"a")?;

        let files = relative_paths(&root, WalkOptions::default());
        assert_eq!(files.len(), 1);

        Ok(())
    }

    #[test]
    fn test_skip_paths() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let backups = temp_dir.path().join("Mirror_Backups");
        fs::create_dir_all(&backups)?;
        fs::write(backups.join("copy.txt"), b"copy")?;
        fs::write(temp_dir.path().join("live.txt"), b"live")?;

        let options = WalkOptions {
            skip_paths: vec![backups],
            ..WalkOptions::default()
        };
        let files = relative_paths(temp_dir.path(), options);
        assert_eq!(files, BTreeSet::from([PathBuf::from("live.txt")]));

        Ok(())
    }

    #[test]
    fn test_skip_paths_covers_single_files() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir_all(temp_dir.path().join("conf"))?;
        fs::write(temp_dir.path().join("auto_backup.json"), b"{\"enabled\":true}")?;
        fs::write(temp_dir.path().join("conf/auto_backup.json"), b"{}")?;
        fs::write(temp_dir.path().join("live.txt"), b"live")?;

        let options = WalkOptions {
            skip_paths: vec![temp_dir.path().join("auto_backup.json")],
            ..WalkOptions::default()
        };
        let files = relative_paths(temp_dir.path(), options);
        assert_eq!(
            files,
            BTreeSet::from([
                PathBuf::from("conf/auto_backup.json"),
                PathBuf::from("live.txt")
            ])
        );

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks() -> std::io::Result<()> {
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("dir"))?;
        fs::write(root.join("dir/real.txt"), b"real")?;
        symlink(root.join("dir/real.txt"), root.join("file_link.txt"))?;
        symlink(root.join("dir"), root.join("dir_link"))?;
        symlink(root, root.join("dir/cycle"))?;
        symlink(root.join("missing"), root.join("broken"))?;

        let files = relative_paths(root, WalkOptions::default());
        assert_eq!(
            files,
            BTreeSet::from([PathBuf::from("dir/real.txt"), PathBuf::from("file_link.txt")])
        );

        Ok(())
    }
}
