//! Crash-safe whole-file writes.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Write `data` to a temp file next to `target`, fsync it, then rename over
/// `target`. Readers see either the old content or the new, never a mix.
pub fn atomic_write(target: &Path, data: &[u8]) -> io::Result<()> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let temp_path = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));

    let written = (|| {
        let mut temp_file = fs::File::create(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        fs::rename(&temp_path, target)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    // Fsync parent directory so the rename survives a crash
    if let Ok(dir_handle) = fs::File::open(dir) {
        let _ = dir_handle.sync_all();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_replaces_content() -> io::Result<()> {
        let dir = TempDir::new()?;
        let target = dir.path().join("nested/state.json");

        atomic_write(&target, b"{\"enabled\": true}")?;
        atomic_write(&target, b"{\"enabled\": false}")?;

        assert_eq!(fs::read(&target)?, b"{\"enabled\": false}");
        assert_eq!(fs::read_dir(target.parent().unwrap())?.count(), 1);
        Ok(())
    }

    #[test]
    fn test_failed_write_leaves_no_temp_file() -> io::Result<()> {
        let dir = TempDir::new()?;
        // Renaming a file over a directory fails
        let target = dir.path().join("occupied");
        fs::create_dir(&target)?;
        fs::write(target.join("inner"), b"x")?;

        assert!(atomic_write(&target, b"data").is_err());
        assert_eq!(fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }
}
