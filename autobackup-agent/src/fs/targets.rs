//! Backup target discovery.
//!
//! A target is a writable volume root hosting `<app_name>_Backups/`. Only the
//! first eligible volume is used for a pass; when several are eligible the
//! choice follows configuration order or mount-table order.

use crate::config::Config;
use crate::utils::errors::{MirrorError, Result};
use nix::sys::statvfs::{statvfs, FsFlags};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the persisted manifest inside a backup root
pub const MANIFEST_FILE_NAME: &str = "backup_manifest.json";

/// A volume selected to host the mirrored tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupTarget {
    pub volume_root: PathBuf,
    pub backup_root: PathBuf,
}

impl BackupTarget {
    pub fn new(volume_root: impl Into<PathBuf>, app_name: &str) -> Self {
        let volume_root = volume_root.into();
        let backup_root = volume_root.join(format!("{}_Backups", app_name));
        Self {
            volume_root,
            backup_root,
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.backup_root.join(MANIFEST_FILE_NAME)
    }

    /// Create the backup root if it does not exist yet
    pub async fn ensure(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.backup_root).await?;
        Ok(())
    }
}

/// Enumerate writable volume roots, in priority order.
///
/// Configured volumes win; otherwise the mount table is read. Every candidate
/// is re-checked with `statvfs` and dropped if missing or read-only.
pub fn discover_volumes(config: &Config) -> Vec<PathBuf> {
    let candidates = if config.targets.volumes.is_empty() {
        mounted_volumes()
    } else {
        // Manifest keys are absolute, so configured roots must be too
        config
            .targets
            .volumes
            .iter()
            .filter_map(|v| v.canonicalize().ok())
            .collect()
    };

    let volumes: Vec<PathBuf> = candidates.into_iter().filter(|v| is_writable(v)).collect();
    debug!("Writable volumes: {:?}", volumes);
    volumes
}

/// Pick the first writable volume as this pass's target.
pub fn select_target(config: &Config) -> Result<BackupTarget> {
    let volume = discover_volumes(config)
        .into_iter()
        .next()
        .ok_or(MirrorError::TargetUnavailable)?;

    let target = BackupTarget::new(volume, &config.mirror.app_name);
    info!("Selected backup target: {}", target.backup_root.display());
    Ok(target)
}

/// Every discovered target, for locating manifests left by an earlier pass.
pub fn all_targets(config: &Config) -> Vec<BackupTarget> {
    discover_volumes(config)
        .into_iter()
        .map(|v| BackupTarget::new(v, &config.mirror.app_name))
        .collect()
}

fn is_writable(path: &Path) -> bool {
    match statvfs(path) {
        Ok(stat) => !stat.flags().contains(FsFlags::ST_RDONLY),
        Err(e) => {
            debug!("Skipping volume {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(target_os = "linux")]
fn mounted_volumes() -> Vec<PathBuf> {
    let mounts = match std::fs::read_to_string("/proc/self/mounts") {
        Ok(m) => m,
        Err(e) => {
            debug!("Cannot read /proc/self/mounts: {}", e);
            return Vec::new();
        }
    };
    let pseudo = std::fs::read_to_string("/proc/filesystems")
        .map(|s| pseudo_filesystems(&s))
        .unwrap_or_default();

    parse_mounts(&mounts, &pseudo)
}

#[cfg(not(target_os = "linux"))]
fn mounted_volumes() -> Vec<PathBuf> {
    Vec::new()
}

/// Filesystem types flagged `nodev` (proc, sysfs, tmpfs, cgroup, ...)
fn pseudo_filesystems(filesystems: &str) -> HashSet<String> {
    filesystems
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some("nodev"), Some(fs_type)) => Some(fs_type.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Mount points mounted `rw` on a device-backed filesystem, in table order.
fn parse_mounts(mounts: &str, pseudo: &HashSet<String>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut volumes = Vec::new();

    for line in mounts.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let (mount_point, fs_type, options) = (fields[1], fields[2], fields[3]);

        if pseudo.contains(fs_type) || !options.split(',').any(|o| o == "rw") {
            continue;
        }

        let path = PathBuf::from(unescape_mount_path(mount_point));
        if seen.insert(path.clone()) {
            volumes.push(path);
        }
    }

    volumes
}

/// Decode the octal escapes (`\040` for space, ...) used in the mount table
fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u16, |acc, d| acc * 8 + u16::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FILESYSTEMS: &str = "nodev\tsysfs\nnodev\tproc\nnodev\ttmpfs\n\text4\n\tvfat\n";

    const MOUNTS: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec 0 0
proc /proc proc rw,nosuid 0 0
/dev/sda1 / ext4 rw,relatime 0 0
/dev/sdb1 /mnt/cdrom iso9660 ro,relatime 0 0
/dev/sdc1 /media/usb\\040stick vfat rw,relatime 0 0
tmpfs /run tmpfs rw,nosuid 0 0
/dev/sda1 / ext4 rw,relatime 0 0
";

    #[test]
    fn test_backup_root_naming() {
        let target = BackupTarget::new("/mnt/backup", "App");
        assert_eq!(target.backup_root, PathBuf::from("/mnt/backup/App_Backups"));
        assert_eq!(
            target.manifest_path(),
            PathBuf::from("/mnt/backup/App_Backups/backup_manifest.json")
        );
    }

    #[test]
    fn test_parse_mounts_keeps_rw_device_volumes() {
        let pseudo = pseudo_filesystems(FILESYSTEMS);
        assert!(pseudo.contains("tmpfs"));
        assert!(!pseudo.contains("ext4"));

        let volumes = parse_mounts(MOUNTS, &pseudo);
        assert_eq!(
            volumes,
            vec![PathBuf::from("/"), PathBuf::from("/media/usb stick")]
        );
    }

    #[test]
    fn test_unescape_mount_path() {
        assert_eq!(unescape_mount_path("/a\\040b\\011c"), "/a b\tc");
        assert_eq!(unescape_mount_path("/plain"), "/plain");
        assert_eq!(unescape_mount_path("/trailing\\04"), "/trailing\\04");
    }

    #[test]
    fn test_configured_volumes_take_precedence() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();

        let mut config = Config::default();
        config.targets.volumes = vec![
            PathBuf::from("/definitely/not/mounted/here"),
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ];

        let first_root = first.path().canonicalize().unwrap();
        let second_root = second.path().canonicalize().unwrap();

        let volumes = discover_volumes(&config);
        assert_eq!(volumes, vec![first_root.clone(), second_root]);

        let target = select_target(&config).unwrap();
        assert_eq!(target.volume_root, first_root);
        assert_eq!(target.backup_root, first_root.join("Mirror_Backups"));
    }

    #[test]
    fn test_no_eligible_target() {
        let mut config = Config::default();
        config.targets.volumes = vec![PathBuf::from("/definitely/not/mounted/here")];

        let err = select_target(&config).unwrap_err();
        assert!(matches!(err, MirrorError::TargetUnavailable));
    }

    #[tokio::test]
    async fn test_ensure_creates_backup_root() {
        let volume = TempDir::new().unwrap();
        let target = BackupTarget::new(volume.path(), "Mirror");
        assert!(!target.backup_root.exists());

        target.ensure().await.unwrap();
        assert!(target.backup_root.is_dir());
    }
}
