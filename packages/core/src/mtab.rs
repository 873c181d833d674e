//! Live mount table inspection.
//!
//! Answers "is this path mounted right now, and with what options" from the
//! kernel's mount table, which can differ from what fstab says. When the
//! kernel table is unavailable (non-Linux), falls back to parsing the output
//! of `mount` without arguments.

use std::fs;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde::Serialize;

use crate::executor::output_with_timeout;
use crate::record::unescape_fstab_field;

/// Kernel mount table.
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Timeout for the `mount` listing fallback.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A filesystem as the kernel currently has it mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveMount {
    pub source: String,
    pub mountpoint: String,
    pub fs_type: String,
    pub options: Vec<String>,
}

/// Reads the live mount table.
#[derive(Debug, Clone)]
pub struct MountStateReader {
    mounts_path: PathBuf,
    probe_timeout: Duration,
}

impl Default for MountStateReader {
    fn default() -> Self {
        Self::new(PROC_MOUNTS)
    }
}

impl MountStateReader {
    /// Creates a reader over a `/proc/mounts`-format file.
    pub fn new(mounts_path: impl Into<PathBuf>) -> Self {
        Self {
            mounts_path: mounts_path.into(),
            probe_timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Returns true if `mountpoint` is currently mounted.
    pub fn is_mounted(&self, mountpoint: &Path) -> bool {
        self.mount_info(mountpoint).is_some()
    }

    /// Returns the live source, type and options for `mountpoint`.
    ///
    /// If several filesystems are stacked on the same path the topmost
    /// (last listed) one wins.
    pub fn mount_info(&self, mountpoint: &Path) -> Option<LiveMount> {
        let target = canonical_path(mountpoint)?;
        let mounts = self.live_mounts()?;
        mounts.into_iter().rev().find(|m| Path::new(&m.mountpoint) == target)
    }

    /// All currently mounted filesystems, or `None` if neither the kernel
    /// table nor the `mount` tool could be read.
    pub fn live_mounts(&self) -> Option<Vec<LiveMount>> {
        match fs::read_to_string(&self.mounts_path) {
            Ok(content) => Some(parse_proc_mounts(&content)),
            Err(e) => {
                log::debug!(
                    "cannot read {} ({}), falling back to `mount`",
                    self.mounts_path.display(),
                    e
                );
                self.mount_tool_listing()
            }
        }
    }

    fn mount_tool_listing(&self) -> Option<Vec<LiveMount>> {
        let mut cmd = Command::new("mount");
        cmd.process_group(0);
        let output = output_with_timeout("mount", &mut cmd, self.probe_timeout)
            .map_err(|e| log::debug!("mount listing failed: {}", e))
            .ok()?;
        if !output.status.success() {
            return None;
        }
        Some(parse_mount_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Resolves `path` to an absolute path, following symlinks when it exists.
fn canonical_path(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .ok()
}

/// Parses `/proc/mounts` content (`source target fstype options freq pass`).
pub fn parse_proc_mounts(content: &str) -> Vec<LiveMount> {
    content
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            Some(LiveMount {
                source: unescape_fstab_field(parts[0]),
                mountpoint: unescape_fstab_field(parts[1]),
                fs_type: parts[2].to_string(),
                options: parts[3].split(',').map(|s| s.to_string()).collect(),
            })
        })
        .collect()
}

/// Parses `mount` output lines.
///
/// Handles both the util-linux form `src on /dir type fs (opts)` and the
/// BSD/macOS form `src on /dir (fs, opts)`.
pub fn parse_mount_output(content: &str) -> Vec<LiveMount> {
    content.lines().filter_map(parse_mount_line).collect()
}

fn parse_mount_line(line: &str) -> Option<LiveMount> {
    let (source, rest) = line.split_once(" on ")?;
    let open = rest.rfind(" (")?;
    let (head, tail) = rest.split_at(open);
    let inner = tail.trim().strip_prefix('(')?.strip_suffix(')')?;
    let mut options: Vec<String> = inner
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let (mountpoint, fs_type) = match head.rsplit_once(" type ") {
        Some((mountpoint, fs_type)) => (mountpoint.to_string(), fs_type.to_string()),
        None => {
            if options.is_empty() {
                return None;
            }
            let fs_type = options.remove(0);
            (head.to_string(), fs_type)
        }
    };

    Some(LiveMount {
        source: source.to_string(),
        mountpoint,
        fs_type,
        options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn mounts_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_proc_mounts_unescapes_paths() {
        let mounts = parse_proc_mounts(
            "proc /proc proc rw,nosuid 0 0\n//nas/share /mnt/My\\040Share cifs rw,vers=3.0 0 0\n",
        );
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[1].mountpoint, "/mnt/My Share");
        assert_eq!(mounts[1].options, vec!["rw", "vers=3.0"]);
    }

    #[test]
    fn test_is_mounted_and_info() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("My Share");
        fs::create_dir(&target).unwrap();
        let canonical = fs::canonicalize(&target).unwrap();
        let escaped = crate::record::escape_fstab_field(&canonical.to_string_lossy());

        let file = mounts_file(&format!(
            "sysfs /sys sysfs rw 0 0\n//nas/share {} cifs rw,vers=3.0,uid=1000 0 0\n",
            escaped
        ));
        let reader = MountStateReader::new(file.path());

        assert!(reader.is_mounted(&target));
        let info = reader.mount_info(&target).unwrap();
        assert_eq!(info.source, "//nas/share");
        assert_eq!(info.fs_type, "cifs");
        assert_eq!(info.options, vec!["rw", "vers=3.0", "uid=1000"]);

        assert!(!reader.is_mounted(dir.path()));
        assert!(reader.mount_info(dir.path()).is_none());
    }

    #[test]
    fn test_relative_query_is_resolved() {
        let file = mounts_file("/dev/sda1 / ext4 rw 0 0\n");
        let reader = MountStateReader::new(file.path());
        assert!(reader.is_mounted(Path::new("/tmp/..")));
        assert!(!reader.is_mounted(Path::new("")));
    }

    #[test]
    fn test_stacked_mounts_last_wins() {
        let file = mounts_file("/dev/sda1 / ext4 rw 0 0\noverlay / overlay ro 0 0\n");
        let info = MountStateReader::new(file.path())
            .mount_info(Path::new("/"))
            .unwrap();
        assert_eq!(info.fs_type, "overlay");
    }

    #[test]
    fn test_parse_util_linux_mount_output() {
        let mounts = parse_mount_output(
            "/dev/sda1 on / type ext4 (rw,relatime)\n//nas/share on /mnt/my share type cifs (rw,vers=3.0)\ngarbage\n",
        );
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[1].source, "//nas/share");
        assert_eq!(mounts[1].mountpoint, "/mnt/my share");
        assert_eq!(mounts[1].fs_type, "cifs");
        assert_eq!(mounts[1].options, vec!["rw", "vers=3.0"]);
    }

    #[test]
    fn test_parse_bsd_mount_output() {
        let mounts = parse_mount_output("/dev/disk1s1 on /System/Volumes/Data (apfs, local, journaled)\n");
        assert_eq!(mounts[0].mountpoint, "/System/Volumes/Data");
        assert_eq!(mounts[0].fs_type, "apfs");
        assert_eq!(mounts[0].options, vec!["local", "journaled"]);
    }
}
