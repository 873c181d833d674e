//! Mount operations module.
//!
//! This module creates mountpoint directories and drives `mount`/`umount`,
//! turning their exit codes and stderr into a uniform [`MountResult`].
//!
//! Per mountpoint the lifecycle is `unmounted -> mount -> mounted ->
//! unmount -> unmounted`; remount is unmount followed by mount and stops
//! after a failed unmount.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, IoResultExt, Result};
use crate::executor::{CommandRunner, ExecutionContext};
use crate::mtab::MountStateReader;
use crate::record::MountRecord;
use crate::validate::Violation;

/// Time bound for a single `mount`/`umount` invocation.
pub const MOUNT_TIMEOUT: Duration = Duration::from_secs(30);

/// Parent directory for system-wide mountpoints.
pub const SYSTEM_MOUNT_ROOT: &str = "/mnt";

/// Parent of the per-user mountpoint directories (`/media/<user>`).
pub const USER_MOUNT_ROOT: &str = "/media";

const MOUNTPOINT_MODE: u32 = 0o755;

/// Outcome of a mountpoint, mount or unmount operation.
///
/// Operations never return `Err`; failures are reported with
/// `success == false` and the classified [`Error`] in `error`, so callers
/// can collect results for many records.
#[derive(Debug)]
pub struct MountResult {
    pub success: bool,
    pub message: String,
    pub mountpoint: Option<PathBuf>,
    pub exit_code: Option<i32>,
    pub error: Option<Error>,
}

impl MountResult {
    fn ok(message: impl Into<String>, mountpoint: impl Into<PathBuf>) -> Self {
        Self {
            success: true,
            message: message.into(),
            mountpoint: Some(mountpoint.into()),
            exit_code: None,
            error: None,
        }
    }

    fn failed(error: Error) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            mountpoint: None,
            exit_code: error.exit_code(),
            error: Some(error),
        }
    }

    /// Converts into a `Result` for callers that prefer `?`.
    pub fn into_result(self) -> Result<Option<PathBuf>> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.mountpoint),
        }
    }
}

impl From<Result<MountResult>> for MountResult {
    fn from(result: Result<MountResult>) -> Self {
        result.unwrap_or_else(MountResult::failed)
    }
}

/// The user a mountpoint should belong to.
///
/// Under `sudo` this is the user who invoked sudo, not root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokingUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

impl InvokingUser {
    pub fn current() -> Self {
        let env_id = |key: &str| std::env::var(key).ok().and_then(|v| v.parse::<u32>().ok());

        let uid = env_id("SUDO_UID").unwrap_or_else(|| nix::unistd::getuid().as_raw());
        let gid = env_id("SUDO_GID").unwrap_or_else(|| nix::unistd::getgid().as_raw());
        let name = std::env::var("SUDO_USER")
            .ok()
            .filter(|n| !n.is_empty())
            .or_else(|| {
                nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))
                    .ok()
                    .flatten()
                    .map(|u| u.name)
            })
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "user".to_string());

        Self { name, uid, gid }
    }
}

/// Strips separators and `..` from a user-supplied relative path.
///
/// Returns `None` when nothing usable is left.
pub fn sanitize_relative_path(path: &str) -> Option<String> {
    let cleaned = path.replace("..", "");
    let parts: Vec<&str> = cleaned
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Maps OS permission errors to `PermissionDenied`, anything else to
/// `MountPointCreation`.
fn creation_context(result: io::Result<()>, action: &str, path: &Path) -> Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Err(Error::PermissionDenied {
            action: action.to_string(),
        }),
        other => other.mount_point_context(path),
    }
}

/// Runs mount tooling and reports results.
#[derive(Debug, Clone)]
pub struct Mounter<R = ExecutionContext> {
    runner: R,
    state: MountStateReader,
    timeout: Duration,
    system_root: PathBuf,
    user_root: PathBuf,
    user: Option<InvokingUser>,
}

impl Default for Mounter<ExecutionContext> {
    fn default() -> Self {
        Self::new(ExecutionContext::default())
    }
}

impl<R: CommandRunner> Mounter<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            state: MountStateReader::default(),
            timeout: MOUNT_TIMEOUT,
            system_root: PathBuf::from(SYSTEM_MOUNT_ROOT),
            user_root: PathBuf::from(USER_MOUNT_ROOT),
            user: None,
        }
    }

    pub fn with_state(mut self, state: MountStateReader) -> Self {
        self.state = state;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides `/mnt` and `/media` as the mountpoint parents.
    pub fn with_roots(mut self, system_root: impl Into<PathBuf>, user_root: impl Into<PathBuf>) -> Self {
        self.system_root = system_root.into();
        self.user_root = user_root.into();
        self
    }

    /// Overrides the user that owns per-user mountpoints.
    pub fn with_user(mut self, user: InvokingUser) -> Self {
        self.user = Some(user);
        self
    }

    fn user(&self) -> InvokingUser {
        self.user.clone().unwrap_or_else(InvokingUser::current)
    }

    /// Creates a mountpoint directory under `/mnt`, or `/media/<user>`
    /// when `user_only` is set.
    ///
    /// An existing directory counts as success.
    pub fn create_mountpoint(&self, relative_path: &str, user_only: bool) -> MountResult {
        self.try_create_mountpoint(relative_path, user_only).into()
    }

    fn try_create_mountpoint(&self, relative_path: &str, user_only: bool) -> Result<MountResult> {
        if relative_path.trim().is_empty() {
            return Err(Error::InvalidMountpoint {
                message: "path cannot be empty".to_string(),
            });
        }
        let Some(sanitized) = sanitize_relative_path(relative_path) else {
            return Err(Error::InvalidMountpoint {
                message: format!("invalid path after sanitization: '{}'", relative_path),
            });
        };

        let user = user_only.then(|| self.user());
        let root = match &user {
            Some(user) => self.user_root.join(&user.name),
            None => self.system_root.clone(),
        };
        let full_path = root.join(&sanitized);

        if full_path.exists() {
            if full_path.is_dir() {
                return Ok(MountResult::ok(
                    format!("Mountpoint already exists: {}", full_path.display()),
                    full_path,
                ));
            }
            return Err(Error::InvalidMountpoint {
                message: format!("path exists but is not a directory: {}", full_path.display()),
            });
        }

        let action = format!("creating {}", full_path.display());
        creation_context(fs::create_dir_all(&full_path), &action, &full_path)?;
        creation_context(
            fs::set_permissions(&full_path, fs::Permissions::from_mode(MOUNTPOINT_MODE)),
            &action,
            &full_path,
        )?;

        if let Some(user) = user {
            let owner = nix::unistd::Uid::from_raw(user.uid);
            let group = nix::unistd::Gid::from_raw(user.gid);
            if let Err(e) = nix::unistd::chown(&full_path, Some(owner), Some(group)) {
                log::warn!(
                    "could not hand {} to {} ({}:{}): {}",
                    full_path.display(),
                    user.name,
                    user.uid,
                    user.gid,
                    e
                );
            }
        }

        log::info!("created mountpoint {}", full_path.display());
        Ok(MountResult::ok(
            format!("Mountpoint created: {}", full_path.display()),
            full_path,
        ))
    }

    /// Mounts a record with `mount -t <fstype> -o <options> <source> <dir>`.
    ///
    /// The mountpoint directory must already exist.
    pub fn mount(&self, record: &MountRecord) -> MountResult {
        self.try_mount(record).into()
    }

    fn try_mount(&self, record: &MountRecord) -> Result<MountResult> {
        let violation = if record.source.is_empty() {
            Some(Violation::EmptySource)
        } else if record.mountpoint.is_empty() {
            Some(Violation::EmptyMountpoint)
        } else if record.fs_type.is_empty() {
            Some(Violation::EmptyFsType)
        } else {
            None
        };
        if let Some(violation) = violation {
            return Err(Error::Validation { violation });
        }

        let mountpoint = Path::new(&record.mountpoint);
        if !mountpoint.exists() {
            return Err(Error::InvalidMountpoint {
                message: format!(
                    "Mountpoint does not exist: {}. Create it first.",
                    record.mountpoint
                ),
            });
        }
        if !mountpoint.is_dir() {
            return Err(Error::InvalidMountpoint {
                message: format!("Mountpoint is not a directory: {}", record.mountpoint),
            });
        }

        let options = record.options.join(",");
        let mut args = vec!["-t", record.fs_type.as_str()];
        if !options.is_empty() {
            args.extend(["-o", options.as_str()]);
        }
        args.extend([record.source.as_str(), record.mountpoint.as_str()]);

        let output = self.runner.run("mount", &args, self.timeout)?;
        let code = output.status.code().unwrap_or(-1);

        if output.status.success() {
            log::info!("mounted {} on {}", record.source, record.mountpoint);
            return Ok(MountResult::ok(
                format!(
                    "Successfully mounted {} to {}",
                    record.source, record.mountpoint
                ),
                mountpoint,
            ));
        }

        let message = tool_message(&output.stdout, &output.stderr);
        if is_privilege_error(&message) {
            return Err(Error::PermissionDenied {
                action: format!("mounting {}", record.mountpoint),
            });
        }

        Err(Error::MountFailed {
            command: "mount".to_string(),
            code,
            message,
        })
    }

    /// Unmounts `mountpoint`, with `-f` when `force` is set.
    ///
    /// A target that is not mounted counts as success.
    pub fn unmount(&self, mountpoint: &Path, force: bool) -> MountResult {
        self.try_unmount(mountpoint, force).into()
    }

    fn try_unmount(&self, mountpoint: &Path, force: bool) -> Result<MountResult> {
        if mountpoint.as_os_str().is_empty() {
            return Err(Error::Validation {
                violation: Violation::EmptyMountpoint,
            });
        }
        if !mountpoint.exists() {
            return Err(Error::InvalidMountpoint {
                message: format!("Mountpoint does not exist: {}", mountpoint.display()),
            });
        }

        let target = mountpoint.to_string_lossy();
        let mut args = Vec::with_capacity(2);
        if force {
            args.push("-f");
        }
        args.push(target.as_ref());

        let output = self.runner.run("umount", &args, self.timeout)?;
        let code = output.status.code().unwrap_or(-1);

        if output.status.success() {
            log::info!("unmounted {}", mountpoint.display());
            return Ok(MountResult::ok(
                format!("Successfully unmounted {}", mountpoint.display()),
                mountpoint,
            ));
        }

        let message = tool_message(&output.stdout, &output.stderr);
        let lower = message.to_lowercase();

        if lower.contains("not mounted") {
            log::debug!("{} was already unmounted", mountpoint.display());
            let mut result = MountResult::ok(
                format!("{} is not mounted", mountpoint.display()),
                mountpoint,
            );
            result.exit_code = Some(code);
            return Ok(result);
        }

        if lower.contains("busy") {
            return Err(Error::DeviceBusy {
                mountpoint: mountpoint.display().to_string(),
                code,
            });
        }

        if is_privilege_error(&message) {
            return Err(Error::PermissionDenied {
                action: format!("unmounting {}", mountpoint.display()),
            });
        }

        Err(Error::MountFailed {
            command: "umount".to_string(),
            code,
            message,
        })
    }

    /// Unmounts the record's mountpoint if it is mounted, then mounts it.
    pub fn remount(&self, record: &MountRecord) -> MountResult {
        if record.mountpoint.is_empty() {
            return MountResult::failed(Error::Validation {
                violation: Violation::EmptyMountpoint,
            });
        }

        let mountpoint = Path::new(&record.mountpoint);
        if self.state.is_mounted(mountpoint) {
            let unmounted = self.unmount(mountpoint, false);
            if !unmounted.success {
                return MountResult {
                    message: format!(
                        "Failed to unmount before remounting: {}",
                        unmounted.message
                    ),
                    ..unmounted
                };
            }
        }

        self.mount(record)
    }
}

/// Prefers stderr; falls back to stdout when stderr is empty.
fn tool_message(stdout: &[u8], stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    String::from_utf8_lossy(stdout).trim().to_string()
}

fn is_privilege_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["only root", "must be superuser", "permission denied"]
        .iter()
        .any(|needle| lower.contains(needle))
}
