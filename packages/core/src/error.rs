//! Unified error types for the mountrix-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error`) appears in different contexts.

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;
use std::time::Duration;

use crate::validate::Violation;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A file the operation depends on does not exist.
    #[snafu(display("file not found: {}", path.display()))]
    NotFound { path: PathBuf },

    /// Record failed validation; nothing was written.
    #[snafu(display("invalid fstab entry: {violation}"))]
    Validation { violation: Violation },

    /// Another record already uses this mountpoint.
    #[snafu(display("mountpoint {mountpoint} already exists in fstab"))]
    DuplicateMountpoint { mountpoint: String },

    /// Template input lacks required fields.
    #[snafu(display("missing required fields: {}", fields.join(", ")))]
    MissingField { fields: Vec<&'static str> },

    /// Template cannot be applied with the requested protocol.
    #[snafu(display("{template} does not support {protocol}"))]
    UnsupportedProtocol { template: String, protocol: String },

    /// The operating system refused the operation.
    #[snafu(display("permission denied: {action}. Root privileges required."))]
    PermissionDenied { action: String },

    /// A required external executable is not installed.
    #[snafu(display("{tool} command not found. Install mount utilities."))]
    ToolMissing { tool: String },

    /// A subprocess exceeded its time bound and was killed.
    #[snafu(display("{command} timed out after {timeout:?}"))]
    Timeout { command: String, timeout: Duration },

    /// The mount tool exited non-zero for a reason we do not classify further.
    #[snafu(display("{command} failed with exit code {code}: {message}"))]
    MountFailed {
        command: String,
        code: i32,
        message: String,
    },

    /// Unmount refused because something still uses the filesystem.
    #[snafu(display(
        "device is busy: {mountpoint}. Try force unmount or close applications using this mount."
    ))]
    DeviceBusy { mountpoint: String, code: i32 },

    /// Mountpoint precondition not met (missing or not a directory).
    #[snafu(display("{message}"))]
    InvalidMountpoint { message: String },

    /// Failed to execute a system command.
    #[snafu(display("failed to execute command '{command}'"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// Fstab file cannot be read.
    #[snafu(display("failed to read fstab at {}", path.display()))]
    TableRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write fstab file.
    #[snafu(display("failed to write fstab at {}", path.display()))]
    TableWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to create backup.
    #[snafu(display("failed to create backup at {}", path.display()))]
    Backup {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Mount point creation failed.
    #[snafu(display("failed to create mount point at {}", path.display()))]
    MountPointCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Template catalog could not be parsed.
    #[snafu(display("failed to parse template catalog: {source}"))]
    TemplateCatalog { source: serde_json::Error },

    /// No template with this id.
    #[snafu(display("unknown template: {id}"))]
    UnknownTemplate { id: String },

    /// Configuration file could not be read or parsed.
    #[snafu(display("invalid configuration at {}: {message}", path.display()))]
    Config { path: PathBuf, message: String },
}

impl Error {
    /// Returns true for errors that are worth retrying by the caller
    /// (busy devices and timeouts); everything else needs user action first.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::DeviceBusy { .. } | Error::Timeout { .. })
    }

    /// Exit code reported by the external tool, when one is known.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::MountFailed { code, .. } | Error::DeviceBusy { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for command execution errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;

    /// Add context for fstab read errors.
    fn table_read_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for fstab write errors.
    fn table_write_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for backup errors.
    fn backup_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for mount point creation errors.
    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandExecutionSnafu {
            command: command.into(),
        })
    }

    fn table_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(TableReadSnafu { path: path.into() })
    }

    fn table_write_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(TableWriteSnafu { path: path.into() })
    }

    fn backup_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(BackupSnafu { path: path.into() })
    }

    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountPointCreationSnafu { path: path.into() })
    }
}
