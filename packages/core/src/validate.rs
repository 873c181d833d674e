//! Structural checks run on every record before it may enter the mount table.

use snafu::Snafu;

use crate::record::{MountRecord, SWAP_SENTINELS};

/// The first rule a record breaks.
///
/// Rules are checked in declaration order and validation stops at the first
/// failure, so the reported violation is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum Violation {
    #[snafu(display("source cannot be empty"))]
    EmptySource,

    #[snafu(display("mountpoint cannot be empty"))]
    EmptyMountpoint,

    #[snafu(display("mountpoint must be an absolute path (got '{mountpoint}')"))]
    RelativeMountpoint { mountpoint: String },

    #[snafu(display("filesystem type cannot be empty"))]
    EmptyFsType,

    #[snafu(display("filesystem type cannot contain whitespace (got '{fs_type}')"))]
    InvalidFsType { fs_type: String },

    #[snafu(display("options cannot be empty (use 'defaults' at minimum)"))]
    EmptyOptions,

    #[snafu(display("option '{option}' cannot contain whitespace or commas"))]
    InvalidOption { option: String },

    #[snafu(display("dump must be 0, 1, or 2 (got {dump})"))]
    DumpOutOfRange { dump: u32 },

    #[snafu(display("pass number must be 0, 1, or 2 (got {pass_num})"))]
    PassOutOfRange { pass_num: u32 },

    #[snafu(display("comment must be a single line"))]
    MultilineComment,
}

/// Validates a record.
///
/// Returns `Ok(())` if the record may be written, otherwise the first
/// violated rule.
pub fn validate(record: &MountRecord) -> Result<(), Violation> {
    if record.source.trim().is_empty() {
        return Err(Violation::EmptySource);
    }

    let mountpoint = record.mountpoint.as_str();
    if mountpoint.trim().is_empty() {
        return Err(Violation::EmptyMountpoint);
    }
    if !mountpoint.starts_with('/') && !SWAP_SENTINELS.contains(&mountpoint) {
        return Err(Violation::RelativeMountpoint {
            mountpoint: mountpoint.to_string(),
        });
    }

    if record.fs_type.trim().is_empty() {
        return Err(Violation::EmptyFsType);
    }
    if record.fs_type.chars().any(char::is_whitespace) {
        return Err(Violation::InvalidFsType {
            fs_type: record.fs_type.clone(),
        });
    }

    if record.options.iter().all(|o| o.trim().is_empty()) {
        return Err(Violation::EmptyOptions);
    }
    if let Some(option) = record
        .options
        .iter()
        .find(|o| o.chars().any(|c| c == ',' || c.is_whitespace()))
    {
        return Err(Violation::InvalidOption {
            option: option.clone(),
        });
    }

    if record.dump > 2 {
        return Err(Violation::DumpOutOfRange { dump: record.dump });
    }

    if record.pass_num > 2 {
        return Err(Violation::PassOutOfRange {
            pass_num: record.pass_num,
        });
    }

    if record
        .comment
        .as_deref()
        .is_some_and(|c| c.contains(['\n', '\r']))
    {
        return Err(Violation::MultilineComment);
    }

    Ok(())
}

/// Convenience form returning `(ok, reason)`.
pub fn check(record: &MountRecord) -> (bool, Option<String>) {
    match validate(record) {
        Ok(()) => (true, None),
        Err(violation) => (false, Some(violation.to_string())),
    }
}
