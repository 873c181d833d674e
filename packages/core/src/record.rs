//! Mount table record model.
//!
//! A [`MountRecord`] is one data line of `/etc/fstab` together with the
//! comment line that preceded it. Classification of the filesystem type
//! (network protocol vs. local) goes through [`FsKind`] rather than string
//! comparisons at each call site.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Mountpoint sentinels used by swap entries.
pub const SWAP_SENTINELS: [&str; 2] = ["none", "swap"];

/// Option used when a record has no options of its own.
pub const DEFAULT_OPTION: &str = "defaults";

pub trait IntoMountOptions {
    fn into(self) -> Vec<String>;
}

impl IntoMountOptions for &str {
    fn into(self) -> Vec<String> {
        self.split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }
}

impl IntoMountOptions for &String {
    fn into(self) -> Vec<String> {
        IntoMountOptions::into(self as &str)
    }
}

impl IntoMountOptions for String {
    fn into(self) -> Vec<String> {
        IntoMountOptions::into(&self as &str)
    }
}

impl IntoMountOptions for Vec<String> {
    fn into(self) -> Vec<String> {
        self
    }
}

/// Remote filesystem protocols the tool knows how to build sources for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "nfs")]
    Nfs,
    #[serde(rename = "nfs4")]
    Nfs4,
    #[serde(rename = "cifs")]
    Cifs,
    #[serde(rename = "smb")]
    Smb,
    #[serde(rename = "fuse.sshfs", alias = "sshfs")]
    Sshfs,
}

impl Protocol {
    /// Filesystem type string passed to `mount -t`.
    pub fn fs_type(&self) -> &'static str {
        match self {
            Self::Nfs => "nfs",
            Self::Nfs4 => "nfs4",
            Self::Cifs => "cifs",
            Self::Smb => "smb",
            Self::Sshfs => "fuse.sshfs",
        }
    }

    pub fn from_fs_type(fs_type: &str) -> Option<Self> {
        match fs_type {
            "nfs" => Some(Self::Nfs),
            "nfs4" => Some(Self::Nfs4),
            "cifs" => Some(Self::Cifs),
            "smb" => Some(Self::Smb),
            "fuse.sshfs" | "sshfs" => Some(Self::Sshfs),
            _ => None,
        }
    }

    /// True for NFS and SMB/CIFS shares.
    pub fn is_network_share(&self) -> bool {
        !matches!(self, Self::Sshfs)
    }

    pub fn is_nfs(&self) -> bool {
        matches!(self, Self::Nfs | Self::Nfs4)
    }

    pub fn is_smb(&self) -> bool {
        matches!(self, Self::Cifs | Self::Smb)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.fs_type())
    }
}

/// Classification of a record's filesystem type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    Network(Protocol),
    Local,
}

/// One mount table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRecord {
    /// Device path, `UUID=`/`LABEL=` reference, or network path.
    pub source: String,
    /// Absolute mountpoint, or `none`/`swap` for swap entries.
    pub mountpoint: String,
    /// Filesystem type (e.g. "ext4", "nfs", "cifs").
    pub fs_type: String,
    /// Mount options, never empty in a valid record.
    pub options: Vec<String>,
    /// This field is used by dump(8) to determine which filesystems need to be dumped.
    pub dump: u32,
    /// This field is used by fsck(8) to determine the order in which filesystem checks are done at boot time.
    pub pass_num: u32,
    /// Free text written as a `# ` line directly above the entry.
    pub comment: Option<String>,
}

impl MountRecord {
    /// Creates a record with `dump` and `pass_num` set to 0 and no comment.
    pub fn new(
        source: impl Into<String>,
        mountpoint: impl Into<String>,
        fs_type: impl Into<String>,
        options: impl IntoMountOptions,
    ) -> Self {
        Self {
            source: source.into(),
            mountpoint: mountpoint.into(),
            fs_type: fs_type.into(),
            options: options.into(),
            dump: 0,
            pass_num: 0,
            comment: None,
        }
    }

    pub fn with_dump_pass(mut self, dump: u32, pass_num: u32) -> Self {
        self.dump = dump;
        self.pass_num = pass_num;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn fs_kind(&self) -> FsKind {
        match Protocol::from_fs_type(&self.fs_type) {
            Some(protocol) => FsKind::Network(protocol),
            None => FsKind::Local,
        }
    }

    /// True for NFS and SMB/CIFS entries.
    pub fn is_network(&self) -> bool {
        matches!(self.fs_kind(), FsKind::Network(p) if p.is_network_share())
    }

    pub fn is_uuid_source(&self) -> bool {
        self.source.starts_with("UUID=")
    }

    pub fn is_label_source(&self) -> bool {
        self.source.starts_with("LABEL=")
    }

    /// Options joined with commas, falling back to `defaults` when empty.
    pub fn options_string(&self) -> String {
        if self.options.is_empty() {
            DEFAULT_OPTION.to_string()
        } else {
            self.options.join(",")
        }
    }

    /// Formats the entry as a tab separated fstab line (without the comment).
    pub fn to_fstab_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}",
            escape_fstab_field(&self.source),
            escape_fstab_field(&self.mountpoint),
            self.fs_type,
            self.options_string(),
            self.dump,
            self.pass_num
        )
    }

    /// Parses a single data line. Returns `None` when the line has fewer
    /// than four fields.
    pub fn from_line(line: &str, comment: Option<String>) -> Option<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            return None;
        }

        let options = if parts[3].is_empty() {
            vec![DEFAULT_OPTION.to_string()]
        } else {
            parts[3].split(',').map(|s| s.to_string()).collect()
        };

        Some(Self {
            source: unescape_fstab_field(parts[0]),
            mountpoint: unescape_fstab_field(parts[1]),
            fs_type: parts[2].to_string(),
            options,
            dump: parse_numeric_field(parts.get(4)),
            pass_num: parse_numeric_field(parts.get(5)),
            comment,
        })
    }
}

impl fmt::Display for MountRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_fstab_line())
    }
}

/// Digits-only fields parse as integers; anything else (or absent) is 0.
///
/// Out-of-range values are kept (saturating at `u32::MAX`) so validation
/// can report them.
fn parse_numeric_field(field: Option<&&str>) -> u32 {
    match field {
        Some(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse().unwrap_or(u32::MAX)
        }
        _ => 0,
    }
}

/// Escapes special characters in fstab fields using octal sequences.
///
/// Handles space (\040), tab (\011), newline (\012), and backslash (\134).
pub fn escape_fstab_field(field: &str) -> String {
    let mut encoded = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            ' ' => encoded.push_str(r"\040"),
            '\t' => encoded.push_str(r"\011"),
            '\n' => encoded.push_str(r"\012"),
            '\\' => encoded.push_str(r"\134"),
            _ => encoded.push(c),
        }
    }
    encoded
}

/// Unescapes octal sequences in fstab and `/proc/mounts` fields.
///
/// A backslash not followed by three octal digits is kept literally.
pub fn unescape_fstab_field(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            let octal: String = chars.clone().take(3).collect();
            if octal.len() == 3
                && octal.chars().all(|d| ('0'..='7').contains(&d))
                && let Ok(byte) = u8::from_str_radix(&octal, 8)
            {
                result.push(byte as char);
                for _ in 0..3 {
                    chars.next();
                }
                continue;
            }
        }
        result.push(c);
    }
    result
}
