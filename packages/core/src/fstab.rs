//! Fstab parsing and writing module.
//!
//! This module handles reading, parsing, and writing `/etc/fstab` entries,
//! with a timestamped backup taken before any modification.
//!
//! Adding a record appends to the file and leaves every other byte alone.
//! Removing a record regenerates the whole file from the parsed records, so
//! comment lines that were not directly above an entry are dropped.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use snafu::ensure;

use crate::error::{
    DuplicateMountpointSnafu, IoResultExt, NotFoundSnafu, Result, ValidationSnafu,
};
use crate::record::MountRecord;
use crate::validate;

/// Default fstab path.
pub const FSTAB_PATH: &str = "/etc/fstab";

/// Default directory for fstab backups.
pub const BACKUP_DIR: &str = "/var/backups";

/// Header written at the top of a regenerated table.
pub const HEADER_LINES: [&str; 2] = ["# /etc/fstab: static file system information", ""];

/// Parses an fstab file into its records.
///
/// # Errors
/// Returns [`crate::Error::NotFound`] if the file does not exist.
pub fn parse_table(path: &Path) -> Result<Vec<MountRecord>> {
    ensure!(path.exists(), NotFoundSnafu { path });
    let content = fs::read_to_string(path).table_read_context(path)?;
    Ok(parse_table_content(&content))
}

/// Parses fstab content.
///
/// A `#` line becomes the comment of the next record; a blank line or a
/// consumed record clears it. Lines with fewer than four fields are skipped.
pub fn parse_table_content(content: &str) -> Vec<MountRecord> {
    let mut records = Vec::new();
    let mut pending_comment: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() {
            pending_comment = None;
            continue;
        }

        if let Some(comment) = line.strip_prefix('#') {
            pending_comment = Some(comment.trim().to_string());
            continue;
        }

        if let Some(record) = MountRecord::from_line(line, pending_comment.take()) {
            records.push(record);
        }
    }

    records
}

/// Returns the record for `mountpoint`, if any.
pub fn find_record(path: &Path, mountpoint: &str) -> Result<Option<MountRecord>> {
    Ok(parse_table(path)?
        .into_iter()
        .find(|r| r.mountpoint == mountpoint))
}

/// Renders records as a complete fstab file.
pub fn render_table(records: &[MountRecord]) -> String {
    let mut lines: Vec<String> = HEADER_LINES.iter().map(|l| l.to_string()).collect();

    for record in records {
        if let Some(comment) = &record.comment {
            lines.push(format!("# {}", comment));
        }
        lines.push(record.to_fstab_line());
    }

    let mut output = lines.join("\n");
    output.push('\n');
    output
}

/// Creates a timestamped backup of the fstab file in `backup_dir`.
///
/// The copy is named `<file name>.backup.<YYYYMMDD_HHMMSS>`. Returns the
/// path to the backup file.
pub fn backup_table(path: &Path, backup_dir: &Path) -> Result<PathBuf> {
    ensure!(path.exists(), NotFoundSnafu { path });

    fs::create_dir_all(backup_dir).backup_context(backup_dir)?;

    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "fstab".to_string());
    let backup_path = backup_dir.join(format!("{}.backup.{}", base, backup_timestamp()));

    fs::copy(path, &backup_path).backup_context(&backup_path)?;
    log::info!(
        "backed up {} to {}",
        path.display(),
        backup_path.display()
    );

    Ok(backup_path)
}

fn backup_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Appends a record to the fstab file.
///
/// The record is validated first. When `backup_dir` is given a backup is
/// taken before the table is inspected. Fails if another record already
/// uses the same mountpoint.
pub fn add_record(record: &MountRecord, path: &Path, backup_dir: Option<&Path>) -> Result<()> {
    validate::validate(record).map_err(|violation| ValidationSnafu { violation }.build())?;

    if let Some(dir) = backup_dir {
        backup_table(path, dir)?;
    }

    let existing = parse_table(path)?;
    ensure!(
        !existing.iter().any(|r| r.mountpoint == record.mountpoint),
        DuplicateMountpointSnafu {
            mountpoint: record.mountpoint.clone()
        }
    );

    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .open(path)
        .table_write_context(path)?;

    let mut chunk = String::new();
    if !ends_with_newline(&mut file).table_read_context(path)? {
        chunk.push('\n');
    }
    if let Some(comment) = &record.comment {
        chunk.push_str(&format!("# {}\n", comment));
    }
    chunk.push_str(&record.to_fstab_line());
    chunk.push('\n');

    file.write_all(chunk.as_bytes()).table_write_context(path)?;
    log::info!("added {} to {}", record.mountpoint, path.display());

    Ok(())
}

/// True if the file is empty or its last byte is a newline.
fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
    let len = file.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Removes every record with the given mountpoint.
///
/// Returns `false` without touching the file if nothing matched. Otherwise
/// backs up (when `backup_dir` is given) and rewrites the whole file from the
/// remaining records.
pub fn remove_record(mountpoint: &str, path: &Path, backup_dir: Option<&Path>) -> Result<bool> {
    let records = parse_table(path)?;
    let before = records.len();
    let retained: Vec<MountRecord> = records
        .into_iter()
        .filter(|r| r.mountpoint != mountpoint)
        .collect();

    if retained.len() == before {
        return Ok(false);
    }

    if let Some(dir) = backup_dir {
        backup_table(path, dir)?;
    }

    write_table(path, &retained)?;
    log::info!("removed {} from {}", mountpoint, path.display());

    Ok(true)
}

/// Replaces the record for `record.mountpoint` with `record`.
///
/// Whole-table rewrite, same as [`remove_record`]. Returns `false` if no
/// record had that mountpoint.
pub fn replace_record(record: &MountRecord, path: &Path, backup_dir: Option<&Path>) -> Result<bool> {
    validate::validate(record).map_err(|violation| ValidationSnafu { violation }.build())?;

    let mut records = parse_table(path)?;
    let Some(slot) = records
        .iter_mut()
        .find(|r| r.mountpoint == record.mountpoint)
    else {
        return Ok(false);
    };
    *slot = record.clone();

    if let Some(dir) = backup_dir {
        backup_table(path, dir)?;
    }

    write_table(path, &records)?;
    log::info!("replaced {} in {}", record.mountpoint, path.display());

    Ok(true)
}

/// Writes the regenerated table over `path`.
fn write_table(path: &Path, records: &[MountRecord]) -> Result<()> {
    fs::write(path, render_table(records)).table_write_context(path)
}

/// Builds a positional, line-by-line preview of what writing `records`
/// would change. A missing file is treated as empty.
pub fn preview_changes(records: &[MountRecord], path: &Path) -> String {
    let current = fs::read_to_string(path).unwrap_or_default();
    preview_diff(&current, &render_table(records))
}

fn preview_diff(current: &str, new: &str) -> String {
    let current_lines: Vec<&str> = current.split('\n').collect();
    let new_lines: Vec<&str> = new.split('\n').collect();

    let mut preview = String::from("=== fstab Changes Preview ===\n\n");
    preview.push_str(&format!("Current entries: {} lines\n", current_lines.len()));
    preview.push_str(&format!("New entries: {} lines\n\n", new_lines.len()));
    preview.push_str("--- Current\n");
    preview.push_str("+++ New\n\n");

    let max_lines = current_lines.len().max(new_lines.len());
    for i in 0..max_lines {
        let old = current_lines.get(i).copied().unwrap_or("");
        let new = new_lines.get(i).copied().unwrap_or("");

        if old != new {
            if !old.is_empty() {
                preview.push_str(&format!("- {}\n", old));
            }
            if !new.is_empty() {
                preview.push_str(&format!("+ {}\n", new));
            }
        }
    }

    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::validate::Violation;
    use tempfile::{NamedTempFile, TempDir};

    const SAMPLE_FSTAB: &str = "# /etc/fstab: static file system information.

# <file system>  <mount point>  <type>  <options>  <dump>  <pass>
UUID=abc-123\t/\text4\tdefaults\t0\t1
UUID=def-456  /boot/efi  vfat  umask=0077  0  1

# AVM FRITZ!NAS - FRITZ!Box USB storage
//fritz.box/USB-Storage\t/mnt/nas\tcifs\tvers=3.0,nofail\t0\t0
/dev/sdb1 /srv/data xfs noatime
broken line
";

    fn sample_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_FSTAB.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_table_records_and_comments() {
        let file = sample_file();
        let records = parse_table(file.path()).unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(records[0].source, "UUID=abc-123");
        assert_eq!(records[0].pass_num, 1);
        // The column header sits directly above the first entry.
        assert_eq!(
            records[0].comment.as_deref(),
            Some("<file system>  <mount point>  <type>  <options>  <dump>  <pass>")
        );
        assert_eq!(records[1].comment, None);
        assert_eq!(
            records[2].comment.as_deref(),
            Some("AVM FRITZ!NAS - FRITZ!Box USB storage")
        );
        assert!(records[2].is_network());
        assert_eq!(records[3].options, vec!["noatime"]);
    }

    #[test]
    fn test_blank_line_resets_comment() {
        let records = parse_table_content("# orphan\n\n/dev/sda1 /mnt ext4 defaults 0 0\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].comment, None);
    }

    #[test]
    fn test_parse_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = parse_table(&dir.path().join("fstab")).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_render_then_parse_round_trip() {
        let records = vec![
            MountRecord::new("UUID=abc-123", "/", "ext4", "defaults").with_dump_pass(0, 1),
            MountRecord::new("//nas/share", "/mnt/nas", "cifs", "vers=3.0,nofail")
                .with_comment("Synology DiskStation - SMB share"),
            MountRecord::new("LABEL=swap", "none", "swap", "sw"),
            MountRecord::new("/dev/sdc1", "/mnt/My Drive", "exfat", "uid=1000,gid=1000")
                .with_dump_pass(2, 2),
        ];

        let content = render_table(&records);
        assert!(content.starts_with(HEADER_LINES[0]));
        assert!(content.ends_with('\n'));
        assert_eq!(parse_table_content(&content), records);
    }

    #[test]
    fn test_every_valid_record_round_trips() {
        let opts = |list: &[&str]| list.iter().map(|o| o.to_string()).collect::<Vec<_>>();
        let candidates = vec![
            MountRecord::new("/dev/sda1", "/mnt/data", "ext4", "defaults"),
            MountRecord::new("//nas/a b\\c", "/mnt/tab\there", "cifs", "vers=3.0"),
            MountRecord::new("/dev/sda1", "/mnt/x", "ext4", opts(&["defaults", "x y"])),
            MountRecord::new("/dev/sda1", "/mnt/x", "ext4", opts(&["a,b"])),
            MountRecord::new("/dev/sda1", "/mnt/x", "ext 4", "defaults"),
            MountRecord::new("/dev/sda1", "/mnt/x", "ext4", "defaults").with_comment("line1\nline2"),
            MountRecord::new("/dev/sda1", "/mnt/y", "ext4", "ro").with_comment("single line"),
        ];

        let (valid, invalid): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|r| validate::validate(r).is_ok());

        assert_eq!(valid.len(), 3);
        assert_eq!(invalid.len(), 4);
        assert_eq!(parse_table_content(&render_table(&valid)), valid);
    }

    #[test]
    fn test_add_rejects_comment_that_would_inject_an_entry() {
        let file = sample_file();
        let record = MountRecord::new("/dev/sdd1", "/mnt/usb", "ext4", "defaults")
            .with_comment("x\n/dev/evil /mnt/evil ext4 defaults 0 0");

        let err = add_record(&record, file.path(), None).unwrap_err();

        assert!(matches!(
            err,
            Error::Validation {
                violation: Violation::MultilineComment
            }
        ));
        assert_eq!(fs::read_to_string(file.path()).unwrap(), SAMPLE_FSTAB);
        assert!(find_record(file.path(), "/mnt/evil").unwrap().is_none());
    }

    #[test]
    fn test_backup_preserves_bytes() {
        let file = sample_file();
        let backup_dir = TempDir::new().unwrap();
        let target = backup_dir.path().join("nested");

        let backup = backup_table(file.path(), &target).unwrap();

        let name = backup.file_name().unwrap().to_string_lossy().into_owned();
        let base = file.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("{}.backup.", base)));
        let stamp = name.rsplit('.').next().unwrap();
        assert_eq!(stamp.len(), "YYYYMMDD_HHMMSS".len());
        assert_eq!(fs::read(&backup).unwrap(), SAMPLE_FSTAB.as_bytes());
    }

    #[test]
    fn test_backup_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = backup_table(&dir.path().join("nope"), dir.path()).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_add_record_appends_and_keeps_existing_bytes() {
        let file = sample_file();
        let backup_dir = TempDir::new().unwrap();
        let record = MountRecord::new("192.168.1.10:/export", "/mnt/nfs", "nfs", "nfsvers=4")
            .with_comment("Generic NFS - NFS export");

        add_record(&record, file.path(), Some(backup_dir.path())).unwrap();

        let content = fs::read_to_string(file.path()).unwrap();
        assert!(content.starts_with(SAMPLE_FSTAB));
        assert!(content.ends_with("# Generic NFS - NFS export\n192.168.1.10:/export\t/mnt/nfs\tnfs\tnfsvers=4\t0\t0\n"));

        let records = parse_table(file.path()).unwrap();
        assert_eq!(records.last().unwrap(), &record);
        assert_eq!(fs::read_dir(backup_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_add_record_adds_missing_trailing_newline() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"/dev/sda1 / ext4 defaults 0 1").unwrap();

        let record = MountRecord::new("/dev/sdb1", "/data", "ext4", "defaults");
        add_record(&record, file.path(), None).unwrap();

        assert_eq!(parse_table(file.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_add_duplicate_mountpoint_rejected() {
        let file = sample_file();
        let record = MountRecord::new("UUID=other", "/mnt/nas", "ext4", "ro").with_dump_pass(1, 2);

        let err = add_record(&record, file.path(), None).unwrap_err();

        assert!(matches!(err, Error::DuplicateMountpoint { ref mountpoint } if mountpoint == "/mnt/nas"));
        assert_eq!(fs::read_to_string(file.path()).unwrap(), SAMPLE_FSTAB);
    }

    #[test]
    fn test_add_invalid_record_never_writes() {
        let file = sample_file();
        let backup_dir = TempDir::new().unwrap();
        let record = MountRecord::new("UUID=1", "relative", "ext4", "defaults");

        let err = add_record(&record, file.path(), Some(backup_dir.path())).unwrap_err();

        assert!(matches!(
            err,
            Error::Validation {
                violation: Violation::RelativeMountpoint { .. }
            }
        ));
        assert_eq!(fs::read_to_string(file.path()).unwrap(), SAMPLE_FSTAB);
        assert_eq!(fs::read_dir(backup_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_remove_record_rewrites_table() {
        let file = sample_file();
        let backup_dir = TempDir::new().unwrap();

        assert!(remove_record("/mnt/nas", file.path(), Some(backup_dir.path())).unwrap());

        let records = parse_table(file.path()).unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.mountpoint != "/mnt/nas"));

        let content = fs::read_to_string(file.path()).unwrap();
        assert!(content.starts_with(HEADER_LINES[0]));
        assert!(!content.contains("broken line"));

        let backups: Vec<_> = fs::read_dir(backup_dir.path()).unwrap().collect();
        assert_eq!(backups.len(), 1);
        let backup = backups[0].as_ref().unwrap().path();
        assert_eq!(fs::read_to_string(backup).unwrap(), SAMPLE_FSTAB);
    }

    #[test]
    fn test_remove_unknown_mountpoint_is_noop() {
        let file = sample_file();
        let backup_dir = TempDir::new().unwrap();

        assert!(!remove_record("/mnt/missing", file.path(), Some(backup_dir.path())).unwrap());
        assert_eq!(fs::read_to_string(file.path()).unwrap(), SAMPLE_FSTAB);
        assert_eq!(fs::read_dir(backup_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_replace_record() {
        let file = sample_file();
        let updated = MountRecord::new("//fritz.box/Media", "/mnt/nas", "cifs", "vers=3.0");

        assert!(replace_record(&updated, file.path(), None).unwrap());
        assert_eq!(find_record(file.path(), "/mnt/nas").unwrap(), Some(updated));

        let absent = MountRecord::new("/dev/sdz1", "/mnt/none", "ext4", "defaults");
        assert!(!replace_record(&absent, file.path(), None).unwrap());
    }

    #[test]
    fn test_preview_changes_marks_differences() {
        let mut file = NamedTempFile::new().unwrap();
        let records = vec![
            MountRecord::new("UUID=abc-123", "/", "ext4", "defaults").with_dump_pass(0, 1),
        ];
        file.write_all(render_table(&records).as_bytes()).unwrap();

        let mut new_records = records.clone();
        new_records.push(MountRecord::new("//nas/share", "/mnt/nas", "cifs", "defaults"));

        let preview = preview_changes(&new_records, file.path());

        assert!(preview.starts_with("=== fstab Changes Preview ==="));
        assert!(preview.contains("--- Current\n+++ New"));
        assert!(preview.contains("+ //nas/share\t/mnt/nas\tcifs\tdefaults\t0\t0"));
        assert!(!preview.contains("- UUID=abc-123"));
    }

    #[test]
    fn test_preview_missing_file_shows_all_additions() {
        let dir = TempDir::new().unwrap();
        let records = vec![MountRecord::new("/dev/sda1", "/", "ext4", "defaults")];

        let preview = preview_changes(&records, &dir.path().join("fstab"));

        assert!(preview.contains(&format!("+ {}", HEADER_LINES[0])));
        assert!(preview.contains("+ /dev/sda1\t/\text4\tdefaults\t0\t0"));
    }
}
