//! mountrix-core: fstab record management and mount orchestration.
//!
//! This library maintains `/etc/fstab`-style mount tables for local and
//! network filesystems (NFS, SMB/CIFS, SSHFS) and drives `mount`/`umount`,
//! translating their exit codes into actionable results.
//!
//! # Modules
//!
//! - [`record`]: Mount table entry model
//! - [`validate`]: Entry validation before writes
//! - [`fstab`]: Table parsing, backup and persistence
//! - [`template`]: NAS vendor templates
//! - [`mount`]: Mountpoint creation, mount/unmount/remount
//! - [`mtab`]: Live mount table inspection
//! - [`executor`]: Subprocess execution with timeouts and privilege escalation
//! - [`config`]: Runtime configuration
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use mountrix_core::{fstab, template, Mounter, TemplateInput};
//!
//! let catalog = template::catalog().unwrap();
//! let synology = catalog.get("synology").unwrap();
//!
//! let input = TemplateInput::new("192.168.1.20", "media", "/mnt/media");
//! let record = template::apply_template(synology, &input, false).unwrap();
//!
//! // Both steps require root:
//! fstab::add_record(&record, Path::new("/etc/fstab"), Some(Path::new("/var/backups"))).unwrap();
//! let result = Mounter::default().mount(&record);
//! println!("{}", result.message);
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod fstab;
pub mod mount;
pub mod mtab;
pub mod record;
pub mod template;
pub mod validate;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use mount::{MountResult, Mounter};
pub use mtab::{LiveMount, MountStateReader};
pub use record::{FsKind, MountRecord, Protocol};
pub use template::{NasTemplate, TemplateCatalog, TemplateInput};
pub use validate::Violation;
