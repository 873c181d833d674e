//! Runtime configuration.
//!
//! Loaded from `<config_dir>/mountrix/config.json` when present. Every key
//! is optional; missing keys take the system defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{ConfigSnafu, NotFoundSnafu, Result};
use crate::executor::{ExecutionContext, PrivilegeEscalation};
use crate::fstab::{BACKUP_DIR, FSTAB_PATH};
use crate::mount::{MOUNT_TIMEOUT, Mounter};
use crate::mtab::{MountStateReader, PROBE_TIMEOUT, PROC_MOUNTS};
use crate::template::{TemplateCatalog, catalog};

const APP_DIR: &str = "mountrix";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mount table managed by the table store.
    pub fstab_path: PathBuf,
    /// Where timestamped backups are written before each change.
    pub backup_dir: PathBuf,
    /// Live mount table in `/proc/mounts` format.
    pub mounts_path: PathBuf,
    pub mount_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub escalation: PrivilegeEscalation,
    /// Replaces the bundled template catalog.
    pub templates_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fstab_path: PathBuf::from(FSTAB_PATH),
            backup_dir: PathBuf::from(BACKUP_DIR),
            mounts_path: PathBuf::from(PROC_MOUNTS),
            mount_timeout_secs: MOUNT_TIMEOUT.as_secs(),
            probe_timeout_secs: PROBE_TIMEOUT.as_secs(),
            escalation: PrivilegeEscalation::None,
            templates_path: None,
        }
    }
}

impl Config {
    /// Per-user config file location, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Loads the per-user config file, or defaults when there is none.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        ensure!(path.exists(), NotFoundSnafu { path });

        let content = fs::read_to_string(path).map_err(|e| {
            ConfigSnafu {
                path,
                message: e.to_string(),
            }
            .build()
        })?;
        let config: Config = serde_json::from_str(&content).map_err(|e| {
            ConfigSnafu {
                path,
                message: e.to_string(),
            }
            .build()
        })?;

        log::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::with_escalation(self.escalation)
    }

    pub fn state_reader(&self) -> MountStateReader {
        MountStateReader::new(&self.mounts_path)
            .with_probe_timeout(Duration::from_secs(self.probe_timeout_secs))
    }

    pub fn mounter(&self) -> Mounter {
        Mounter::new(self.execution_context())
            .with_state(self.state_reader())
            .with_timeout(Duration::from_secs(self.mount_timeout_secs))
    }

    /// The configured template catalog, or the bundled one.
    pub fn catalog(&self) -> Result<TemplateCatalog> {
        match &self.templates_path {
            Some(path) => TemplateCatalog::load(path),
            None => Ok(catalog()?.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.fstab_path, Path::new("/etc/fstab"));
        assert_eq!(config.backup_dir, Path::new("/var/backups"));
        assert_eq!(config.mounts_path, Path::new("/proc/mounts"));
        assert_eq!(config.mount_timeout_secs, 30);
        assert_eq!(config.probe_timeout_secs, 5);
        assert_eq!(config.escalation, PrivilegeEscalation::None);
        assert!(config.templates_path.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "fstab_path": "/tmp/fstab.test", "escalation": "sudo" }"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();

        assert_eq!(config.fstab_path, Path::new("/tmp/fstab.test"));
        assert_eq!(config.escalation, PrivilegeEscalation::Sudo);
        assert_eq!(config.backup_dir, Path::new("/var/backups"));
        assert_eq!(config.execution_context().escalation(), PrivilegeEscalation::Sudo);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Config::load_from(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "escalation": "doas" }"#).unwrap();

        let err = Config::load_from(&path).unwrap_err();

        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn test_catalog_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("templates.json");
        fs::write(
            &path,
            r#"{
                "office": {
                    "name": "Office NAS",
                    "protocol": "cifs",
                    "default_port": 445,
                    "default_share_path": "//{host}/{share}",
                    "default_options": ["vers=3.0"],
                    "auth_method": "credentials",
                    "description": "Shared office storage",
                    "help_url": ""
                }
            }"#,
        )
        .unwrap();

        let config = Config {
            templates_path: Some(path),
            ..Config::default()
        };
        let catalog = config.catalog().unwrap();

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("office").unwrap().name, "Office NAS");
        assert!(Config::default().catalog().unwrap().get("synology").is_some());
    }
}
