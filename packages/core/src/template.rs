//! NAS template definitions.
//!
//! A template is a vendor preset (protocol, default options, auth method)
//! that turns a handful of user answers into a complete [`MountRecord`].
//! The bundled catalog is parsed once, on first use, and never mutated.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

use crate::error::{
    ConfigSnafu, MissingFieldSnafu, NotFoundSnafu, Result, TemplateCatalogSnafu,
    UnsupportedProtocolSnafu,
};
use crate::record::{DEFAULT_OPTION, MountRecord, Protocol};

/// Catalog shipped with the library.
const BUNDLED_CATALOG: &str = include_str!("../data/nas_templates.json");

static CATALOG: OnceLock<TemplateCatalog> = OnceLock::new();

/// How a template authenticates against the share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Username/password, ideally through a credentials file.
    Credentials,
    /// Guest or host-based access.
    None,
    /// SSH key of the mounting user.
    Key,
}

/// A vendor preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NasTemplate {
    /// Catalog key (e.g. "fritznas"). Filled in from the map key on load.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub protocol: Protocol,
    pub default_port: u16,
    /// Source pattern with `{host}`, `{share}`, `{export}`, `{username}`
    /// placeholders; only used for protocols without a fixed source format.
    pub default_share_path: String,
    pub default_options: Vec<String>,
    pub auth_method: AuthMethod,
    pub description: String,
    pub help_url: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub nfs_support: bool,
    #[serde(default)]
    pub nfs_options: Option<Vec<String>>,
    /// Device only speaks SMB1.
    #[serde(default)]
    pub legacy_smb: bool,
}

/// User answers fed into [`apply_template`].
///
/// `host` and `mountpoint` are required; an empty string counts as missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateInput {
    pub host: Option<String>,
    pub share: Option<String>,
    pub export: Option<String>,
    pub mountpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub credentials_file: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl TemplateInput {
    pub fn new(host: impl Into<String>, share: impl Into<String>, mountpoint: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            share: Some(share.into()),
            mountpoint: Some(mountpoint.into()),
            ..Self::default()
        }
    }

    /// Looks up a placeholder value by name.
    fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "host" => &self.host,
            "share" => &self.share,
            "export" => &self.export,
            "mountpoint" => &self.mountpoint,
            "username" => &self.username,
            _ => return None,
        };
        present(value)
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Read-only registry of templates, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, NasTemplate>,
}

impl TemplateCatalog {
    /// Parses a catalog from its JSON form (`{ "<id>": { ... }, ... }`).
    pub fn from_json(json: &str) -> Result<Self> {
        let mut templates: BTreeMap<String, NasTemplate> =
            serde_json::from_str(json).context(TemplateCatalogSnafu)?;
        for (id, template) in templates.iter_mut() {
            template.id = id.clone();
        }
        Ok(Self { templates })
    }

    /// Parses the catalog compiled into the library.
    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED_CATALOG)
    }

    /// Loads a catalog file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        ensure!(path.exists(), NotFoundSnafu { path });
        let json = fs::read_to_string(path).map_err(|e| {
            ConfigSnafu {
                path,
                message: e.to_string(),
            }
            .build()
        })?;
        Self::from_json(&json)
    }

    pub fn get(&self, id: &str) -> Option<&NasTemplate> {
        self.templates.get(id)
    }

    /// All templates, ordered by id.
    pub fn list(&self) -> Vec<&NasTemplate> {
        self.templates.values().collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Human readable help for a template.
    pub fn help(&self, id: &str) -> Option<String> {
        self.get(id).map(template_help)
    }
}

/// Returns the process-wide bundled catalog, parsing it on first call.
pub fn catalog() -> Result<&'static TemplateCatalog> {
    if let Some(catalog) = CATALOG.get() {
        return Ok(catalog);
    }
    let parsed = TemplateCatalog::bundled()?;
    Ok(CATALOG.get_or_init(|| parsed))
}

fn template_help(template: &NasTemplate) -> String {
    let mut help = format!("{}\n", template.name);
    help.push_str(&"=".repeat(template.name.chars().count()));
    help.push_str("\n\n");
    help.push_str(&format!("{}\n\n", template.description));

    if let Some(notes) = &template.notes {
        help.push_str(&format!("Notes:\n{}\n\n", notes));
    }

    help.push_str(&format!(
        "Protocol: {}\n",
        template.protocol.fs_type().to_uppercase()
    ));
    help.push_str(&format!("Default Port: {}\n", template.default_port));

    if template.nfs_support {
        help.push_str("NFS Support: Yes\n");
    }
    if template.legacy_smb {
        help.push_str("Legacy SMB: Yes (SMB1)\n");
    }

    help.push_str(&format!("\nHelp: {}\n", template.help_url));
    help
}

/// Builds a mount record from a template and the user's answers.
///
/// # Errors
/// - [`crate::Error::MissingField`] listing every absent required field.
/// - [`crate::Error::UnsupportedProtocol`] if `use_nfs` is set on a template
///   without NFS support.
pub fn apply_template(
    template: &NasTemplate,
    input: &TemplateInput,
    use_nfs: bool,
) -> Result<MountRecord> {
    let host = present(&input.host);
    let mountpoint = present(&input.mountpoint);
    let (Some(host), Some(mountpoint)) = (host, mountpoint) else {
        let mut fields = Vec::new();
        if host.is_none() {
            fields.push("host");
        }
        if mountpoint.is_none() {
            fields.push("mountpoint");
        }
        return MissingFieldSnafu { fields }.fail();
    };

    let (protocol, mut options) = if use_nfs {
        ensure!(
            template.nfs_support,
            UnsupportedProtocolSnafu {
                template: template.name.clone(),
                protocol: "NFS",
            }
        );
        let protocol = match template.protocol {
            Protocol::Nfs => Protocol::Nfs,
            _ => Protocol::Nfs4,
        };
        let options = template
            .nfs_options
            .clone()
            .filter(|o| !o.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_OPTION.to_string()]);
        (protocol, options)
    } else {
        (template.protocol, template.default_options.clone())
    };

    let share = present(&input.share).unwrap_or("");
    let source = if protocol.is_smb() {
        format!("//{}/{}", host, share)
    } else if protocol.is_nfs() {
        let export = present(&input.export).unwrap_or(share);
        format!("{}:{}", host, export)
    } else {
        expand_share_path(&template.default_share_path, input)?
    };

    if template.auth_method == AuthMethod::Credentials {
        if let Some(file) = present(&input.credentials_file) {
            options.push(format!("credentials={}", file));
        } else if let Some(username) = present(&input.username) {
            options.push(format!("username={}", username));
            if let Some(password) = present(&input.password) {
                log::warn!(
                    "embedding a plain-text password in mount options for {}; prefer a credentials file",
                    mountpoint
                );
                options.push(format!("password={}", password));
            }
        }
    }

    // Plain substring test against the joined options: an existing `uid=1000`
    // also suppresses a requested `uid=100`.
    if let Some(uid) = input.uid {
        let opt = format!("uid={}", uid);
        if !options.join(",").contains(&opt) {
            options.push(opt);
        }
    }
    if let Some(gid) = input.gid {
        let opt = format!("gid={}", gid);
        if !options.join(",").contains(&opt) {
            options.push(opt);
        }
    }

    Ok(MountRecord {
        source,
        mountpoint: mountpoint.to_string(),
        fs_type: protocol.fs_type().to_string(),
        options,
        dump: 0,
        pass_num: 0,
        comment: Some(format!("{} - {}", template.name, template.description)),
    })
}

/// Substitutes `{field}` placeholders in a share path pattern.
///
/// Unknown placeholders are kept verbatim; known ones without a value are
/// reported together as missing fields.
fn expand_share_path(pattern: &str, input: &TemplateInput) -> Result<String> {
    let mut expanded = String::with_capacity(pattern.len());
    let mut missing: Vec<&'static str> = Vec::new();
    let mut rest = pattern;

    while let Some(start) = rest.find('{') {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            expanded.push_str(&rest[start..]);
            rest = "";
            break;
        };

        let name = &after[..end];
        match (placeholder_name(name), input.field(name)) {
            (Some(_), Some(value)) => expanded.push_str(value),
            (Some(known), None) => {
                if !missing.contains(&known) {
                    missing.push(known);
                }
            }
            (None, _) => {
                expanded.push('{');
                expanded.push_str(name);
                expanded.push('}');
            }
        }
        rest = &after[end + 1..];
    }
    expanded.push_str(rest);

    ensure!(missing.is_empty(), MissingFieldSnafu { fields: missing });
    Ok(expanded)
}

fn placeholder_name(name: &str) -> Option<&'static str> {
    ["host", "share", "export", "mountpoint", "username"]
        .into_iter()
        .find(|known| *known == name)
}
