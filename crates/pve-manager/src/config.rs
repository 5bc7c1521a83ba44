//! Connection and placement settings.
//!
//! Values are layered: built-in defaults, then a KDL config file, then command-line flags and
//! environment variables. [`PartialConfig`] holds one layer; [`PartialConfig::resolve`] turns the
//! merged layers into a complete [`PveConfig`].

use std::fmt;
use std::path::{Path, PathBuf};

use kdl::{KdlDocument, KdlValue};
use tracing::{debug, warn};

use crate::error::{PveError, Result};
use crate::types::VmId;

pub const DEFAULT_PORT: u16 = 8006;
pub const DEFAULT_STORAGE: &str = "local-zfs";
pub const DEFAULT_ISO: &str = "local:iso/ubuntu-24.04.2-live-server-amd64.iso";
pub const DEFAULT_BRIDGE: &str = "vmbr0";
pub const DEFAULT_TEMPLATE_VMID: u32 = 9000;
pub const DEFAULT_TEMPLATE_NAME: &str = "ubuntu-2404-template";
pub const DEFAULT_SSH_USER: &str = "root";

const KNOWN_KEYS: &[&str] = &[
    "host", "port", "node", "storage", "iso", "bridge", "insecure", "auth", "ssh", "template",
];

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PveConfig {
    pub host: String,
    pub port: u16,
    pub node: String,
    pub storage: String,
    pub iso: Option<String>,
    pub bridge: String,
    pub auth: Auth,
    /// Accept invalid TLS certificates from the API.
    pub insecure: bool,
    pub ssh: SshTarget,
    pub template: TemplateDefaults,
}

impl PveConfig {
    /// Base URL of the API, without a trailing slash.
    pub fn api_base(&self) -> String {
        format!("https://{}:{}", self.host, self.port)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    Password { user: String, password: String },
    /// API token in `USER@REALM!TOKENID=SECRET` form.
    Token(String),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            Auth::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
        }
    }
}

/// Where node commands are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub user: String,
    pub host: String,
}

/// Defaults for `create-vm` when no id or name is given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDefaults {
    pub vmid: VmId,
    pub name: String,
}

/// One layer of settings; unset values fall through to lower layers.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PartialConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub node: Option<String>,
    pub storage: Option<String>,
    pub iso: Option<String>,
    pub bridge: Option<String>,
    pub insecure: Option<bool>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub ssh_user: Option<String>,
    pub ssh_host: Option<String>,
    pub template_vmid: Option<VmId>,
    pub template_name: Option<String>,
}

impl fmt::Debug for PartialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("PartialConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("node", &self.node)
            .field("storage", &self.storage)
            .field("iso", &self.iso)
            .field("bridge", &self.bridge)
            .field("insecure", &self.insecure)
            .field("user", &self.user)
            .field("password", &redact(&self.password))
            .field("token", &redact(&self.token))
            .field("ssh_user", &self.ssh_user)
            .field("ssh_host", &self.ssh_host)
            .field("template_vmid", &self.template_vmid)
            .field("template_name", &self.template_name)
            .finish()
    }
}

impl PartialConfig {
    /// Overlay `higher` on top of `self`; values set in `higher` win.
    pub fn merge(self, higher: PartialConfig) -> PartialConfig {
        PartialConfig {
            host: higher.host.or(self.host),
            port: higher.port.or(self.port),
            node: higher.node.or(self.node),
            storage: higher.storage.or(self.storage),
            iso: higher.iso.or(self.iso),
            bridge: higher.bridge.or(self.bridge),
            insecure: higher.insecure.or(self.insecure),
            user: higher.user.or(self.user),
            password: higher.password.or(self.password),
            token: higher.token.or(self.token),
            ssh_user: higher.ssh_user.or(self.ssh_user),
            ssh_host: higher.ssh_host.or(self.ssh_host),
            template_vmid: higher.template_vmid.or(self.template_vmid),
            template_name: higher.template_name.or(self.template_name),
        }
    }

    /// Fill in defaults and check that the node and credentials are present.
    pub fn resolve(self) -> Result<PveConfig> {
        let node = self.node.ok_or_else(|| PveError::ConfigMissing {
            key: "node",
            hint: "set `node` in the config file, PVE_NODE, or pass --node".into(),
        })?;

        let auth = match (self.token, self.user, self.password) {
            (Some(token), _, _) => Auth::Token(token),
            (None, Some(user), Some(password)) => Auth::Password { user, password },
            _ => {
                return Err(PveError::ConfigMissing {
                    key: "auth",
                    hint: "provide an API token (PVE_TOKEN / --token) or a user and password \
                           (PVE_USER and PVE_PASSWORD / --user and --password)"
                        .into(),
                });
            }
        };

        let host = self.host.unwrap_or_else(|| node.clone());
        let ssh = SshTarget {
            user: self.ssh_user.unwrap_or_else(|| DEFAULT_SSH_USER.into()),
            host: self.ssh_host.unwrap_or_else(|| node.clone()),
        };
        let template = TemplateDefaults {
            vmid: self
                .template_vmid
                .or(VmId::new(DEFAULT_TEMPLATE_VMID))
                .ok_or_else(|| PveError::ConfigMissing {
                    key: "template.vmid",
                    hint: "set `template { vmid ... }` in the config file".into(),
                })?,
            name: self
                .template_name
                .unwrap_or_else(|| DEFAULT_TEMPLATE_NAME.into()),
        };

        Ok(PveConfig {
            host,
            port: self.port.unwrap_or(DEFAULT_PORT),
            node,
            storage: self.storage.unwrap_or_else(|| DEFAULT_STORAGE.into()),
            iso: Some(self.iso.unwrap_or_else(|| DEFAULT_ISO.into())).filter(|s| !s.is_empty()),
            bridge: self.bridge.unwrap_or_else(|| DEFAULT_BRIDGE.into()),
            auth,
            insecure: self.insecure.unwrap_or(false),
            ssh,
            template,
        })
    }
}

/// Default config file location: `{XDG_CONFIG_HOME}/pvectl/config.kdl`.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("pvectl").join("config.kdl"))
}

/// Find the config file to load.
///
/// An explicit path must exist. Without one, the default location is used if present.
pub fn discover(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(PveError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }
        return Ok(Some(path.to_path_buf()));
    }
    Ok(default_path().filter(|p| p.exists()))
}

/// Load the config file layer; an absent default file yields an empty layer.
pub fn load(explicit: Option<&Path>) -> Result<PartialConfig> {
    match discover(explicit)? {
        Some(path) => {
            debug!(path = %path.display(), "loading config file");
            let text = std::fs::read_to_string(&path)?;
            parse(&text, &path)
        }
        None => Ok(PartialConfig::default()),
    }
}

/// Parse KDL config text. `origin` is only used in error messages.
pub fn parse(text: &str, origin: &Path) -> Result<PartialConfig> {
    let doc: KdlDocument = text.parse().map_err(|source| PveError::ConfigParse {
        path: origin.to_path_buf(),
        source,
    })?;

    for node in doc.nodes() {
        let name = node.name().value();
        if !KNOWN_KEYS.contains(&name) {
            warn!(key = %name, path = %origin.display(), "ignoring unknown config key");
        }
    }

    let reader = Reader { origin };
    let mut cfg = PartialConfig {
        host: reader.string(&doc, "host")?,
        port: reader
            .integer(&doc, "port")?
            .map(|p| u16::try_from(p).map_err(|_| reader.invalid("port", "a port number")))
            .transpose()?,
        node: reader.string(&doc, "node")?,
        storage: reader.string(&doc, "storage")?,
        iso: reader.string(&doc, "iso")?,
        bridge: reader.string(&doc, "bridge")?,
        insecure: reader.boolean(&doc, "insecure")?,
        ..PartialConfig::default()
    };

    if let Some(auth) = children(&doc, "auth") {
        cfg.user = reader.string(auth, "user")?;
        cfg.password = reader.string(auth, "password")?;
        cfg.token = reader.string(auth, "token")?;
    }
    if let Some(ssh) = children(&doc, "ssh") {
        cfg.ssh_user = reader.string(ssh, "user")?;
        cfg.ssh_host = reader.string(ssh, "host")?;
    }
    if let Some(template) = children(&doc, "template") {
        cfg.template_vmid = reader
            .integer(template, "vmid")?
            .map(|id| {
                u32::try_from(id)
                    .ok()
                    .and_then(VmId::new)
                    .ok_or_else(|| reader.invalid("template.vmid", "a positive VM id"))
            })
            .transpose()?;
        cfg.template_name = reader.string(template, "name")?;
    }

    Ok(cfg)
}

fn children<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlDocument> {
    doc.get(name).and_then(|n| n.children())
}

struct Reader<'a> {
    origin: &'a Path,
}

impl Reader<'_> {
    fn invalid(&self, key: &str, expected: &'static str) -> PveError {
        PveError::ConfigInvalid {
            path: self.origin.to_path_buf(),
            key: key.to_string(),
            expected,
        }
    }

    fn value<'d>(&self, doc: &'d KdlDocument, key: &str) -> Option<&'d KdlValue> {
        doc.get_arg(key)
    }

    fn string(&self, doc: &KdlDocument, key: &str) -> Result<Option<String>> {
        self.value(doc, key)
            .map(|v| {
                v.as_string()
                    .map(str::to_string)
                    .ok_or_else(|| self.invalid(key, "a string"))
            })
            .transpose()
    }

    fn integer(&self, doc: &KdlDocument, key: &str) -> Result<Option<i128>> {
        self.value(doc, key)
            .map(|v| v.as_integer().ok_or_else(|| self.invalid(key, "an integer")))
            .transpose()
    }

    fn boolean(&self, doc: &KdlDocument, key: &str) -> Result<Option<bool>> {
        self.value(doc, key)
            .map(|v| v.as_bool().ok_or_else(|| self.invalid(key, "#true or #false")))
            .transpose()
    }
}
