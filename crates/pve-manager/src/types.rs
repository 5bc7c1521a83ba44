use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Config slots that can hold the primary disk of a VM.
pub const DISK_SLOTS: [&str; 2] = ["sata0", "scsi0"];

/// Config slot of the installer CD-ROM.
pub const CDROM_SLOT: &str = "ide2";

/// Value of a removable-media slot with nothing inserted.
pub const NO_MEDIA: &str = "none";

/// Numeric VM identifier, unique within a node. Always greater than zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmId(u32);

impl VmId {
    pub fn new(id: u32) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VmId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id: u32 = s
            .trim()
            .parse()
            .map_err(|e| format!("invalid VM id '{s}': {e}"))?;
        VmId::new(id).ok_or_else(|| format!("invalid VM id '{s}': must be greater than zero"))
    }
}

/// VM status string as reported by the API, compared verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmStatus(String);

impl VmStatus {
    pub const RUNNING: &'static str = "running";
    pub const STOPPED: &'static str = "stopped";

    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_running(&self) -> bool {
        self.0 == Self::RUNNING
    }

    pub fn is_stopped(&self) -> bool {
        self.0 == Self::STOPPED
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// VM configuration: device slot name to device spec.
///
/// The API mixes strings and numbers in this object, so values are kept as raw JSON and
/// rendered to text on access.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct VmConfig(BTreeMap<String, serde_json::Value>);

impl VmConfig {
    pub fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        match self.0.get(key)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(Cow::Borrowed(s.as_str())),
            other => Some(Cow::Owned(other.to_string())),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// First disk slot present in the config, if any.
    pub fn boot_disk(&self) -> Option<&'static str> {
        DISK_SLOTS.into_iter().find(|slot| self.contains(slot))
    }

    /// Media in the CD-ROM slot, unless the slot is absent or empty.
    pub fn attached_iso(&self) -> Option<Cow<'_, str>> {
        self.get(CDROM_SLOT).filter(|v| v != NO_MEDIA)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, serde_json::Value)> for VmConfig {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Proxmox task identifier (UPID) returned by asynchronous operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(upid: impl Into<String>) -> Self {
        Self(upid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operator-facing description of a VM to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSpec {
    pub vmid: VmId,
    pub name: String,
    pub memory_mb: u32,
    pub cores: u32,
    pub disk_gb: u32,
    /// ISO volume to attach as installer media, e.g. `local:iso/ubuntu.iso`.
    pub iso: Option<String>,
}

/// Body of `POST /nodes/{node}/qemu`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateVm {
    #[serde(rename = "vmid")]
    pub vm_id: VmId,
    pub name: String,
    #[serde(rename = "memory")]
    pub memory_mb: u32,
    pub cores: u32,
    pub sockets: u32,
    pub net0: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ide2: Option<String>,
    pub sata0: String,
    #[serde(rename = "ostype")]
    pub os_type: String,
    #[serde(rename = "scsihw")]
    pub scsi_hw: String,
    pub boot: String,
    #[serde(rename = "bootdisk")]
    pub boot_disk: String,
}

impl CreateVm {
    /// Build the create request for `spec`, with the disk on `storage` and the NIC on `bridge`.
    ///
    /// Boots from the CD-ROM first and declares the SATA disk as the boot disk so the VM falls
    /// back to the installed system once the ISO is detached.
    pub fn new(spec: &VmSpec, storage: &str, bridge: &str) -> Self {
        Self {
            vm_id: spec.vmid,
            name: spec.name.clone(),
            memory_mb: spec.memory_mb,
            cores: spec.cores,
            sockets: 1,
            net0: format!("virtio,bridge={bridge}"),
            ide2: spec.iso.as_ref().map(|iso| format!("{iso},media=cdrom")),
            sata0: format!("{storage}:{}", spec.disk_gb),
            os_type: "l26".into(),
            scsi_hw: "virtio-scsi-pci".into(),
            boot: "cdn".into(),
            boot_disk: "sata0".into(),
        }
    }
}

/// A command executed on the node itself rather than through the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCommand {
    /// `qm template <vmid>`
    Template(VmId),
}

impl NodeCommand {
    pub fn argv(&self) -> Vec<String> {
        match self {
            NodeCommand::Template(vmid) => {
                vec!["qm".into(), "template".into(), vmid.to_string()]
            }
        }
    }
}

impl fmt::Display for NodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

/// Captured result of a [`NodeCommand`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}
