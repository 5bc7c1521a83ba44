use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::types::{VmId, VmStatus};

pub type Result<T> = std::result::Result<T, PveError>;

#[derive(Debug, Error, Diagnostic)]
pub enum PveError {
    #[error("VM with ID {vmid} is not stopped (status: {status})")]
    #[diagnostic(
        code(pve::vm::not_stopped),
        help("shut the VM down before converting it to a template")
    )]
    NotStopped { vmid: VmId, status: VmStatus },

    #[error("VM with ID {vmid} does not have a valid disk attached (expected sata0 or scsi0)")]
    #[diagnostic(
        code(pve::vm::no_disk),
        help("attach a disk to the VM before converting it to a template")
    )]
    NoBootDisk { vmid: VmId },

    #[error("VM with ID {vmid} is running")]
    #[diagnostic(code(pve::vm::running), help("use --force to stop and remove it anyway"))]
    VmRunning { vmid: VmId },

    #[error("VM with ID {vmid} does not exist")]
    #[diagnostic(code(pve::vm::not_found))]
    VmNotFound {
        vmid: VmId,
        #[source]
        source: Box<PveError>,
    },

    #[error("failed to create VM {vmid}")]
    #[diagnostic(code(pve::vm::create_failed))]
    CreateFailed {
        vmid: VmId,
        #[source]
        source: Box<PveError>,
    },

    #[error("failed to detach ISO from VM {vmid}")]
    #[diagnostic(code(pve::vm::detach_failed))]
    DetachFailed {
        vmid: VmId,
        #[source]
        source: Box<PveError>,
    },

    #[error("failed to convert VM {vmid} to a template")]
    #[diagnostic(code(pve::vm::convert_failed))]
    ConvertFailed {
        vmid: VmId,
        #[source]
        source: Box<PveError>,
    },

    #[error("failed to remove VM {vmid}")]
    #[diagnostic(code(pve::vm::remove_failed))]
    RemoveFailed {
        vmid: VmId,
        #[source]
        source: Box<PveError>,
    },

    #[error("{method} {path} returned {status}: {body}")]
    #[diagnostic(code(pve::api::status))]
    Api {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    #[error("{method} {path} returned no task id")]
    #[diagnostic(code(pve::api::no_task))]
    MissingTask { method: String, path: String },

    #[error("login as {user} failed")]
    #[diagnostic(
        code(pve::api::login),
        help("check the user (e.g. root@pam) and password, or use an API token")
    )]
    LoginFailed {
        user: String,
        #[source]
        source: Box<PveError>,
    },

    #[error("HTTP request failed")]
    #[diagnostic(code(pve::http))]
    Http(#[from] reqwest::Error),

    #[error("invalid JSON from the API")]
    #[diagnostic(code(pve::json))]
    Json(#[from] serde_json::Error),

    #[error("invalid header value for {name}")]
    #[diagnostic(code(pve::api::header))]
    InvalidHeader { name: &'static str },

    #[error("failed to launch {}", .binary.display())]
    #[diagnostic(
        code(pve::node::spawn),
        help("make sure the ssh client is installed and on PATH")
    )]
    CommandSpawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` on {target} exited with {code}: {stderr}")]
    #[diagnostic(code(pve::node::command_failed))]
    CommandFailed {
        command: String,
        target: String,
        code: String,
        stderr: String,
    },

    #[error("cannot quote command for the remote shell: {detail}")]
    #[diagnostic(code(pve::node::quote))]
    Quote { detail: String },

    #[error("config file {} not found", .path.display())]
    #[diagnostic(code(pve::config::not_found))]
    ConfigNotFound { path: PathBuf },

    #[error("failed to parse config file {}", .path.display())]
    #[diagnostic(code(pve::config::parse))]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: kdl::KdlError,
    },

    #[error("invalid value for `{key}` in {}: expected {expected}", .path.display())]
    #[diagnostic(code(pve::config::invalid))]
    ConfigInvalid {
        path: PathBuf,
        key: String,
        expected: &'static str,
    },

    #[error("missing configuration: {key}")]
    #[diagnostic(code(pve::config::missing))]
    ConfigMissing {
        key: &'static str,
        #[help]
        hint: String,
    },

    #[error(transparent)]
    #[diagnostic(code(pve::io))]
    Io(#[from] std::io::Error),
}

impl PveError {
    pub(crate) fn boxed(self) -> Box<PveError> {
        Box::new(self)
    }
}
