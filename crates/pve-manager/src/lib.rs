pub mod config;
pub mod error;
pub mod lifecycle;
pub mod poll;
pub mod proxmox;
pub mod ssh;
pub mod traits;
pub mod types;

pub use config::{Auth, PartialConfig, PveConfig, SshTarget, TemplateDefaults};
pub use error::{PveError, Result};
pub use lifecycle::{Lifecycle, RemoveOutcome, StopPhase};
pub use poll::{PollOutcome, PollPolicy, poll_until};
pub use proxmox::ProxmoxClient;
pub use ssh::SshRunner;
pub use traits::{NodeCommandRunner, VmApi};
pub use types::{CommandOutput, CreateVm, NodeCommand, TaskId, VmConfig, VmId, VmSpec, VmStatus};
