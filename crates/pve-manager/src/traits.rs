use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::{CommandOutput, CreateVm, NodeCommand, TaskId, VmConfig, VmId, VmStatus};

/// VM operations against a single node's management API.
///
/// [`crate::ProxmoxClient`] is the real implementation; the lifecycle operations are generic over
/// this trait so they can run against in-memory fakes.
#[allow(async_fn_in_trait)]
pub trait VmApi {
    /// Name of the node this API is bound to.
    fn node(&self) -> &str;

    async fn create_vm(&self, req: &CreateVm) -> Result<TaskId>;

    async fn vm_status(&self, vmid: VmId) -> Result<VmStatus>;

    async fn vm_config(&self, vmid: VmId) -> Result<VmConfig>;

    /// Apply `changes` to the VM config. Returns the task id when the API runs the update
    /// asynchronously.
    async fn update_config(
        &self,
        vmid: VmId,
        changes: &BTreeMap<String, String>,
    ) -> Result<Option<TaskId>>;

    /// Request a hard stop. Returns once the request is accepted, not once the VM is down.
    async fn stop_vm(&self, vmid: VmId) -> Result<TaskId>;

    async fn delete_vm(&self, vmid: VmId) -> Result<TaskId>;
}

/// Runs commands on the hypervisor host for operations the API cannot perform.
#[allow(async_fn_in_trait)]
pub trait NodeCommandRunner {
    /// Where commands are executed, for display.
    fn target(&self) -> &str;

    /// Run `cmd` and capture its output. A non-zero exit is reported in the output, not as
    /// an error; errors mean the command could not be run at all.
    async fn run(&self, cmd: &NodeCommand) -> Result<CommandOutput>;
}
