//! The three VM lifecycle operations: create, convert to template, remove.
//!
//! Each operation writes human-readable progress lines to `out` and returns an error for any
//! failure; nothing is rolled back.

use std::collections::BTreeMap;
use std::io::Write;

use tracing::{debug, info, warn};

use crate::error::{PveError, Result};
use crate::poll::{PollOutcome, PollPolicy, poll_until};
use crate::traits::{NodeCommandRunner, VmApi};
use crate::types::{CDROM_SLOT, CreateVm, NO_MEDIA, NodeCommand, TaskId, VmId};

/// How the stop phase of [`Lifecycle::remove_vm`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopPhase {
    /// The VM was not running; no stop was requested.
    NotRunning,
    /// The VM reported `stopped` within the poll budget.
    Confirmed,
    /// The poll budget ran out with the VM still not stopped.
    TimedOut,
    /// The stop request or a status probe failed.
    Failed(String),
}

/// Result of a successful [`Lifecycle::remove_vm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub stop: StopPhase,
    pub task: TaskId,
}

/// Lifecycle operations against one node.
#[derive(Debug)]
pub struct Lifecycle<A, R> {
    api: A,
    runner: R,
    stop_poll: PollPolicy,
}

impl<A: VmApi, R: NodeCommandRunner> Lifecycle<A, R> {
    pub fn new(api: A, runner: R) -> Self {
        Self {
            api,
            runner,
            stop_poll: PollPolicy::STOP_CONFIRMATION,
        }
    }

    /// Override how long [`Self::remove_vm`] waits for a forced stop.
    pub fn with_stop_poll(mut self, policy: PollPolicy) -> Self {
        self.stop_poll = policy;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Create a VM that boots the installer ISO. Installing the OS and shutting the VM down is
    /// left to the operator.
    pub async fn create_vm(&self, req: &CreateVm, out: &mut impl Write) -> Result<TaskId> {
        let vmid = req.vm_id;
        writeln!(out, "Creating base VM {} with ID {}...", req.name, vmid)?;
        info!(%vmid, name = %req.name, node = %self.api.node(), "creating VM");

        let task = self
            .api
            .create_vm(req)
            .await
            .map_err(|e| PveError::CreateFailed {
                vmid,
                source: e.boxed(),
            })?;

        writeln!(out, "✅ VM created! (task {task})")?;
        writeln!(
            out,
            "🛠️ Install the OS manually from the ISO. Then shut down the VM."
        )?;
        Ok(task)
    }

    /// Convert a stopped VM into a template.
    ///
    /// Refuses unless the VM is `stopped` and has a disk on `sata0` or `scsi0`. An inserted ISO
    /// is ejected first; if that fails the VM is left untouched.
    pub async fn convert_to_template(&self, vmid: VmId, out: &mut impl Write) -> Result<()> {
        writeln!(out, "Converting VM with ID {vmid} to a template...")?;

        let status = self
            .api
            .vm_status(vmid)
            .await
            .map_err(|e| PveError::ConvertFailed {
                vmid,
                source: e.boxed(),
            })?;
        if !status.is_stopped() {
            return Err(PveError::NotStopped { vmid, status });
        }

        writeln!(out, "🔍 Fetching VM configuration...")?;
        let config = self
            .api
            .vm_config(vmid)
            .await
            .map_err(|e| PveError::ConvertFailed {
                vmid,
                source: e.boxed(),
            })?;
        debug!(%vmid, ?config, "VM configuration");

        let Some(disk) = config.boot_disk() else {
            return Err(PveError::NoBootDisk { vmid });
        };
        debug!(%vmid, disk, "found boot disk");

        if let Some(iso) = config.attached_iso() {
            writeln!(out, "🔧 Detaching ISO from VM...")?;
            info!(%vmid, iso = %iso, "detaching ISO");
            let changes = BTreeMap::from([(CDROM_SLOT.to_string(), NO_MEDIA.to_string())]);
            self.api
                .update_config(vmid, &changes)
                .await
                .map_err(|e| PveError::DetachFailed {
                    vmid,
                    source: e.boxed(),
                })?;
            writeln!(out, "✅ ISO detached successfully.")?;
        }

        let cmd = NodeCommand::Template(vmid);
        writeln!(
            out,
            "🔧 Executing '{cmd}' on {} for VM ID {vmid}...",
            self.runner.target()
        )?;
        let output = self
            .runner
            .run(&cmd)
            .await
            .map_err(|e| PveError::ConvertFailed {
                vmid,
                source: e.boxed(),
            })?;
        if !output.success() {
            let failure = PveError::CommandFailed {
                command: cmd.to_string(),
                target: self.runner.target().to_string(),
                code: output
                    .code
                    .map_or_else(|| "a signal".to_string(), |c| format!("code {c}")),
                stderr: output.stderr.trim().to_string(),
            };
            return Err(PveError::ConvertFailed {
                vmid,
                source: failure.boxed(),
            });
        }

        writeln!(out, "✅ VM successfully converted to template!")?;
        Ok(())
    }

    /// Delete a VM. A running VM is only removed with `force`, after a stop request.
    ///
    /// Deletion is attempted even when the stop could not be confirmed.
    pub async fn remove_vm(
        &self,
        vmid: VmId,
        force: bool,
        out: &mut impl Write,
    ) -> Result<RemoveOutcome> {
        writeln!(out, "Removing VM with ID {vmid}...")?;

        let status = self
            .api
            .vm_status(vmid)
            .await
            .map_err(|e| PveError::VmNotFound {
                vmid,
                source: e.boxed(),
            })?;

        let stop = if status.is_running() {
            if !force {
                return Err(PveError::VmRunning { vmid });
            }
            self.force_stop(vmid, out).await?
        } else {
            StopPhase::NotRunning
        };

        let task = self
            .api
            .delete_vm(vmid)
            .await
            .map_err(|e| PveError::RemoveFailed {
                vmid,
                source: e.boxed(),
            })?;

        writeln!(out, "✅ VM with ID {vmid} successfully removed!")?;
        Ok(RemoveOutcome { stop, task })
    }

    async fn force_stop(&self, vmid: VmId, out: &mut impl Write) -> Result<StopPhase> {
        writeln!(out, "🛑 Stopping VM with ID {vmid} forcefully...")?;
        if let Err(e) = self.api.stop_vm(vmid).await {
            warn!(%vmid, error = %e, "stop request failed");
            writeln!(out, "⚠️ Error stopping VM: {e}, but proceeding with removal...")?;
            return Ok(StopPhase::Failed(e.to_string()));
        }

        writeln!(out, "⏳ Waiting for VM to stop...")?;
        let outcome = poll_until(
            self.stop_poll,
            || self.api.vm_status(vmid),
            |status| status.is_stopped(),
        )
        .await;

        let phase = match outcome {
            PollOutcome::Reached(_) => {
                writeln!(out, "✅ VM stopped successfully.")?;
                StopPhase::Confirmed
            }
            PollOutcome::TimedOut { attempts } => {
                // Deleting an unconfirmed VM is the established behaviour; keep the warning loud.
                warn!(%vmid, attempts, "VM did not report stopped");
                writeln!(
                    out,
                    "⚠️ Timed out waiting for VM to stop, but proceeding with removal..."
                )?;
                StopPhase::TimedOut
            }
            PollOutcome::Failed(e) => {
                warn!(%vmid, error = %e, "status query failed while waiting for stop");
                writeln!(out, "⚠️ Error stopping VM: {e}, but proceeding with removal...")?;
                StopPhase::Failed(e.to_string())
            }
        };
        Ok(phase)
    }
}
