use clap::Args;
use miette::Result;
use pve_manager::VmId;
use tracing::debug;

use super::Session;

#[derive(Args)]
pub struct RemoveArgs {
    /// VM ID to remove
    #[arg(long)]
    pub(super) vmid: VmId,

    /// Stop the VM first if it is running
    #[arg(long)]
    pub(super) force: bool,
}

pub async fn run(args: RemoveArgs, session: &Session) -> Result<()> {
    let outcome = session
        .remove_vm(args.vmid, args.force, &mut std::io::stdout())
        .await?;
    debug!(vmid = %args.vmid, stop = ?outcome.stop, task = %outcome.task, "delete task started");
    Ok(())
}
