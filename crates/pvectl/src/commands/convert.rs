use clap::Args;
use miette::Result;
use pve_manager::VmId;

use super::Session;

#[derive(Args)]
pub struct ConvertArgs {
    /// VM ID to convert
    #[arg(long)]
    pub(super) vmid: VmId,
}

pub async fn run(args: ConvertArgs, session: &Session) -> Result<()> {
    session
        .convert_to_template(args.vmid, &mut std::io::stdout())
        .await?;
    Ok(())
}
