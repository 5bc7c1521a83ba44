use clap::Args;
use miette::Result;
use pve_manager::{CreateVm, PveConfig, VmId, VmSpec};

use super::Session;

#[derive(Args)]
pub struct CreateArgs {
    /// VM ID (defaults to the configured template id)
    #[arg(long)]
    pub(super) vmid: Option<VmId>,

    /// VM name (defaults to the configured template name)
    #[arg(long)]
    pub(super) name: Option<String>,

    /// Memory in MB
    #[arg(long, default_value_t = 2048, value_parser = clap::value_parser!(u32).range(1..))]
    pub(super) memory: u32,

    /// Number of CPU cores
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    pub(super) cores: u32,

    /// Disk size in GB
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..))]
    pub(super) disk_size: u32,

    /// ISO volume to boot from (defaults to the configured ISO)
    #[arg(long)]
    pub(super) iso: Option<String>,
}

impl CreateArgs {
    fn spec(self, config: &PveConfig) -> VmSpec {
        VmSpec {
            vmid: self.vmid.unwrap_or(config.template.vmid),
            name: self.name.unwrap_or_else(|| config.template.name.clone()),
            memory_mb: self.memory,
            cores: self.cores,
            disk_gb: self.disk_size,
            iso: self.iso.or_else(|| config.iso.clone()),
        }
    }
}

pub async fn run(args: CreateArgs, config: &PveConfig, session: &Session) -> Result<()> {
    let spec = args.spec(config);
    let req = CreateVm::new(&spec, &config.storage, &config.bridge);
    session.create_vm(&req, &mut std::io::stdout()).await?;
    Ok(())
}
