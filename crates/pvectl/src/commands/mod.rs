pub mod convert;
pub mod create;
pub mod remove;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use miette::Result;
use pve_manager::{Lifecycle, PartialConfig, ProxmoxClient, PveConfig, SshRunner, config};

/// Lifecycle bound to the real API and ssh transport.
pub type Session = Lifecycle<ProxmoxClient, SshRunner>;

#[derive(Parser)]
#[command(
    name = "pvectl",
    about = "Create, template and remove Proxmox VMs",
    version
)]
pub struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new VM that boots the installer ISO
    CreateVm(create::CreateArgs),
    /// Convert a stopped VM into a template
    ConvertTemplate(convert::ConvertArgs),
    /// Remove a VM
    RemoveVm(remove::RemoveArgs),
}

/// Connection settings; each overrides the config file.
#[derive(Args, Default)]
struct ConnectionArgs {
    /// Path to a KDL config file
    #[arg(long, global = true, env = "PVECTL_CONFIG")]
    config: Option<PathBuf>,

    /// API host name (defaults to the node name)
    #[arg(long, global = true, env = "PVE_HOST")]
    host: Option<String>,

    /// API port
    #[arg(long, global = true, env = "PVE_PORT")]
    port: Option<u16>,

    /// Node that owns the VMs
    #[arg(long, global = true, env = "PVE_NODE")]
    node: Option<String>,

    /// Login user, e.g. root@pam
    #[arg(long, global = true, env = "PVE_USER")]
    user: Option<String>,

    /// Login password
    #[arg(long, global = true, env = "PVE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// API token (USER@REALM!TOKENID=SECRET), used instead of user and password
    #[arg(long, global = true, env = "PVE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Accept invalid TLS certificates from the API (insecure); `--insecure=false` turns it off
    #[arg(
        long,
        global = true,
        env = "PVE_INSECURE",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    insecure: Option<bool>,
}

impl ConnectionArgs {
    fn overrides(&self) -> PartialConfig {
        PartialConfig {
            host: self.host.clone(),
            port: self.port,
            node: self.node.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            token: self.token.clone(),
            insecure: self.insecure,
            ..PartialConfig::default()
        }
    }

    fn resolve(&self) -> Result<PveConfig> {
        let file = config::load(self.config.as_deref())?;
        Ok(file.merge(self.overrides()).resolve()?)
    }
}

async fn connect(config: &PveConfig) -> Result<Session> {
    let api = ProxmoxClient::connect(config).await?;
    Ok(Lifecycle::new(api, SshRunner::new(&config.ssh)))
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = self.connection.resolve()?;
        let session = connect(&config).await?;
        match self.command {
            Command::CreateVm(args) => create::run(args, &config, &session).await,
            Command::ConvertTemplate(args) => convert::run(args, &session).await,
            Command::RemoveVm(args) => remove::run(args, &session).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("pvectl").chain(args.iter().copied()))
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subcommand_is_required() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["list"]).is_err());
    }

    #[test]
    fn create_defaults() {
        let cli = parse(&["create-vm"]).unwrap();
        let Command::CreateVm(args) = cli.command else {
            panic!("expected create-vm");
        };
        assert_eq!(args.vmid, None);
        assert_eq!(args.name, None);
        assert_eq!(args.memory, 2048);
        assert_eq!(args.cores, 2);
        assert_eq!(args.disk_size, 20);
    }

    #[test]
    fn create_with_values() {
        let cli = parse(&[
            "create-vm",
            "--vmid",
            "101",
            "--name",
            "test",
            "--memory",
            "1024",
            "--cores",
            "1",
            "--disk-size",
            "10",
        ])
        .unwrap();
        let Command::CreateVm(args) = cli.command else {
            panic!("expected create-vm");
        };
        assert_eq!(args.vmid.map(|v| v.get()), Some(101));
        assert_eq!(args.name.as_deref(), Some("test"));
        assert_eq!(args.memory, 1024);
        assert_eq!(args.cores, 1);
        assert_eq!(args.disk_size, 10);
    }

    #[test]
    fn invalid_numbers_are_usage_errors() {
        assert!(parse(&["create-vm", "--memory", "0"]).is_err());
        assert!(parse(&["create-vm", "--cores", "two"]).is_err());
        assert!(parse(&["create-vm", "--vmid", "0"]).is_err());
        assert!(parse(&["remove-vm", "--vmid", "-1"]).is_err());
    }

    #[test]
    fn convert_requires_vmid() {
        assert!(parse(&["convert-template"]).is_err());
        let cli = parse(&["convert-template", "--vmid", "101"]).unwrap();
        let Command::ConvertTemplate(args) = cli.command else {
            panic!("expected convert-template");
        };
        assert_eq!(args.vmid.get(), 101);
    }

    #[test]
    fn remove_force_flag() {
        assert!(parse(&["remove-vm"]).is_err());

        let cli = parse(&["remove-vm", "--vmid", "102"]).unwrap();
        let Command::RemoveVm(args) = cli.command else {
            panic!("expected remove-vm");
        };
        assert!(!args.force);

        let cli = parse(&["remove-vm", "--vmid", "102", "--force"]).unwrap();
        let Command::RemoveVm(args) = cli.command else {
            panic!("expected remove-vm");
        };
        assert!(args.force);
    }

    #[test]
    fn connection_flags_after_subcommand() {
        let cli = parse(&[
            "remove-vm",
            "--vmid",
            "102",
            "--node",
            "lab-01",
            "--insecure",
        ])
        .unwrap();
        let overrides = cli.connection.overrides();
        assert_eq!(overrides.node.as_deref(), Some("lab-01"));
        assert_eq!(overrides.insecure, Some(true));
    }

    #[test]
    fn insecure_can_be_switched_off() {
        let file = config::parse(
            "node \"lab-00\"\ninsecure #true\nauth {\n    token \"t\"\n}",
            std::path::Path::new("config.kdl"),
        )
        .unwrap();

        let cli = parse(&["--insecure=false", "remove-vm", "--vmid", "102"]).unwrap();
        assert_eq!(cli.connection.insecure, Some(false));
        let cfg = file.clone().merge(cli.connection.overrides()).resolve().unwrap();
        assert!(!cfg.insecure);

        let cli = parse(&["--insecure", "remove-vm", "--vmid", "102"]).unwrap();
        assert_eq!(cli.connection.insecure, Some(true));

        let cli = parse(&["remove-vm", "--vmid", "102"]).unwrap();
        let cfg = file.merge(cli.connection.overrides()).resolve().unwrap();
        assert!(cfg.insecure);
    }

    #[test]
    fn unset_flags_do_not_override_file() {
        let overrides = ConnectionArgs::default().overrides();
        assert_eq!(overrides, PartialConfig::default());
    }
}
