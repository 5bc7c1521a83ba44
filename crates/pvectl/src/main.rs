use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
use commands::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so stdout only carries operator output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let result = cli.run().await;
    ExitCode::from(exit_status(result, &mut std::io::stdout()))
}

/// Print a failure report to `out` and map the outcome to a process exit status.
fn exit_status(result: miette::Result<()>, out: &mut impl Write) -> u8 {
    match result {
        Ok(()) => 0,
        Err(report) => {
            let _ = writeln!(out, "❌ {report:?}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_exits_zero_silently() {
        let mut out = Vec::new();
        assert_eq!(exit_status(Ok(()), &mut out), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn failure_exits_one_with_report() {
        let mut out = Vec::new();
        let err = pve_manager::PveError::NoBootDisk {
            vmid: pve_manager::VmId::new(101).unwrap(),
        };
        assert_eq!(exit_status(Err(err.into()), &mut out), 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("❌ "));
        assert!(text.contains("101"));
    }
}
