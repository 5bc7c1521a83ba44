use std::path::PathBuf;
use std::process::Stdio;

use tracing::{debug, info};

use crate::config::SshTarget;
use crate::error::{PveError, Result};
use crate::traits::NodeCommandRunner;
use crate::types::{CommandOutput, NodeCommand};

/// Join arguments into one command line for a POSIX remote shell.
///
/// ssh hands the remote side a single string, so every argument is quoted to reach the
/// remote command verbatim.
pub fn shell_join(args: &[String]) -> Result<String> {
    shlex::try_join(args.iter().map(|s| s.as_str())).map_err(|e| PveError::Quote {
        detail: e.to_string(),
    })
}

/// Runs node commands through the system `ssh` client.
///
/// Authentication is left to ssh itself (agent, `~/.ssh/config`, default keys); `BatchMode`
/// makes it fail instead of prompting.
#[derive(Debug, Clone)]
pub struct SshRunner {
    binary: PathBuf,
    destination: String,
}

impl SshRunner {
    pub fn new(target: &SshTarget) -> Self {
        Self {
            binary: PathBuf::from("ssh"),
            destination: format!("{}@{}", target.user, target.host),
        }
    }

    /// Use a different ssh executable.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn args(&self, remote: String) -> Vec<String> {
        vec![
            "-o".into(),
            "BatchMode=yes".into(),
            "--".into(),
            self.destination.clone(),
            remote,
        ]
    }
}

impl NodeCommandRunner for SshRunner {
    fn target(&self) -> &str {
        &self.destination
    }

    async fn run(&self, cmd: &NodeCommand) -> Result<CommandOutput> {
        let remote = shell_join(&cmd.argv())?;
        info!(destination = %self.destination, command = %remote, "running node command");

        let output = tokio::process::Command::new(&self.binary)
            .args(self.args(remote))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| PveError::CommandSpawn {
                binary: self.binary.clone(),
                source,
            })?;

        let out = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(code = ?out.code, stdout = %out.stdout, stderr = %out.stderr, "node command finished");
        Ok(out)
    }
}
