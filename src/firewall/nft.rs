//! Rule application through the `nft` command-line tool.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{ApplyOutput, FirewallError, RuleApplier};

/// Applies scripts with `nft -f -`, feeding the script on stdin.
#[derive(Debug, Clone)]
pub struct NftApplier {
    binary: PathBuf,
}

impl NftApplier {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn spawn_error(&self, source: io::Error) -> FirewallError {
        FirewallError::Spawn {
            binary: self.binary.display().to_string(),
            source,
        }
    }
}

impl Default for NftApplier {
    fn default() -> Self {
        Self::new("nft")
    }
}

impl RuleApplier for NftApplier {
    async fn apply(&self, script: &str) -> Result<ApplyOutput, FirewallError> {
        debug!(binary = %self.binary.display(), script, "applying nft script");

        let mut child = Command::new(&self.binary)
            .args(["-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| self.spawn_error(err))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A tool that exits without reading reports through its status.
            match stdin.write_all(script.as_bytes()).await {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {}
                Err(err) => return Err(self.spawn_error(err)),
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| self.spawn_error(err))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ApplyOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            output: text,
        })
    }
}
