//! Local subprocess execution.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, trace, warn, Span};

use bugcheck_core::CommandOutput;

/// Run `command` through `sh -c` on this host.
///
/// Spawn failures and expired timeouts yield an unavailable output.
pub(crate) async fn run_local(command: &str, timeout: Option<Duration>, span: &Span) -> CommandOutput {
    trace!(parent: span, command, "running local command");

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let result = match timeout {
        Some(limit) => {
            if let Ok(result) = tokio::time::timeout(limit, child).await {
                result
            } else {
                warn!(parent: span, command, timeout_secs = limit.as_secs(), "local command timed out");
                return CommandOutput::unavailable();
            }
        }
        None => child.await,
    };

    match result {
        Ok(output) => CommandOutput::from_bytes(&output.stdout, &output.stderr, output.status.code()),
        Err(e) => {
            error!(parent: span, command, error = %e, "could not spawn local command");
            CommandOutput::unavailable()
        }
    }
}
