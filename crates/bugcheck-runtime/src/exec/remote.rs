//! Execution over a [`RemoteSession`].

use std::time::Duration;
use tracing::{error, trace, Span};

use bugcheck_core::CommandOutput;

use crate::session::RemoteSession;

/// Prefix `command` with coreutils `timeout` so the remote side kills it
pub(crate) fn wrap_timeout(command: &str, timeout: Option<Duration>) -> String {
    match timeout {
        Some(limit) => format!("timeout {} {command}", limit.as_secs().max(1)),
        None => command.to_string(),
    }
}

/// Run `command` through `session`.
///
/// A missing session or any session error yields an unavailable output;
/// callers must read that as "could not determine".
pub(crate) async fn run_remote(
    command: &str,
    session: Option<&dyn RemoteSession>,
    timeout: Option<Duration>,
    span: &Span,
) -> CommandOutput {
    let Some(session) = session else {
        error!(parent: span, command, "no session available");
        return CommandOutput::unavailable();
    };

    let wrapped = wrap_timeout(command, timeout);
    trace!(parent: span, host = session.host(), command = %wrapped, "running remote command");

    match session.exec(&wrapped, timeout).await {
        Ok(raw) => CommandOutput::from_bytes(&raw.stdout, &raw.stderr, Some(raw.exit_code)),
        Err(e) => {
            error!(parent: span, host = session.host(), command, error = %e, "could not run remote command");
            CommandOutput::unavailable()
        }
    }
}
