//! Scripted sessions for tests.
//!
//! Available to other crates through the `testing` feature.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bugcheck_core::{BugcheckError, Result};

use crate::session::{RawOutput, RemoteSession};

/// Session answering commands from a script of `(needle, output)` pairs.
///
/// The first needle contained in the command wins. Unknown commands exit 127.
#[derive(Debug, Default)]
pub struct ScriptedSession {
    host: String,
    username: Option<String>,
    responses: Vec<(String, RawOutput)>,
    delay: Option<Duration>,
    failing: bool,
    calls: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

impl ScriptedSession {
    /// Session for `host` with no scripted responses
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Self::default()
        }
    }

    /// Session whose every call fails with a session error
    pub fn failing(host: &str) -> Self {
        Self {
            failing: true,
            ..Self::new(host)
        }
    }

    /// Answer commands containing `needle` with `stdout`
    pub fn respond(self, needle: &str, stdout: &str, exit_code: i32) -> Self {
        self.respond_bytes(needle, stdout.as_bytes().to_vec(), exit_code)
    }

    pub fn respond_bytes(mut self, needle: &str, stdout: Vec<u8>, exit_code: i32) -> Self {
        self.responses.push((
            needle.to_string(),
            RawOutput {
                stdout,
                stderr: Vec::new(),
                exit_code,
            },
        ));
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    /// Number of commands received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Commands received, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .map(|commands| commands.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    fn host(&self) -> &str {
        &self.host
    }

    fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    async fn exec(&self, command: &str, _timeout: Option<Duration>) -> Result<RawOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.to_string());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(BugcheckError::Session {
                host: self.host.clone(),
                reason: "connection reset".into(),
            });
        }

        Ok(self
            .responses
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map_or_else(
                || RawOutput {
                    stdout: Vec::new(),
                    stderr: b"command not found".to_vec(),
                    exit_code: 127,
                },
                |(_, output)| output.clone(),
            ))
    }
}
