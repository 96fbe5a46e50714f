//! Command execution on the local host, one remote host, or every cluster member.
//!
//! The [`Executor`] never fails: spawn errors, session errors and expired
//! timeouts all come back as unavailable [`CommandOutput`]s inside the
//! [`CommandResult`]. Fan-out is a sequential loop in member order and one
//! member's failure does not stop the others.

mod local;
mod remote;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, Span};

use bugcheck_core::{BugcheckError, CommandOutput, CommandResult};

use crate::cache::{CacheKey, CachedValue, FileCache};
use crate::session::RemoteSession;

pub(crate) use local::run_local;
pub(crate) use remote::run_remote;

/// Per-call timeout override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Kill the command after this long
    After(Duration),
    /// Never time out, even if the unit has a default timeout
    Infinite,
}

impl Timeout {
    /// Timeout of `secs` seconds
    #[must_use]
    pub const fn secs(secs: u64) -> Self {
        Self::After(Duration::from_secs(secs))
    }

    /// Resolve the duration to enforce given the unit default
    #[must_use]
    pub const fn resolve(per_call: Option<Self>, default: Option<Duration>) -> Option<Duration> {
        match per_call {
            Some(Self::After(limit)) => Some(limit),
            Some(Self::Infinite) => None,
            None => default,
        }
    }
}

impl FromStr for Timeout {
    type Err = BugcheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("inf") {
            return Ok(Self::Infinite);
        }
        s.parse::<u64>()
            .map(Self::secs)
            .map_err(|_| BugcheckError::Metadata(format!("invalid timeout: {s}")))
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::After(limit) => write!(f, "{}", limit.as_secs()),
            Self::Infinite => f.write_str("inf"),
        }
    }
}

/// A named cluster member and the session used to reach it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMember {
    /// Member hostname
    pub name: String,
    /// Session to the member, if one was established
    #[serde(skip)]
    pub session: Option<Arc<dyn RemoteSession>>,
}

impl ClusterMember {
    /// Create a member entry
    pub fn new(name: impl Into<String>, session: Option<Arc<dyn RemoteSession>>) -> Self {
        Self {
            name: name.into(),
            session,
        }
    }
}

/// Where a command runs
#[derive(Debug, Clone)]
pub enum Target {
    /// This host, through `sh -c`
    Local,
    /// One remote host
    Remote {
        /// Host name used to label the result
        host: String,
        /// Session to the host
        session: Option<Arc<dyn RemoteSession>>,
    },
    /// Every listed member, in order
    FanOut(Vec<ClusterMember>),
}

/// Options for a single command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Serve repeated calls from the cache
    pub cacheable: bool,
    /// Per-call timeout override
    pub timeout: Option<Timeout>,
    /// Use the member's session even for the member matching this host
    pub force_remote: bool,
}

impl RunOptions {
    /// Options for a cacheable command
    #[must_use]
    pub fn cached() -> Self {
        Self {
            cacheable: true,
            ..Self::default()
        }
    }

    /// Override the unit timeout for this call
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Runs commands and caches their results
#[derive(Debug, Clone)]
pub struct Executor {
    cache: Arc<dyn FileCache>,
    local_host: String,
    default_timeout: Option<Duration>,
    span: Span,
}

impl Executor {
    /// Create an executor. `local_host` is the name of the host this process
    /// runs on and labels local results.
    pub fn new(cache: Arc<dyn FileCache>, local_host: impl Into<String>) -> Self {
        Self {
            cache,
            local_host: local_host.into(),
            default_timeout: None,
            span: Span::none(),
        }
    }

    /// Timeout applied when a call does not override it
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Emit events under `span`
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Name of the host this executor considers local
    pub fn local_host(&self) -> &str {
        &self.local_host
    }

    /// Run `command` on `target`.
    ///
    /// Cacheable commands are looked up by their literal text. On a miss the
    /// key is locked, looked up again, executed and stored, so concurrent
    /// callers for the same command share one execution.
    pub async fn run(&self, command: &str, target: &Target, options: &RunOptions) -> CommandResult {
        debug!(parent: &self.span, command, cacheable = options.cacheable, "running command");

        if !options.cacheable {
            return self.execute(command, target, options).await;
        }

        let key = CacheKey::new(command);
        if let Some(result) = self.cached(&key).await {
            debug!(parent: &self.span, command, "reused cached command output");
            return result;
        }

        self.cache.lock(&key).await;
        if let Some(result) = self.cached(&key).await {
            self.cache.unlock(&key).await;
            debug!(parent: &self.span, command, "command output cached while waiting");
            return result;
        }

        let started = Instant::now();
        let result = self.execute(command, target, options).await;
        if !result.is_unavailable() {
            self.cache
                .put(key.clone(), CachedValue::Command(result.clone()))
                .await;
            trace!(
                parent: &self.span,
                command,
                elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
                "cached command output"
            );
        }
        self.cache.unlock(&key).await;
        result
    }

    async fn cached(&self, key: &CacheKey) -> Option<CommandResult> {
        match self.cache.get(key).await {
            Some(CachedValue::Command(result)) => Some(result),
            _ => None,
        }
    }

    async fn execute(&self, command: &str, target: &Target, options: &RunOptions) -> CommandResult {
        let timeout = Timeout::resolve(options.timeout, self.default_timeout);

        let result = match target {
            Target::Local => CommandResult::single(
                self.local_host.clone(),
                run_local(command, timeout, &self.span).await,
            ),
            Target::Remote { host, session } => CommandResult::single(
                host.clone(),
                run_remote(command, session.as_deref(), timeout, &self.span).await,
            ),
            Target::FanOut(members) => {
                let mut outputs = Vec::with_capacity(members.len());
                for member in members {
                    let output = self.run_member(command, member, timeout, options).await;
                    outputs.push((member.name.clone(), output));
                }
                CommandResult::fan_out(outputs)
            }
        };

        for (host, output) in result.members() {
            trace!(
                parent: &self.span,
                command,
                host = %host,
                exit_code = ?output.exit_code,
                stdout = ?output.stdout,
                stderr = ?output.stderr,
                "command output"
            );
        }
        result
    }

    async fn run_member(
        &self,
        command: &str,
        member: &ClusterMember,
        timeout: Option<Duration>,
        options: &RunOptions,
    ) -> CommandOutput {
        if member.name == self.local_host && !options.force_remote {
            debug!(parent: &self.span, member = %member.name, "running command locally");
            run_local(command, timeout, &self.span).await
        } else {
            debug!(parent: &self.span, member = %member.name, "running command over session");
            run_remote(command, member.session.as_deref(), timeout, &self.span).await
        }
    }
}
