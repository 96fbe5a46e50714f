//! Product helpers: `cvpi` component actions, version checks and `apish`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

use bugcheck_core::{BugcheckError, CommandResult, Comparator, Result, Version};

use super::config::DirectoryKind;
use super::context::UnitContext;
use crate::exec::{RunOptions, Timeout};
use crate::logs::ReadOptions;

/// Pseudo-service addressing every component
pub const ALL_SERVICES: &[&str] = &["all"];

const CVP_VERSION_COMMAND: &str = r#"su - cvp -c "cvpi version"|grep version|cut -f3 -d" "|cut -f1 -d-"#;

const APISH: &str = "/cvpi/tools/apish";

/// Component actions accepted by `cvpi`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvpiAction {
    /// Initialize components
    Init,
    /// Reset component state
    Reset,
    /// Stop then start
    Restart,
    /// Start components
    Start,
    /// Report component status
    Status,
    /// Stop components
    Stop,
}

impl CvpiAction {
    const ALL: [Self; 6] = [
        Self::Init,
        Self::Reset,
        Self::Restart,
        Self::Start,
        Self::Status,
        Self::Stop,
    ];

    /// Action name as `cvpi` spells it
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Reset => "reset",
            Self::Restart => "restart",
            Self::Start => "start",
            Self::Status => "status",
            Self::Stop => "stop",
        }
    }

    /// Actions actually sent to `cvpi`; a restart is a stop then a start
    fn steps(self) -> &'static [Self] {
        match self {
            Self::Restart => &[Self::Stop, Self::Start],
            Self::Init => &[Self::Init],
            Self::Reset => &[Self::Reset],
            Self::Start => &[Self::Start],
            Self::Status => &[Self::Status],
            Self::Stop => &[Self::Stop],
        }
    }
}

impl FromStr for CvpiAction {
    type Err = BugcheckError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| BugcheckError::InvalidAction {
                action: s.to_string(),
                allowed: Self::ALL.map(Self::as_str).join(", "),
            })
    }
}

impl fmt::Display for CvpiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for [`UnitContext::cvpi`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CvpiOptions {
    /// Do not log failed actions
    pub allow_failure: bool,
}

/// Results of a `cvpi` call, per service and action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    /// Command result of every `(service, action)` run
    pub results: BTreeMap<String, BTreeMap<String, CommandResult>>,
    /// `(service, action)` pairs that did not exit 0, in run order
    pub failed: Vec<(String, String)>,
    /// `(service, action)` pairs that exited 0, in run order
    pub successful: Vec<(String, String)>,
}

impl ActionReport {
    fn record(&mut self, service: &str, action: CvpiAction, result: CommandResult) {
        let pair = (service.to_string(), action.to_string());
        if result.is_unavailable() || result.exit_code() != 0 {
            self.failed.push(pair);
        } else {
            self.successful.push(pair);
        }
        self.results
            .entry(service.to_string())
            .or_default()
            .insert(action.to_string(), result);
    }

    /// Returns true if every action succeeded
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Publish operations understood by `apish`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishAction {
    /// Remove the path
    Delete,
    /// Write the path
    Update,
}

impl PublishAction {
    /// Operation name as `apish` spells it
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Update => "update",
        }
    }
}

/// A request to the product's state database through `apish`.
///
/// Publishing can break the product. Values are passed to the shell as-is,
/// so callers quote JSON keys and paths themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApishRequest {
    /// Read the state at `path`
    Get {
        dataset: String,
        path: String,
        key: Option<String>,
    },
    /// Update or delete `key` at `path`
    Publish {
        dataset: String,
        path: String,
        action: PublishAction,
        key: String,
        /// RFC 3339 or nanosecond timestamp, default now
        timestamp: Option<String>,
    },
}

impl ApishRequest {
    /// Shell command performing the request
    pub fn command(&self) -> String {
        match self {
            Self::Get { dataset, path, key } => {
                let mut command = format!("{APISH} get -d {dataset} -p {path}");
                if let Some(key) = key {
                    command.push_str(&format!(" --key {key}"));
                }
                command
            }
            Self::Publish {
                dataset,
                path,
                action,
                key,
                timestamp,
            } => {
                let mut command = format!("{APISH} publish -d {dataset} -p {path} --{} {key}", action.as_str());
                if let Some(timestamp) = timestamp {
                    command.push_str(&format!(" -t {timestamp}"));
                }
                command
            }
        }
    }
}

impl UnitContext {
    /// Run a `cvpi` action on each service, in order.
    ///
    /// Commands never time out. Stopping `all` kills `cvpiBoot.sh` first.
    pub async fn cvpi(&self, action: &str, services: &[&str], options: CvpiOptions) -> Result<ActionReport> {
        let action: CvpiAction = action.parse()?;
        let target = self.target();
        let run_options = RunOptions::default().with_timeout(Timeout::Infinite);
        let mut report = ActionReport::default();

        for step in action.steps() {
            for service in services {
                if *service == "all" && *step == CvpiAction::Stop {
                    debug!(parent: self.span(), "stopping all services, killing cvpiBoot.sh");
                    self.execute("killall -9 cvpiBoot.sh", &target, &RunOptions::default())
                        .await;
                }
                let command = format!(
                    "su - cvp -c \"cvpi --prompt=false -v={} {step} {service}\"",
                    self.config().cvpi_verbosity
                );
                let result = self.execute(&command, &target, &run_options).await;
                trace!(parent: self.span(), command = %command, stdout = ?result.stdout(), "cvpi output");
                report.record(service, *step, result);
            }
        }

        if !report.is_success() && !options.allow_failure {
            debug!(parent: self.span(), failed = ?report.failed, "errors while executing cvpi actions");
        }
        Ok(report)
    }

    /// Product version of the inspected node.
    ///
    /// Bundles carry it in `env/etc/cvpi/env`; live nodes are asked through
    /// `cvpi version`.
    pub async fn cvp_version(&self) -> Result<Version> {
        let raw = if self.is_using_local_logs() {
            let logs = self.local_directory(DirectoryKind::Logs).unwrap_or_default();
            let path = format!("{logs}/env/etc/cvpi/env");
            self.read_file(&path, &ReadOptions::default())
                .await
                .iter()
                .rev()
                .filter(|line| line.contains("CVP_VERSION"))
                .find_map(|line| line.split('=').nth(1))
                .map(|version| version.trim().to_string())
                .ok_or_else(|| BugcheckError::VersionUnavailable(format!("no CVP_VERSION in {path}")))?
        } else {
            self.execute(CVP_VERSION_COMMAND, &self.target(), &RunOptions::cached())
                .await
                .stdout()
                .into_iter()
                .next()
                .ok_or_else(|| BugcheckError::VersionUnavailable("cvpi version returned nothing".into()))?
        };

        debug!(parent: self.span(), version = %raw, "cvp version");
        raw.parse()
            .map_err(|_| BugcheckError::VersionUnavailable(format!("unrecognized version {raw}")))
    }

    /// Compare the node's product version: `node <comparator> version`
    pub async fn cvp_is(&self, comparator: Comparator, version: &Version) -> Result<bool> {
        let current = self.cvp_version().await?;
        let result = current.satisfies(comparator, version);
        trace!(parent: self.span(), current = %current, comparator = %comparator, version = %version, result, "version comparison");
        Ok(result)
    }

    /// Run an `apish` request and return its stdout
    pub async fn apish(&self, request: &ApishRequest) -> Vec<String> {
        let command = request.command();
        let result = self.execute(&command, &self.target(), &RunOptions::default()).await;
        trace!(parent: self.span(), stdout = ?result.stdout(), "apish output");
        result.stdout()
    }
}
