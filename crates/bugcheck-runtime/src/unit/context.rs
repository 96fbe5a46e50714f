//! Runtime state owned by every diagnostic unit.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, debug_span, trace, warn, Span};

use bugcheck_core::{
    check_engine_compat, BugcheckError, ClusterMode, CommandResult, Result, Role, StatusCode, StatusRecord,
    StatusSection, Version,
};

use super::config::{ConfigureOptions, DirectoryKind, UnitConfig};
use super::metadata::UnitMetadata;
use crate::cache::{FileCache, MemoryCache};
use crate::certs::{CertificateStore, SecretSource};
use crate::cluster::{ClusterStore, ClusterValues};
use crate::exec::{Executor, RunOptions, Target};
use crate::k8s::{filter_pods, parse_describe, K8sResource};
use crate::logs::{LogReader, LogSource, ReadOptions, TimeWindow};
use crate::ENGINE_VERSION;

/// Where a unit is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    Unconfigured,
    Configured,
    Scanned,
    Patched,
}

/// Configuration, status and helpers of one unit instance.
///
/// The context decides whether the unit inspects a live node or an
/// extracted bundle and routes commands, file reads and certificate
/// discovery accordingly. Every event it emits is recorded under a
/// `bugcheck` span carrying the unit and node names.
#[derive(Debug, Clone)]
pub struct UnitContext {
    config: UnitConfig,
    status: StatusRecord,
    state: UnitState,
    cache: Arc<dyn FileCache>,
    cluster_store: Option<Arc<dyn ClusterStore>>,
    local_host: String,
    os_user: String,
    engine_version: Option<Version>,
    span: Span,
}

impl Default for UnitContext {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitContext {
    /// Unconfigured context with a private in-memory cache
    pub fn new() -> Self {
        Self {
            config: UnitConfig::default(),
            status: StatusRecord::initial(),
            state: UnitState::Unconfigured,
            cache: Arc::new(MemoryCache::new()),
            cluster_store: None,
            local_host: current_hostname(),
            os_user: current_user(),
            engine_version: None,
            span: Span::none(),
        }
    }

    /// Override the name of the host this process runs on
    #[must_use]
    pub fn with_local_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    /// Override the user this process runs as
    #[must_use]
    pub fn with_os_user(mut self, user: impl Into<String>) -> Self {
        self.os_user = user.into();
        self
    }

    /// Check units against `version` instead of this crate's version
    #[must_use]
    pub const fn with_engine_version(mut self, version: Version) -> Self {
        self.engine_version = Some(version);
        self
    }

    /// Merge `options` into the configuration.
    ///
    /// Only fields that are set replace current values. A metadata
    /// descriptor is applied last and its name and description win. Unless
    /// `bootstrap` is set, the descriptor must declare an engine version
    /// compatible with this runtime.
    pub fn configure(&mut self, options: ConfigureOptions) -> Result<()> {
        let ConfigureOptions {
            name,
            description,
            node,
            logs_from,
            timeout,
            read_files_only_from_last_service_restart,
            cert_dir,
            cvpi_verbosity,
            metadata,
            metadata_path,
            cache,
            cluster_store,
            bootstrap,
        } = options;

        if name.is_some() {
            self.config.name = name;
        }
        if description.is_some() {
            self.config.description = description;
        }
        if let Some(node) = node {
            self.config.node = node;
        }
        if logs_from.is_some() {
            self.config.logs_from = logs_from;
        }
        if timeout.is_some() {
            self.config.timeout = timeout;
        }
        if let Some(enabled) = read_files_only_from_last_service_restart {
            self.config.read_files_only_from_last_service_restart = enabled;
        }
        if let Some(dir) = cert_dir {
            self.config.cert_dir = dir;
        }
        if let Some(verbosity) = cvpi_verbosity {
            self.config.cvpi_verbosity = verbosity;
        }

        let metadata = match (metadata, metadata_path) {
            (Some(metadata), _) => Some(metadata),
            (None, Some(path)) => Some(UnitMetadata::load(&path)?),
            (None, None) => None,
        };
        if let Some(metadata) = metadata {
            if metadata.name.is_some() {
                self.config.name.clone_from(&metadata.name);
            }
            if metadata.description.is_some() {
                self.config.description.clone_from(&metadata.description);
            }
            self.config.metadata = metadata;
        }

        if let Some(cache) = cache {
            self.cache = cache;
        }
        if cluster_store.is_some() {
            self.cluster_store = cluster_store;
        }

        self.span = debug_span!(
            "bugcheck",
            unit = self.config.name.as_deref().unwrap_or("-"),
            node = self.node_name().unwrap_or("-")
        );

        if !bootstrap {
            self.check_engine()?;
        }
        if self.state == UnitState::Unconfigured {
            self.state = UnitState::Configured;
        }

        debug!(parent: &self.span, engine = ENGINE_VERSION, "configured");
        trace!(parent: &self.span, config = ?self.config, "configuration");
        Ok(())
    }

    fn check_engine(&self) -> Result<()> {
        let required = self
            .config
            .metadata
            .bug_engine_version
            .as_ref()
            .ok_or(BugcheckError::MissingEngineVersion)?;
        let current = match self.engine_version {
            Some(version) => version,
            None => ENGINE_VERSION.parse()?,
        };
        check_engine_compat(required, &current)
    }

    /// Current configuration
    pub const fn config(&self) -> &UnitConfig {
        &self.config
    }

    pub const fn state(&self) -> UnitState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: UnitState) {
        debug!(parent: &self.span, from = ?self.state, to = ?state, "state change");
        self.state = state;
    }

    /// Span every event of this unit is recorded under
    pub const fn span(&self) -> &Span {
        &self.span
    }

    /// Shared file and command cache
    pub fn cache(&self) -> &dyn FileCache {
        self.cache.as_ref()
    }

    /// User this process runs as
    pub fn os_user(&self) -> &str {
        &self.os_user
    }

    /// Returns true when reading an extracted bundle instead of a live node
    pub const fn is_using_local_logs(&self) -> bool {
        self.config.node.debug_log_dir.is_some() || self.config.node.debug_cmd_dir.is_some()
    }

    /// Bundle directory of the given kind, `None` in live mode.
    ///
    /// The root is two levels above the node's logs directory.
    pub fn local_directory(&self, kind: DirectoryKind) -> Option<String> {
        if !self.is_using_local_logs() {
            return None;
        }
        let node = &self.config.node;
        match kind {
            DirectoryKind::Logs => node.debug_log_dir.clone(),
            DirectoryKind::Commands => node.debug_cmd_dir.clone(),
            DirectoryKind::Root => node
                .debug_log_dir
                .as_deref()
                .and_then(|dir| Path::new(dir).parent()?.parent())
                .map(|root| root.display().to_string()),
        }
    }

    /// Hostname of the inspected node
    pub fn node_name(&self) -> Option<&str> {
        self.config.node.host.as_deref()
    }

    /// Cluster role of the inspected node
    pub fn node_role(&self) -> Result<Role> {
        self.config.node.role.ok_or(BugcheckError::MissingRole)
    }

    pub const fn cluster_mode(&self) -> Option<ClusterMode> {
        self.config.node.cluster_mode
    }

    /// Returns true if the inspected node is the host this process runs on.
    ///
    /// Command routing does not depend on this; use
    /// [`run_command`](Self::run_command).
    pub fn is_current_node(&self) -> bool {
        let current = self.node_name() == Some(self.local_host.as_str());
        trace!(parent: &self.span, current, "current node check");
        current
    }

    /// Executor bound to this unit's cache, default timeout and span
    pub fn executor(&self) -> Executor {
        Executor::new(Arc::clone(&self.cache), self.local_host.clone())
            .with_default_timeout(self.config.timeout.map(Duration::from_secs))
            .with_span(self.span.clone())
    }

    /// Where single-node commands run.
    ///
    /// Commands run locally when the node is unset, is this host, or a bundle
    /// is being read, unless `force_ssh` is set.
    pub fn target(&self) -> Target {
        let node = &self.config.node;
        let local = node.host.as_deref().map_or(true, |host| host == self.local_host)
            || self.is_using_local_logs();
        if local && !node.force_ssh {
            Target::Local
        } else {
            Target::Remote {
                host: node.host.clone().unwrap_or_else(|| self.local_host.clone()),
                session: node.session.clone(),
            }
        }
    }

    /// Run `command` on the inspected node
    pub async fn run_command(&self, command: &str, options: &RunOptions) -> CommandResult {
        if command.contains("cvpi ") {
            warn!(parent: &self.span, command, "cvpi commands should go through cvpi()");
        }
        self.execute(command, &self.target(), options).await
    }

    /// Run `command` on every cluster member, in member order
    pub async fn run_command_all_nodes(&self, command: &str, options: &RunOptions) -> CommandResult {
        let options = RunOptions {
            force_remote: options.force_remote || self.config.node.force_ssh,
            ..*options
        };
        let target = Target::FanOut(self.config.node.members.clone());
        self.execute(command, &target, &options).await
    }

    pub(crate) async fn execute(&self, command: &str, target: &Target, options: &RunOptions) -> CommandResult {
        let result = self.executor().run(command, target, options).await;
        if result.members().len() == 1 && !result.stderr().is_empty() {
            debug!(parent: &self.span, command, stderr = ?result.stderr(), "command returned errors");
        }
        result
    }

    /// Read `path` from the bundle or the live node.
    ///
    /// The configured log window and restart truncation apply. Any failure
    /// yields an empty sequence.
    pub async fn read_file(&self, path: &str, options: &ReadOptions) -> Vec<String> {
        let logs_dir;
        let executor;
        let target;
        let source = if self.is_using_local_logs() {
            logs_dir = self.local_directory(DirectoryKind::Logs).unwrap_or_default();
            LogSource::Bundle { logs_dir: &logs_dir }
        } else {
            executor = self.executor();
            target = self.target();
            LogSource::Live {
                executor: &executor,
                target: &target,
            }
        };

        LogReader::new(source, self.cache.as_ref(), &self.span)
            .with_window(self.config.logs_from.map(TimeWindow::new))
            .since_last_restart(self.config.read_files_only_from_last_service_restart)
            .read(path, options)
            .await
    }

    /// Discover the node's certificates.
    ///
    /// Kubernetes secrets are only read on a live node.
    pub async fn certificates(&self) -> CertificateStore {
        if self.is_using_local_logs() {
            debug!(parent: &self.span, "reading certificates from the filesystem only");
            return CertificateStore::discover(&self.config.cert_dir, None, &self.span).await;
        }
        let executor = self.executor();
        let target = self.target();
        let secrets = SecretSource {
            executor: &executor,
            target: &target,
        };
        CertificateStore::discover(&self.config.cert_dir, Some(secrets), &self.span).await
    }

    /// Described Kubernetes resources of `kind`.
    ///
    /// Without a filter the result is keyed by resource name. With a filter
    /// only matching pod containers are kept, keyed by container name.
    /// Bundles only carry pod descriptions.
    pub async fn get_k8s_resources(&self, kind: &str, filter: Option<&str>) -> Result<BTreeMap<String, K8sResource>> {
        let lines = if self.is_using_local_logs() {
            if !matches!(kind, "pod" | "pods") {
                debug!(parent: &self.span, kind, "resource kind not captured in bundles");
                return Err(BugcheckError::UnsupportedResource { kind: kind.to_string() });
            }
            let dir = self.local_directory(DirectoryKind::Commands).unwrap_or_default();
            self.read_file(&format!("{dir}/kube_pod"), &ReadOptions::default())
                .await
        } else {
            self.run_command(&format!("kubectl describe {kind}"), &RunOptions::default())
                .await
                .stdout()
        };

        let resources = parse_describe(&lines, kind)?;
        let selected = match filter {
            Some(filter) => filter_pods(&resources, filter)?,
            None => resources
                .into_iter()
                .map(|resource| (resource.name.clone(), resource))
                .collect(),
        };
        for (key, resource) in &selected {
            trace!(parent: &self.span, kind = %resource.kind, name = %resource.name, key = %key, "kubernetes resource");
        }
        Ok(selected)
    }

    /// Record the verdict of the current run
    pub fn set_status(&mut self, code: StatusCode, message: impl Into<String>, extra: Value) {
        self.set_status_record(StatusRecord::new(code, Some(message.into()), extra));
    }

    /// Replace the whole status record
    pub fn set_status_record(&mut self, record: StatusRecord) {
        self.status = record;
        debug!(
            parent: &self.span,
            code = %self.status.code,
            message = ?self.status.message,
            has_run = self.status.has_run,
            "status set"
        );
    }

    pub const fn get_status(&self) -> &StatusRecord {
        &self.status
    }

    /// One section of the status record
    pub fn status_section(&self, section: StatusSection) -> Value {
        self.status.section(section)
    }

    /// Store `value` for this node's role under `key`, or under the unit
    /// name when no key is given.
    ///
    /// Returns false without storing anything when the unit has no name.
    pub async fn save_cluster_value(&self, value: Value, key: Option<&str>) -> Result<bool> {
        let Some(name) = self.config.name.as_deref() else {
            debug!(parent: &self.span, "unnamed unit, not storing cluster value");
            return Ok(false);
        };
        let key = key.unwrap_or(name);
        let store = self.cluster_store.as_ref().ok_or(BugcheckError::NoClusterStore)?;
        let role = self.node_role()?;

        debug!(parent: &self.span, role = %role, key, value = %value, "storing cluster value");
        store.save(role, key, value).await?;
        Ok(true)
    }

    /// Values stored under `key` (default: the unit name) by every node
    pub async fn get_cluster_values(&self, key: Option<&str>) -> Result<ClusterValues> {
        let store = self.cluster_store.as_ref().ok_or(BugcheckError::NoClusterStore)?;
        match key.or(self.config.name.as_deref()) {
            Some(key) => store.values(key).await,
            None => Ok(ClusterValues::default()),
        }
    }

    /// Configuration and status snapshot, without node or session details
    pub fn info(&self) -> Result<Value> {
        let mut info = serde_json::to_value(&self.config)?;
        if let Value::Object(map) = &mut info {
            map.remove("node");
            map.insert("status".to_string(), serde_json::to_value(&self.status)?);
            map.insert("state".to_string(), serde_json::to_value(self.state)?);
        }
        trace!(parent: &self.span, info = %info, "unit info");
        Ok(info)
    }
}

fn current_hostname() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_default()
}
