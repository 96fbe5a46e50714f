//! Files whose content must be identical on every cluster node.
//!
//! Each node stores the checksums of [`CONSISTENT_FILES`] in the cluster
//! store during its scan. The post-scan pass compares what every role
//! stored and flags the files this node disagrees on.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, trace};

use bugcheck_core::{Result, Role, StatusCode, StatusRecord};
use bugcheck_runtime::unit::ActionVerdict;
use bugcheck_runtime::{Bugcheck, ClusterValues, RunOptions, UnitContext};

use crate::LIVE_ONLY;

/// Files compared across nodes
pub const CONSISTENT_FILES: &[&str] = &[
    "/etc/cvpi/env",
    "/etc/cvpi/cvpi.key",
    "/cvpi/tls/certs/aerisadmin.crt",
    "/cvpi/tls/certs/ca.crt",
    "/cvpi/tls/certs/saml.crt",
];

/// Which nodes hold a diverging copy of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Divergence {
    /// Only this role differs from the others
    Role(Role),
    /// No majority exists
    All,
}

impl Divergence {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Role(role) => role.as_str(),
            Self::All => "all",
        }
    }

    fn involves(self, role: Role) -> bool {
        match self {
            Self::Role(odd) => odd == role,
            Self::All => true,
        }
    }
}

/// Compares file checksums between cluster nodes
pub struct FilesMismatch {
    context: UnitContext,
    files: Vec<String>,
}

impl FilesMismatch {
    /// Compare [`CONSISTENT_FILES`]
    pub fn new(context: UnitContext) -> Self {
        Self {
            context,
            files: CONSISTENT_FILES.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    /// Compare `files` instead of the defaults
    #[must_use]
    pub fn with_files(mut self, files: &[&str]) -> Self {
        self.files = files.iter().map(|f| (*f).to_string()).collect();
        self
    }

    /// First word of `md5sum`, `null` when the file could not be hashed
    async fn checksum(&self, file: &str) -> Value {
        let result = self
            .context
            .run_command(&format!("md5sum {file}|awk '{{print $1}}'"), &RunOptions::default())
            .await;
        match result.stdout().first() {
            Some(sum) if result.exit_code() == 0 && !sum.is_empty() => Value::String(sum.clone()),
            _ => {
                debug!(parent: self.context.span(), file, stderr = ?result.stderr(), "could not checksum file");
                Value::Null
            }
        }
    }

    fn record_live_only(&mut self) -> StatusCode {
        self.context.set_status_record(StatusRecord::new(
            StatusCode::Unsupported,
            Some(LIVE_ONLY.to_string()),
            Value::Null,
        ));
        StatusCode::Unsupported
    }
}

/// Find which role holds the odd copy of `file`.
///
/// Roles that stored no value for the file are ignored. With two distinct
/// checksums the role holding the minority one is blamed; if no single
/// role is the minority (two nodes, or three distinct sums) every node is.
fn divergence(values: &ClusterValues, file: &str) -> Option<Divergence> {
    let sums: Vec<(Role, &Value)> = values
        .iter()
        .filter_map(|(role, stored)| stored.get(file).map(|sum| (role, sum)))
        .collect();
    let distinct: BTreeSet<String> = sums.iter().map(|(_, sum)| sum.to_string()).collect();
    if distinct.len() < 2 {
        return None;
    }

    let lonely: Vec<Role> = sums
        .iter()
        .filter(|(_, sum)| sums.iter().filter(|(_, other)| other == sum).count() == 1)
        .map(|(role, _)| *role)
        .collect();
    match lonely.as_slice() {
        [odd] => Some(Divergence::Role(*odd)),
        _ => Some(Divergence::All),
    }
}

#[async_trait]
impl Bugcheck for FilesMismatch {
    fn context(&self) -> &UnitContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut UnitContext {
        &mut self.context
    }

    async fn scan(&mut self) -> Result<StatusCode> {
        if self.context.is_using_local_logs() {
            return Ok(self.record_live_only());
        }

        let mut checksums = Map::new();
        for file in &self.files {
            checksums.insert(file.clone(), self.checksum(file).await);
        }
        trace!(parent: self.context.span(), checksums = ?checksums, "file checksums");
        self.context.save_cluster_value(Value::Object(checksums), None).await?;

        self.context
            .set_status_record(StatusRecord::new(StatusCode::Ok, None, Value::Null));
        Ok(StatusCode::Ok)
    }

    async fn post_scan(&mut self) -> Result<ActionVerdict> {
        if self.context.is_using_local_logs() {
            let code = self.record_live_only();
            return Ok(ActionVerdict {
                code: Some(code),
                message: Some(LIVE_ONLY.to_string()),
            });
        }

        let values = self.context.get_cluster_values(None).await?;
        let role = self.context.node_role()?;
        for (stored_by, stored) in values.iter() {
            debug!(parent: self.context.span(), role = %stored_by, files = %stored, "stored checksums");
        }

        let mut diff = Map::new();
        let mut mismatched = Vec::new();
        for file in &self.files {
            let Some(divergence) = divergence(&values, file) else {
                continue;
            };
            debug!(parent: self.context.span(), file, nodes = divergence.as_str(), "checksum mismatch");
            diff.insert(file.clone(), Value::from(divergence.as_str()));
            if divergence.involves(role) {
                mismatched.push(file.as_str());
            }
        }

        let (code, message) = if mismatched.is_empty() {
            (StatusCode::Ok, None)
        } else {
            (
                StatusCode::Error,
                Some(format!(
                    "Files with different content across nodes: {}",
                    mismatched.join(",")
                )),
            )
        };
        self.context
            .set_status_record(StatusRecord::new(code, message.clone(), Value::Object(diff)));
        Ok(ActionVerdict {
            code: Some(code),
            message,
        })
    }
}
