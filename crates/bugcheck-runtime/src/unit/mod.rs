//! The diagnostic unit contract.
//!
//! A unit owns a [`UnitContext`] and implements [`Bugcheck`]. The driver
//! walks it through its lifecycle:
//!
//! ```text
//! configure -> pre_scan -> scan -> [pre_patch -> patch] -> post_scan
//! ```
//!
//! [`run_scan`] and [`run_patch`] apply the gates and track the unit state.

mod config;
mod context;
mod cvpi;
mod gates;
mod metadata;

pub use config::{ConfigureOptions, DirectoryKind, NodeConfig, UnitConfig};
pub use context::{UnitContext, UnitState};
pub use cvpi::{ActionReport, ApishRequest, CvpiAction, CvpiOptions, PublishAction, ALL_SERVICES};
pub use gates::Gate;
pub use metadata::{Condition, Requirements, UnitMetadata};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use bugcheck_core::{BugcheckError, Result, StatusCode};

/// Code and message returned by patch and post-scan actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionVerdict {
    pub code: Option<StatusCode>,
    pub message: Option<String>,
}

impl ActionVerdict {
    /// Verdict carrying only a message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: Some(message.into()),
        }
    }
}

/// A diagnostic unit
#[async_trait]
pub trait Bugcheck: Send + Sync {
    fn context(&self) -> &UnitContext;

    fn context_mut(&mut self) -> &mut UnitContext;

    /// Inspect the node, record the status and return its code
    async fn scan(&mut self) -> Result<StatusCode> {
        Err(BugcheckError::ScanNotImplemented {
            unit: self
                .context()
                .config()
                .name
                .clone()
                .unwrap_or_else(|| "unnamed unit".to_string()),
        })
    }

    /// Remediate the issue found by the last scan
    async fn patch(&mut self, _force: bool) -> Result<ActionVerdict> {
        Ok(ActionVerdict::message("No patch action available"))
    }

    /// Runs once every node has been scanned
    async fn post_scan(&mut self) -> Result<ActionVerdict> {
        Ok(ActionVerdict::message("No post-scan actions defined"))
    }

    async fn pre_scan(&self) -> Result<Gate> {
        self.context().pre_scan().await
    }

    async fn pre_patch(&self) -> Result<Gate> {
        self.context().pre_patch().await
    }
}

/// Result of [`run_scan`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ScanOutcome {
    /// The pre-scan gate refused, with its reason
    Skipped(String),
    /// The scan ran and returned this code
    Completed(StatusCode),
}

/// Result of [`run_patch`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PatchOutcome {
    /// The pre-patch gate refused, with its reason
    Refused(String),
    /// The patch ran
    Applied(ActionVerdict),
}

/// Gate and run the unit's scan
pub async fn run_scan<B: Bugcheck + ?Sized>(unit: &mut B) -> Result<ScanOutcome> {
    let gate = unit.pre_scan().await?;
    if !gate.allowed {
        let reason = gate.reason.unwrap_or_default();
        info!(parent: unit.context().span(), reason = %reason, "scan skipped");
        return Ok(ScanOutcome::Skipped(reason));
    }

    let code = unit.scan().await?;
    let context = unit.context_mut();
    context.set_state(UnitState::Scanned);
    debug!(parent: context.span(), code = %code, "scan finished");
    Ok(ScanOutcome::Completed(code))
}

/// Gate and run the unit's patch
pub async fn run_patch<B: Bugcheck + ?Sized>(unit: &mut B, force: bool) -> Result<PatchOutcome> {
    let gate = unit.pre_patch().await?;
    if !gate.allowed {
        let reason = gate.reason.unwrap_or_default();
        info!(parent: unit.context().span(), reason = %reason, "patch refused");
        return Ok(PatchOutcome::Refused(reason));
    }

    let verdict = unit.patch(force).await?;
    let context = unit.context_mut();
    context.set_state(UnitState::Patched);
    debug!(parent: context.span(), code = ?verdict.code, message = ?verdict.message, "patch finished");
    Ok(PatchOutcome::Applied(verdict))
}
