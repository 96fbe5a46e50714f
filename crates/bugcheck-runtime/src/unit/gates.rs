//! Checks run before scanning and patching.

use serde::Serialize;
use tracing::debug;

use bugcheck_core::{Result, StatusCode};

use super::context::UnitContext;
use super::cvpi::CvpiOptions;

/// Whether an action may proceed, and why not
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gate {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl Gate {
    pub const fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

fn is_privileged(user: &str, required: &str) -> bool {
    user == "root" || user == required
}

impl UnitContext {
    /// Decide whether the unit may scan.
    ///
    /// On a live node the process user (or the session user) must hold the
    /// declared scan privileges and the declared component must be healthy.
    /// In both modes the product version must fall inside one of the
    /// declared conditions.
    pub async fn pre_scan(&self) -> Result<Gate> {
        if let Some(scan) = &self.config().metadata.scan {
            if !self.is_using_local_logs() {
                if let Some(required) = scan.privileges.as_deref() {
                    let session_user = self.config().node.username.as_deref();
                    if !is_privileged(self.os_user(), required)
                        && !session_user.is_some_and(|user| is_privileged(user, required))
                    {
                        return Ok(Gate::deny(format!("User {} cannot scan", self.os_user())));
                    }
                }
                if let Some(component) = scan.component_requirements.as_deref() {
                    if let Some(failed) = self.failed_components(component).await? {
                        return Ok(Gate::deny(format!(
                            "Not scanning due to running component requirements not met: {failed}"
                        )));
                    }
                }
            }
        }

        self.version_gate().await
    }

    /// Decide whether the unit may patch.
    ///
    /// Patching needs the declared patch privileges and components, a live
    /// node, a last scan that found something and an affected product
    /// version.
    pub async fn pre_patch(&self) -> Result<Gate> {
        if let Some(patch) = &self.config().metadata.patch {
            if let Some(required) = patch.privileges.as_deref() {
                if !is_privileged(self.os_user(), required) {
                    return Ok(Gate::deny(format!("User {} cannot patch", self.os_user())));
                }
            }
            if let Some(component) = patch.component_requirements.as_deref() {
                if !self.is_using_local_logs() {
                    if let Some(failed) = self.failed_components(component).await? {
                        return Ok(Gate::deny(format!(
                            "Not patching due to running component requirements not met: {failed}"
                        )));
                    }
                }
            }
        }

        if self.is_using_local_logs() {
            return Ok(Gate::deny("Cannot patch while checking debug logs"));
        }

        if self.get_status().code == StatusCode::Ok {
            return Ok(Gate::deny("No issue was detected"));
        }

        self.version_gate().await
    }

    /// Failed `cvpi status` actions for `component`, formatted for the
    /// operator, `None` when all succeeded
    async fn failed_components(&self, component: &str) -> Result<Option<String>> {
        let report = self
            .cvpi("status", &[component], CvpiOptions { allow_failure: true })
            .await?;
        if report.is_success() {
            return Ok(None);
        }
        let failed = report
            .failed
            .iter()
            .map(|(service, action)| format!("{service} {action}"))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(Some(failed))
    }

    /// Allow when there are no conditions, when a condition has no bounds,
    /// or when the product version falls inside any condition
    async fn version_gate(&self) -> Result<Gate> {
        let conditions = &self.config().metadata.conditions;
        if conditions.is_empty() {
            return Ok(Gate::allow());
        }
        if conditions.iter().any(|c| c.is_unbounded()) {
            debug!(parent: self.span(), "condition without version bounds, allowing");
            return Ok(Gate::allow());
        }

        let version = self.cvp_version().await?;
        if conditions.iter().any(|c| c.matches(&version)) {
            Ok(Gate::allow())
        } else {
            Ok(Gate::deny(format!("CVP {version} is not affected")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RemoteSession;
    use crate::testing::ScriptedSession;
    use crate::unit::{Condition, ConfigureOptions, NodeConfig, Requirements, UnitMetadata};
    use bugcheck_core::Version;
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn condition(introduced: Option<&str>, fixed: Option<&str>) -> Condition {
        Condition {
            introduced_in: introduced.map(|v| v.parse().unwrap()),
            fixed_in: fixed.map(|v| v.parse().unwrap()),
        }
    }

    fn live(session: &Arc<ScriptedSession>, user: &str, metadata: UnitMetadata) -> UnitContext {
        let mut ctx = UnitContext::new()
            .with_local_host("bugcheck-test-host")
            .with_os_user(user)
            .with_engine_version(Version::new(3, 5, 0));
        ctx.configure(ConfigureOptions {
            node: Some(NodeConfig {
                host: Some(session.host().to_string()),
                session: Some(Arc::clone(session) as Arc<dyn RemoteSession>),
                ..NodeConfig::default()
            }),
            metadata: Some(UnitMetadata {
                bug_engine_version: Some(Version::new(3, 5, 0)),
                ..metadata
            }),
            ..ConfigureOptions::default()
        })
        .unwrap();
        ctx
    }

    fn version_session(version: &str) -> Arc<ScriptedSession> {
        Arc::new(
            ScriptedSession::new("cvp1")
                .respond("cvpi version", version, 0)
                .respond("status hbase", "", 0)
                .respond("status kafka", "", 1),
        )
    }

    #[tokio::test]
    async fn conditions_gate_scanning() {
        let metadata = UnitMetadata {
            conditions: vec![condition(Some("2020.1.0"), Some("2021.2.0"))],
            ..UnitMetadata::default()
        };

        let affected = live(&version_session("2020.3.1"), "cvp", metadata.clone());
        assert_eq!(affected.pre_scan().await.unwrap(), Gate::allow());

        let fixed = live(&version_session("2021.2.0"), "cvp", metadata);
        assert_eq!(
            fixed.pre_scan().await.unwrap(),
            Gate::deny("CVP 2021.2.0 is not affected")
        );

        let any_version = UnitMetadata {
            conditions: vec![condition(Some("2030.1.0"), None), condition(None, None)],
            ..UnitMetadata::default()
        };
        let session = version_session("2021.2.0");
        assert!(live(&session, "cvp", any_version).pre_scan().await.unwrap().allowed);
        assert_eq!(session.calls(), 0);
    }

    #[tokio::test]
    async fn scan_privileges_and_components() {
        let needs_cvp = UnitMetadata {
            scan: Some(Requirements {
                privileges: Some("cvp".into()),
                component_requirements: None,
            }),
            ..UnitMetadata::default()
        };
        let denied = live(&version_session("2021.2.0"), "nobody", needs_cvp.clone());
        assert_eq!(denied.pre_scan().await.unwrap(), Gate::deny("User nobody cannot scan"));
        assert!(live(&version_session("2021.2.0"), "root", needs_cvp).pre_scan().await.unwrap().allowed);

        let needs_kafka = UnitMetadata {
            scan: Some(Requirements {
                privileges: None,
                component_requirements: Some("kafka".into()),
            }),
            ..UnitMetadata::default()
        };
        let gate = live(&version_session("2021.2.0"), "cvp", needs_kafka).pre_scan().await.unwrap();
        assert_eq!(
            gate.reason.as_deref(),
            Some("Not scanning due to running component requirements not met: kafka status")
        );

        let needs_hbase = UnitMetadata {
            scan: Some(Requirements {
                privileges: None,
                component_requirements: Some("hbase".into()),
            }),
            ..UnitMetadata::default()
        };
        assert!(live(&version_session("2021.2.0"), "cvp", needs_hbase).pre_scan().await.unwrap().allowed);
    }

    #[tokio::test]
    async fn patch_requires_an_issue() {
        let mut ctx = live(&version_session("2021.2.0"), "root", UnitMetadata::default());
        assert_eq!(ctx.pre_patch().await.unwrap(), Gate::deny("No issue was detected"));

        ctx.set_status(StatusCode::Error, "disk full", Value::Null);
        assert_eq!(ctx.pre_patch().await.unwrap(), Gate::allow());
    }

    #[tokio::test]
    async fn ok_status_refuses_before_version_lookup() {
        let session = Arc::new(ScriptedSession::new("cvp1"));
        let metadata = UnitMetadata {
            conditions: vec![condition(Some("2020.1.0"), None)],
            ..UnitMetadata::default()
        };
        let ctx = live(&session, "root", metadata);

        assert_eq!(ctx.pre_patch().await.unwrap(), Gate::deny("No issue was detected"));
        assert_eq!(session.calls(), 0);
    }

    #[tokio::test]
    async fn patch_privileges_use_process_user() {
        let metadata = UnitMetadata {
            patch: Some(Requirements {
                privileges: Some("root".into()),
                component_requirements: None,
            }),
            ..UnitMetadata::default()
        };
        let mut ctx = live(&version_session("2021.2.0"), "cvp", metadata);
        ctx.set_status(StatusCode::Error, "disk full", Value::Null);
        assert_eq!(ctx.pre_patch().await.unwrap(), Gate::deny("User cvp cannot patch"));
    }

    #[tokio::test]
    async fn bundles_cannot_be_patched() {
        let dir = TempDir::new().unwrap();
        let mut ctx = UnitContext::new()
            .with_local_host("bugcheck-test-host")
            .with_os_user("root");
        ctx.configure(ConfigureOptions {
            node: Some(NodeConfig {
                debug_log_dir: Some(dir.path().display().to_string()),
                ..NodeConfig::default()
            }),
            metadata: Some(UnitMetadata {
                scan: Some(Requirements {
                    privileges: Some("cvp".into()),
                    component_requirements: Some("hbase".into()),
                }),
                ..UnitMetadata::default()
            }),
            bootstrap: true,
            ..ConfigureOptions::default()
        })
        .unwrap();
        ctx.set_status(StatusCode::Error, "found", Value::Null);

        assert!(ctx.pre_scan().await.unwrap().allowed);
        assert_eq!(
            ctx.pre_patch().await.unwrap(),
            Gate::deny("Cannot patch while checking debug logs")
        );
    }
}
