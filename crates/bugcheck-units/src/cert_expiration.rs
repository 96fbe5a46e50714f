//! Expired or soon to expire CVP certificates, and their regeneration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use bugcheck_core::{Comparator, Result, StatusCode, StatusRecord, Version};
use bugcheck_runtime::certs::{CertificateStore, DEFAULT_WARNING_DAYS};
use bugcheck_runtime::unit::{ActionReport, ActionVerdict, CvpiOptions};
use bugcheck_runtime::{Bugcheck, RunOptions, UnitContext};

use crate::LIVE_ONLY;

/// Certificates whose expiry breaks the cluster
pub const CHECKED_CERTIFICATES: &[&str] = &["server.crt", "aerisadmin.crt", "ca.crt"];

/// First release whose CA component is `ca-init-v1`
const CA_INIT_V1_SINCE: Version = Version::new(2020, 0, 0);

#[derive(Debug, Default, PartialEq, Eq)]
struct Expiry {
    expired: Vec<String>,
    expiring: Vec<String>,
}

impl Expiry {
    fn code(&self) -> StatusCode {
        if !self.expired.is_empty() {
            StatusCode::Error
        } else if !self.expiring.is_empty() {
            StatusCode::Warning
        } else {
            StatusCode::Ok
        }
    }

    fn message(&self) -> Option<String> {
        match (self.expired.is_empty(), self.expiring.is_empty()) {
            (true, true) => None,
            (false, true) => Some(format!("Expired: {}", self.expired.join(", "))),
            (true, false) => Some(format!("Expiring: {}", self.expiring.join(", "))),
            (false, false) => Some(format!(
                "Expired: {} / Expiring: {}",
                self.expired.join(", "),
                self.expiring.join(", ")
            )),
        }
    }
}

/// Sort the checked certificates into expired and expiring as of `now`.
///
/// A certificate counts once, by its worst copy. Missing certificates are
/// skipped.
fn classify(store: &CertificateStore, now: DateTime<Utc>) -> Expiry {
    let mut expiry = Expiry::default();
    for name in CHECKED_CERTIFICATES {
        let Some(sources) = store.sources(name) else {
            debug!(certificate = name, "certificate not found, skipping");
            continue;
        };
        let records: Vec<_> = sources
            .iter()
            .filter_map(|source| store.get(name, Some(*source)))
            .collect();
        if records.iter().any(|record| record.is_expired_at(now)) {
            expiry.expired.push((*name).to_string());
        } else if records
            .iter()
            .any(|record| record.is_close_to_expiration_at(now, DEFAULT_WARNING_DAYS))
        {
            expiry.expiring.push((*name).to_string());
        }
    }
    expiry
}

fn failed_actions(report: &ActionReport) -> Option<ActionVerdict> {
    if report.is_success() {
        return None;
    }
    let failed = report
        .failed
        .iter()
        .map(|(service, action)| format!("{service} {action}"))
        .collect::<Vec<_>>()
        .join(", ");
    Some(ActionVerdict {
        code: Some(StatusCode::Error),
        message: Some(format!("Actions failed: {failed}")),
    })
}

/// Checks the cluster certificates and regenerates them on patch
pub struct CertExpiration {
    context: UnitContext,
}

impl CertExpiration {
    pub const fn new(context: UnitContext) -> Self {
        Self { context }
    }

    async fn cvpi(&self, action: &str, services: &[&str]) -> Result<Option<ActionVerdict>> {
        let report = self.context.cvpi(action, services, CvpiOptions::default()).await?;
        Ok(failed_actions(&report))
    }

    /// Run a shell step, turning a non-zero exit into an error verdict
    async fn shell(&self, command: &str) -> Option<ActionVerdict> {
        let result = self.context.run_command(command, &RunOptions::default()).await;
        if result.exit_code() == 0 && !result.is_unavailable() {
            return None;
        }
        Some(ActionVerdict {
            code: Some(StatusCode::Error),
            message: Some(result.stderr().join("\n")),
        })
    }
}

#[async_trait]
impl Bugcheck for CertExpiration {
    fn context(&self) -> &UnitContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut UnitContext {
        &mut self.context
    }

    async fn scan(&mut self) -> Result<StatusCode> {
        if self.context.is_using_local_logs() {
            self.context.set_status_record(StatusRecord::new(
                StatusCode::Unsupported,
                Some(LIVE_ONLY.to_string()),
                Value::Null,
            ));
            return Ok(StatusCode::Unsupported);
        }

        let store = self.context.certificates().await;
        let expiry = classify(&store, Utc::now());
        let code = expiry.code();
        let message = expiry.message();
        let extra = if code == StatusCode::Ok {
            Value::Null
        } else {
            json!({"expired": expiry.expired, "expiring": expiry.expiring})
        };
        self.context
            .set_status_record(StatusRecord::new(code, message, extra));
        Ok(code)
    }

    /// Stop the cluster, regenerate the CA and the server certificates, and
    /// start it again.
    ///
    /// A failed `cvpi` or cleanup step aborts the sequence. A failed
    /// `init.sh` is reported once CVP has been restarted.
    async fn patch(&mut self, _force: bool) -> Result<ActionVerdict> {
        let ca = if self
            .context
            .cvp_is(Comparator::NewerOrEqual, &CA_INIT_V1_SINCE)
            .await?
        {
            "ca-init-v1"
        } else {
            "ca"
        };
        let span = self.context.span().clone();

        warn!(parent: &span, "stopping CVP services");
        if let Some(failed) = self.cvpi("stop", &["all"]).await? {
            return Ok(failed);
        }

        warn!(parent: &span, "resetting certificates");
        if let Some(failed) = self.cvpi("start", &["aeris"]).await? {
            return Ok(failed);
        }
        for command in ["rm -f /cvpi/tls/certs/aerisadmin*", "rm -f /cvpi/tls/certs/server*"] {
            if let Some(failed) = self.shell(command).await {
                return Ok(failed);
            }
        }
        if let Some(failed) = self.cvpi("reset", &[ca]).await? {
            return Ok(failed);
        }
        if let Some(failed) = self.cvpi("init", &[ca]).await? {
            return Ok(failed);
        }
        let init = self.shell(r#"su - cvp -c "/cvpi/apps/aeris/bin/init.sh""#).await;

        warn!(parent: &span, "starting CVP, this will take a while");
        if let Some(failed) = self.cvpi("stop", &["aeris"]).await? {
            return Ok(failed);
        }
        if let Some(failed) = self.cvpi("start", &["all"]).await? {
            return Ok(failed);
        }

        Ok(init.unwrap_or(ActionVerdict {
            code: Some(StatusCode::Ok),
            message: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use bugcheck_runtime::certs::{CertSource, CertificateRecord};
    use bugcheck_runtime::testing::ScriptedSession;
    use chrono::Duration;
    use std::sync::Arc;
    use tempfile::TempDir;

    const CA: &str = include_str!("testdata/ca.pem");
    const SERVER: &str = include_str!("testdata/server.pem");
    const EXPIRED: &str = include_str!("testdata/expired.pem");

    fn cert_dir(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, pem) in files {
            std::fs::write(dir.path().join(name), pem).unwrap();
        }
        dir
    }

    fn record(pem: &str) -> CertificateRecord {
        CertificateRecord::from_pem("test.crt", pem.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn valid_certificates() {
        let dir = cert_dir(&[("ca.crt", CA), ("server.crt", SERVER), ("aerisadmin.crt", SERVER)]);
        let session = Arc::new(ScriptedSession::new("cvp1"));
        let mut unit = CertExpiration::new(test_support::live_with_certs("cert_expiration", &session, dir.path()));

        assert_eq!(unit.scan().await.unwrap(), StatusCode::Ok);
        let status = unit.context().get_status();
        assert_eq!(status.message, None);
        assert_eq!(status.extra, Value::Null);
    }

    #[tokio::test]
    async fn expired_certificate() {
        let dir = cert_dir(&[("ca.crt", CA), ("server.crt", SERVER), ("aerisadmin.crt", EXPIRED)]);
        let session = Arc::new(ScriptedSession::new("cvp1"));
        let mut unit = CertExpiration::new(test_support::live_with_certs("cert_expiration", &session, dir.path()));

        assert_eq!(unit.scan().await.unwrap(), StatusCode::Error);
        let status = unit.context().get_status();
        assert_eq!(status.message.as_deref(), Some("Expired: aerisadmin.crt"));
        assert_eq!(status.extra, json!({"expired": ["aerisadmin.crt"], "expiring": []}));
    }

    #[test]
    fn expiring_and_expired() {
        let server = record(SERVER);
        let now = server.not_after - Duration::days(10);

        let mut store = CertificateStore::new();
        store.insert("ca.crt", CertSource::Filesystem, record(CA));
        store.insert("server.crt", CertSource::Filesystem, server.clone());
        store.insert("aerisadmin.crt", CertSource::Kubernetes, record(SERVER));
        store.insert("aerisadmin.crt", CertSource::Filesystem, record(EXPIRED));

        let expiry = classify(&store, now);
        assert_eq!(expiry.expired, vec!["aerisadmin.crt"]);
        assert_eq!(expiry.expiring, vec!["server.crt"]);
        assert_eq!(expiry.code(), StatusCode::Error);
        assert_eq!(
            expiry.message().as_deref(),
            Some("Expired: aerisadmin.crt / Expiring: server.crt")
        );

        let mut store = CertificateStore::new();
        store.insert("server.crt", CertSource::Filesystem, server);
        let expiry = classify(&store, now);
        assert_eq!(expiry.code(), StatusCode::Warning);
        assert_eq!(expiry.message().as_deref(), Some("Expiring: server.crt"));
    }

    #[tokio::test]
    async fn bundles_are_unsupported() {
        let root = TempDir::new().unwrap();
        let mut unit = CertExpiration::new(test_support::bundle("cert_expiration", root.path()));
        assert_eq!(unit.scan().await.unwrap(), StatusCode::Unsupported);
    }

    fn patch_session(start_aeris_exit: i32) -> Arc<ScriptedSession> {
        Arc::new(
            ScriptedSession::new("cvp1")
                .respond("cvpi version", "2021.1.0", 0)
                .respond("start aeris", "", start_aeris_exit)
                .respond("cvpi --prompt=false", "", 0)
                .respond("killall", "", 0)
                .respond("rm -f", "", 0)
                .respond("init.sh", "", 0),
        )
    }

    #[tokio::test]
    async fn patch_regenerates_certificates() {
        let session = patch_session(0);
        let mut unit = CertExpiration::new(test_support::live("cert_expiration", &session, bugcheck_core::Role::Primary, None));

        let verdict = unit.patch(false).await.unwrap();
        assert_eq!(verdict.code, Some(StatusCode::Ok));

        let cvpi: Vec<String> = session
            .commands()
            .into_iter()
            .filter(|command| command.contains("--prompt=false"))
            .collect();
        assert_eq!(
            cvpi,
            vec![
                r#"su - cvp -c "cvpi --prompt=false -v=1 stop all""#,
                r#"su - cvp -c "cvpi --prompt=false -v=1 start aeris""#,
                r#"su - cvp -c "cvpi --prompt=false -v=1 reset ca-init-v1""#,
                r#"su - cvp -c "cvpi --prompt=false -v=1 init ca-init-v1""#,
                r#"su - cvp -c "cvpi --prompt=false -v=1 stop aeris""#,
                r#"su - cvp -c "cvpi --prompt=false -v=1 start all""#,
            ]
        );
    }

    #[tokio::test]
    async fn patch_stops_at_first_failure() {
        let session = patch_session(1);
        let mut unit = CertExpiration::new(test_support::live("cert_expiration", &session, bugcheck_core::Role::Primary, None));

        let verdict = unit.patch(false).await.unwrap();
        assert_eq!(verdict.code, Some(StatusCode::Error));
        assert_eq!(verdict.message.as_deref(), Some("Actions failed: aeris start"));
        assert!(!session.commands().iter().any(|command| command.contains("rm -f")));
    }
}
