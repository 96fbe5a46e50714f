//! Certificate discovery from the node filesystem and Kubernetes secrets.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::Path;
use tracing::{debug, warn, Span};

use bugcheck_core::{BugcheckError, Result};

use super::{CertSource, CertificateRecord, CertificateStore};
use crate::exec::{Executor, RunOptions, Target};

/// Directory holding the node's TLS certificates
pub const DEFAULT_CERT_DIR: &str = "/cvpi/tls/certs/";

/// File extensions treated as certificates
const CERT_EXTENSIONS: &[&str] = &[".crt", ".cert", ".pem"];

/// Secrets whose display name differs from the certificate file name
const SECRET_ALIASES: &[(&str, &str)] = &[("ambassador-tls-origin", "ambassador.crt")];

/// Where Kubernetes secrets are read from
#[derive(Debug, Clone, Copy)]
pub struct SecretSource<'a> {
    /// Executor running `kubectl`
    pub executor: &'a Executor,
    /// Host `kubectl` runs on
    pub target: &'a Target,
}

fn is_certificate_name(name: &str) -> bool {
    CERT_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

fn display_name(secret: &str) -> &str {
    SECRET_ALIASES
        .iter()
        .find(|(alias, _)| *alias == secret)
        .map_or(secret, |(_, name)| *name)
}

impl CertificateStore {
    /// Discover every reachable certificate.
    ///
    /// Failures on a single file or secret are logged and skipped. A name
    /// none of whose copies could be loaded is still listed, with no
    /// sources. Without a [`SecretSource`] only the filesystem is scanned.
    pub async fn discover(cert_dir: &Path, secrets: Option<SecretSource<'_>>, span: &Span) -> Self {
        let mut store = Self::new();
        store.load_directory(cert_dir, span).await;
        if let Some(secrets) = secrets {
            store.load_tls_secrets(secrets, span).await;
            store.load_opaque_secrets(secrets, span).await;
        }
        debug!(parent: span, certificates = store.len(), "certificate discovery finished");
        store
    }

    async fn load_directory(&mut self, dir: &Path, span: &Span) {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(parent: span, path = %dir.display(), error = %e, "certificate directory not readable");
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(parent: span, path = %dir.display(), error = %e, "error listing certificate directory");
                    break;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_certificate_name(&name) {
                continue;
            }
            let path = entry.path();
            let loaded = tokio::fs::read(&path)
                .await
                .map_err(|e| BugcheckError::io(path.display().to_string(), e))
                .and_then(|contents| CertificateRecord::from_pem(&name, &contents));
            match loaded {
                Ok(record) => self.insert(name, CertSource::Filesystem, record),
                Err(e) => {
                    warn!(parent: span, path = %path.display(), error = %e, "could not load certificate from file");
                    self.declare(name);
                }
            }
        }
    }

    async fn load_tls_secrets(&mut self, secrets: SecretSource<'_>, span: &Span) {
        for secret in list_secrets(secrets, "kubernetes.io/tls").await {
            let command = format!("kubectl get secret {secret} -o 'go-template={{{{ index .data \"tls.crt\" }}}}'");
            let encoded = secrets
                .executor
                .run(&command, secrets.target, &RunOptions::default())
                .await
                .stdout()
                .concat();
            let name = display_name(&secret);
            match decode_certificate(name, &encoded) {
                Ok(record) => self.insert(name, CertSource::Kubernetes, record),
                Err(e) => {
                    warn!(parent: span, secret = %secret, certificate = name, error = %e, "could not load certificate from secret");
                    self.declare(name);
                }
            }
        }
    }

    async fn load_opaque_secrets(&mut self, secrets: SecretSource<'_>, span: &Span) {
        for secret in list_secrets(secrets, "Opaque").await {
            let command = format!("kubectl get secret {secret} -o yaml");
            let document = secrets
                .executor
                .run(&command, secrets.target, &RunOptions::default())
                .await
                .stdout()
                .join("\n");
            let parsed: serde_yaml::Value = match serde_yaml::from_str(&document) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(parent: span, secret = %secret, error = %e, "could not parse secret");
                    continue;
                }
            };
            let Some(data) = parsed.get("data").and_then(serde_yaml::Value::as_mapping) else {
                continue;
            };

            for (key, value) in data {
                let (Some(name), Some(encoded)) = (key.as_str(), value.as_str()) else {
                    continue;
                };
                if !is_certificate_name(name) {
                    continue;
                }
                match decode_certificate(name, encoded) {
                    Ok(record) => self.insert(name, CertSource::Kubernetes, record),
                    Err(e) => {
                        warn!(parent: span, secret = %secret, certificate = name, error = %e, "could not load certificate from secret");
                        self.declare(name);
                    }
                }
            }
        }
    }
}

/// Secret names of the given type, without the `secret/` prefix
async fn list_secrets(secrets: SecretSource<'_>, kind: &str) -> Vec<String> {
    let command = format!("kubectl get secrets --field-selector type=\"{kind}\" -oname");
    secrets
        .executor
        .run(&command, secrets.target, &RunOptions::default())
        .await
        .stdout()
        .into_iter()
        .map(|line| {
            line.split_once('/')
                .map_or_else(|| line.clone(), |(_, name)| name.to_string())
        })
        .filter(|name| !name.is_empty())
        .collect()
}

fn decode_certificate(name: &str, encoded: &str) -> Result<CertificateRecord> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let pem = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| BugcheckError::CertificateParse {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
    CertificateRecord::from_pem(name, &pem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::session::RemoteSession;
    use crate::testing::ScriptedSession;
    use std::sync::Arc;
    use tempfile::TempDir;

    const CA: &str = include_str!("testdata/ca.pem");
    const SERVER: &str = include_str!("testdata/server.pem");

    #[test]
    fn alias_and_extensions() {
        assert_eq!(display_name("ambassador-tls-origin"), "ambassador.crt");
        assert_eq!(display_name("cvp.crt"), "cvp.crt");
        assert!(is_certificate_name("aerisadmin.cert"));
        assert!(!is_certificate_name("cvp.key"));
    }

    #[tokio::test]
    async fn filesystem_discovery_skips_broken_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ca.crt"), CA).unwrap();
        std::fs::write(dir.path().join("broken.pem"), "garbage").unwrap();
        std::fs::write(dir.path().join("cvp.key"), "not a cert").unwrap();

        let store = CertificateStore::discover(dir.path(), None, &Span::none()).await;

        assert_eq!(store.list().collect::<Vec<_>>(), vec!["broken.pem", "ca.crt"]);
        assert!(store.get("ca.crt", Some(CertSource::Filesystem)).is_some());
        assert_eq!(store.sources("broken.pem"), Some(vec![]));
        assert!(store.get("broken.pem", None).is_none());
    }

    #[tokio::test]
    async fn secrets_are_decoded_and_aliased() {
        let tls = STANDARD.encode(SERVER);
        let opaque = format!(
            "apiVersion: v1\nkind: Secret\ndata:\n  ca.crt: {}\n  token: c2VjcmV0\n  bad.pem: \"!!!\"\n",
            STANDARD.encode(CA)
        );
        let session = Arc::new(
            ScriptedSession::new("cvp1")
                .respond("type=\"kubernetes.io/tls\"", "secret/ambassador-tls-origin", 0)
                .respond("type=\"Opaque\"", "secret/cvp-certs", 0)
                .respond("secret ambassador-tls-origin", &tls, 0)
                .respond("secret cvp-certs -o yaml", &opaque, 0),
        );
        let executor = Executor::new(Arc::new(MemoryCache::new()), "bugcheck-test-host");
        let target = Target::Remote {
            host: "cvp1".into(),
            session: Some(Arc::clone(&session) as Arc<dyn RemoteSession>),
        };
        let dir = TempDir::new().unwrap();

        let store = CertificateStore::discover(
            dir.path(),
            Some(SecretSource {
                executor: &executor,
                target: &target,
            }),
            &Span::none(),
        )
        .await;

        assert_eq!(store.list().collect::<Vec<_>>(), vec!["ambassador.crt", "bad.pem", "ca.crt"]);
        assert_eq!(store.sources("ambassador.crt"), Some(vec![CertSource::Kubernetes]));
        assert_eq!(store.sources("bad.pem"), Some(vec![]));
        assert!(store.get("bad.pem", None).is_none());
    }
}
