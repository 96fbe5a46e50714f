//! Contexts for unit tests.

use std::path::Path;
use std::sync::Arc;

use bugcheck_core::{Role, Version};
use bugcheck_runtime::testing::ScriptedSession;
use bugcheck_runtime::{ClusterStore, ConfigureOptions, NodeConfig, RemoteSession, UnitContext, UnitMetadata};

fn base() -> UnitContext {
    UnitContext::new()
        .with_local_host("bugcheck-test-host")
        .with_os_user("root")
        .with_engine_version(Version::new(3, 5, 0))
}

fn metadata(name: &str) -> UnitMetadata {
    UnitMetadata {
        name: Some(name.to_string()),
        bug_engine_version: Some(Version::new(3, 5, 0)),
        ..UnitMetadata::default()
    }
}

/// Context inspecting `session`'s host with the given role
pub fn live(name: &str, session: &Arc<ScriptedSession>, role: Role, store: Option<Arc<dyn ClusterStore>>) -> UnitContext {
    let mut context = base();
    context
        .configure(ConfigureOptions {
            node: Some(NodeConfig {
                host: Some(session.host().to_string()),
                role: Some(role),
                session: Some(Arc::clone(session) as Arc<dyn RemoteSession>),
                ..NodeConfig::default()
            }),
            metadata: Some(metadata(name)),
            cluster_store: store,
            ..ConfigureOptions::default()
        })
        .unwrap();
    context
}

/// Live context reading certificates from `cert_dir`
pub fn live_with_certs(name: &str, session: &Arc<ScriptedSession>, cert_dir: &Path) -> UnitContext {
    let mut context = live(name, session, Role::Primary, None);
    context
        .configure(ConfigureOptions {
            cert_dir: Some(cert_dir.to_path_buf()),
            ..ConfigureOptions::default()
        })
        .unwrap();
    context
}

/// Context reading the bundle extracted under `root` for node `cvp1`
pub fn bundle(name: &str, root: &Path) -> UnitContext {
    let node = root.join("nodes").join("cvp1");
    let mut context = base();
    context
        .configure(ConfigureOptions {
            node: Some(NodeConfig {
                host: Some("cvp1".into()),
                role: Some(Role::Primary),
                debug_log_dir: Some(node.join("logs").display().to_string()),
                debug_cmd_dir: Some(node.join("commands").display().to_string()),
                ..NodeConfig::default()
            }),
            metadata: Some(metadata(name)),
            ..ConfigureOptions::default()
        })
        .unwrap();
    context
}
