//! Kubernetes resource descriptions.

mod describe;

pub use describe::{parse_describe, AttrNode, K8sResource, MAX_DEPTH};

use std::collections::BTreeMap;

use bugcheck_core::{BugcheckError, Result};

/// Container sections of a pod description
const CONTAINER_SECTIONS: &[&str] = &["Init Containers", "Containers"];

/// Keep the containers of `resources` that match `filter`, keyed by
/// container name.
///
/// A container matches when it is not running and its state reason equals
/// the filter, when its state equals the filter, or when its pod status
/// equals the filter. Resources that are not pods are ignored.
pub fn filter_pods(resources: &[K8sResource], filter: &str) -> Result<BTreeMap<String, K8sResource>> {
    let mut matched = BTreeMap::new();
    for pod in resources.iter().filter(|r| r.is_pod()) {
        for section in CONTAINER_SECTIONS {
            let Some(containers) = pod.attributes.get(*section) else {
                continue;
            };
            for (container, attributes) in &containers.children {
                if container_matches(pod, container, attributes, filter)? {
                    matched.insert(container.clone(), pod.clone());
                }
            }
        }
    }
    Ok(matched)
}

fn container_matches(pod: &K8sResource, container: &str, attributes: &AttrNode, filter: &str) -> Result<bool> {
    let missing = |attribute: &str| BugcheckError::MissingAttribute {
        resource: container.to_string(),
        attribute: attribute.to_string(),
    };

    let state_node = attributes.get("State").ok_or_else(|| missing("State"))?;
    let state = state_node.value().ok_or_else(|| missing("State"))?;
    if state != "Running" {
        let reason = state_node
            .get("Reason")
            .and_then(AttrNode::value)
            .ok_or_else(|| missing("State.Reason"))?;
        if reason == filter {
            return Ok(true);
        }
    }
    if state == filter {
        return Ok(true);
    }

    let status = pod
        .attribute(&["Status"])
        .and_then(AttrNode::value)
        .ok_or_else(|| BugcheckError::MissingAttribute {
            resource: pod.name.clone(),
            attribute: "Status".to_string(),
        })?;
    Ok(status == filter)
}
