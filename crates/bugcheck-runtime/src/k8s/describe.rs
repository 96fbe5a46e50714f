//! Parser for `kubectl describe` output.
//!
//! Attribute lines look like `<2k spaces><Key>: <value>` where `k` is the
//! nesting depth. A line is an attribute only when its indentation is even,
//! it starts with a letter, and its first colon is followed by whitespace or
//! the end of the line. Everything else (list items, label continuations,
//! tolerations) is skipped.
//!
//! Multi-line values such as annotations continue on lines indented to (or
//! past) the value column of the key that opened them. Those lines are
//! skipped even when they look like `key: value`.

use serde::Serialize;
use std::collections::BTreeMap;

use bugcheck_core::{BugcheckError, Result};

/// Deepest supported nesting level, exclusive
pub const MAX_DEPTH: usize = 6;

/// An attribute: an optional inline value plus nested attributes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttrNode {
    /// Text after the colon, if any
    pub value: Option<String>,
    /// Nested attributes
    pub children: BTreeMap<String, AttrNode>,
}

impl AttrNode {
    /// Nested attribute `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        self.children.get(key)
    }

    /// Inline value
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// One described resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct K8sResource {
    /// Value of the top-level `Name:` attribute
    pub name: String,
    /// Resource kind as requested, e.g. `pods`
    pub kind: String,
    /// Top-level attributes, including `Name`
    pub attributes: BTreeMap<String, AttrNode>,
}

impl K8sResource {
    /// Attribute at `path`
    #[must_use]
    pub fn attribute(&self, path: &[&str]) -> Option<&AttrNode> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.attributes.get(*first)?, |node, key| node.get(key))
    }

    /// Returns true for pods
    #[must_use]
    pub fn is_pod(&self) -> bool {
        matches!(self.kind.as_str(), "pod" | "pods")
    }
}

#[derive(Debug)]
struct Entry {
    line: usize,
    depth: usize,
    key: String,
    value: Option<String>,
}

/// Parse describe output for resources of `kind`.
///
/// Attribute lines nested [`MAX_DEPTH`] levels or deeper, or nested more
/// than one level below their parent, are errors.
pub fn parse_describe(lines: &[String], kind: &str) -> Result<Vec<K8sResource>> {
    let entries = tokenize(lines)?;

    let starts: Vec<usize> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.depth == 0 && e.key == "Name")
        .map(|(i, _)| i)
        .collect();

    let mut resources = Vec::with_capacity(starts.len());
    for (n, start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(entries.len());
        let group = &entries[*start..end];
        let name = group[0]
            .value
            .as_deref()
            .and_then(|v| v.split_whitespace().next())
            .unwrap_or_default()
            .to_string();

        let mut pos = 0;
        let attributes = parse_level(group, &mut pos, 0)?;
        resources.push(K8sResource {
            name,
            kind: kind.to_string(),
            attributes,
        });
    }
    Ok(resources)
}

fn tokenize(lines: &[String]) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    // Column where the last inline value started
    let mut value_column: Option<usize> = None;
    for (index, line) in lines.iter().enumerate() {
        let body = line.trim_start_matches(' ');
        let indent = line.len() - body.len();
        if indent % 2 != 0 || !body.starts_with(|c: char| c.is_ascii_alphabetic()) {
            continue;
        }
        let Some((key, rest)) = body.split_once(':') else {
            continue;
        };
        if !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
            continue;
        }
        if value_column.is_some_and(|column| indent >= column) {
            continue;
        }

        let value = rest.trim();
        value_column = (!value.is_empty()).then(|| line.len() - rest.trim_start().len());

        let depth = indent / 2;
        if depth >= MAX_DEPTH {
            return Err(BugcheckError::DescribeParse {
                line: index + 1,
                reason: format!("attribute {key} nested {depth} levels deep (max {})", MAX_DEPTH - 1),
            });
        }

        entries.push(Entry {
            line: index + 1,
            depth,
            key: key.trim().to_string(),
            value: (!value.is_empty()).then(|| value.to_string()),
        });
    }
    Ok(entries)
}

fn parse_level(entries: &[Entry], pos: &mut usize, depth: usize) -> Result<BTreeMap<String, AttrNode>> {
    let mut attributes = BTreeMap::new();
    while let Some(entry) = entries.get(*pos) {
        if entry.depth < depth {
            break;
        }
        if entry.depth > depth {
            return Err(BugcheckError::DescribeParse {
                line: entry.line,
                reason: format!("attribute {} skips a nesting level", entry.key),
            });
        }
        *pos += 1;

        let children = match entries.get(*pos) {
            Some(next) if next.depth > depth => parse_level(entries, pos, depth + 1)?,
            _ => BTreeMap::new(),
        };
        attributes.insert(
            entry.key.clone(),
            AttrNode {
                value: entry.value.clone(),
                children,
            },
        );
    }
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBE_POD: &str = "\
Name:         coredns-7d8c-abcde
Namespace:    kube-system
Start Time:   Thu, 20 Aug 2020 18:58:27 +0000
Labels:       k8s-app=kube-dns
              pod-template-hash=7d8c
Annotations:  cni.projectcalico.org/podIP: 10.42.0.5/32
              cni.projectcalico.org/podIPs: 10.42.0.5/32
              kubernetes.io/psp: global-unrestricted-psp
Status:       Running
Containers:
  coredns:
    Image:          docker.io/coredns:1.6.9
    Args:
      -conf
      /etc/coredns/Corefile
    State:          Running
      Started:      Thu, 20 Aug 2020 18:58:30 +0000
    Ready:          True
Tolerations:     CriticalAddonsOnly op=Exists
                 node-role.kubernetes.io/master:NoSchedule
Events:          <none>

Name:         aerisdiskmonitor-xyz
Namespace:    default
Status:       Pending
Init Containers:
  init-perms:
    State:          Waiting
      Reason:       CrashLoopBackOff
Containers:
  aerisdiskmonitor:
    State:          Waiting
      Reason:       PodInitializing
";

    fn lines(raw: &str) -> Vec<String> {
        raw.lines().map(str::to_string).collect()
    }

    #[test]
    fn parses_nested_attributes() {
        let pods = parse_describe(&lines(KUBE_POD), "pods").unwrap();
        assert_eq!(pods.len(), 2);

        let coredns = &pods[0];
        assert_eq!(coredns.name, "coredns-7d8c-abcde");
        assert!(coredns.is_pod());
        assert_eq!(
            coredns.attribute(&["Start Time"]).and_then(AttrNode::value),
            Some("Thu, 20 Aug 2020 18:58:27 +0000")
        );
        let state = coredns.attribute(&["Containers", "coredns", "State"]).unwrap();
        assert_eq!(state.value(), Some("Running"));
        assert_eq!(
            state.get("Started").and_then(AttrNode::value),
            Some("Thu, 20 Aug 2020 18:58:30 +0000")
        );
        assert_eq!(
            coredns.attribute(&["Containers", "coredns", "Image"]).and_then(AttrNode::value),
            Some("docker.io/coredns:1.6.9")
        );
        assert!(coredns.attribute(&["Containers", "coredns", "Args"]).unwrap().children.is_empty());
        assert_eq!(coredns.attribute(&["Events"]).and_then(AttrNode::value), Some("<none>"));
        let annotations = coredns.attribute(&["Annotations"]).unwrap();
        assert_eq!(annotations.value(), Some("cni.projectcalico.org/podIP: 10.42.0.5/32"));
        assert!(annotations.children.is_empty());
        assert_eq!(coredns.attribute(&["Status"]).and_then(AttrNode::value), Some("Running"));
        assert_eq!(coredns.attributes.get("Containers").unwrap().value, None);
    }

    #[test]
    fn too_deep_is_an_error() {
        let input = lines("Name: a\nA:\n  B:\n    C:\n      D:\n        E:\n          F:\n            G: deep\n");
        let err = parse_describe(&input, "pods").unwrap_err();
        assert!(matches!(err, BugcheckError::DescribeParse { line: 8, .. }));

        let five_levels = lines("Name: a\nA:\n  B:\n    C:\n      D:\n        E:\n          F: ok\n");
        let parsed = parse_describe(&five_levels, "pods").unwrap();
        assert_eq!(
            parsed[0].attribute(&["A", "B", "C", "D", "E", "F"]).and_then(AttrNode::value),
            Some("ok")
        );
    }

    #[test]
    fn value_continuations_are_skipped() {
        let input = lines(
            "Name: a\nNamespace: default\nAnnotations: a: b\n              c: d\n              e: f\nStatus: Running\n",
        );
        let parsed = parse_describe(&input, "pods").unwrap();
        assert_eq!(parsed[0].attribute(&["Annotations"]).and_then(AttrNode::value), Some("a: b"));
        assert!(parsed[0].attribute(&["c"]).is_none());
        assert_eq!(parsed[0].attribute(&["Status"]).and_then(AttrNode::value), Some("Running"));
    }

    #[test]
    fn skipped_level_is_an_error() {
        let input = lines("Name: a\nA:\n    C: skipped\n");
        let err = parse_describe(&input, "pods").unwrap_err();
        assert!(matches!(err, BugcheckError::DescribeParse { line: 3, .. }));
    }

    #[test]
    fn lines_before_first_resource_are_ignored() {
        let input = lines("Warning: deprecated\nName: a\nStatus: Running\n");
        let parsed = parse_describe(&input, "pods").unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].attribute(&["Status"]).and_then(AttrNode::value), Some("Running"));
    }
}
