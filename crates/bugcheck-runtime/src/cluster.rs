//! Values shared between the instances of a unit running on different nodes.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

use bugcheck_core::{Result, Role};

/// Storage for per-node values, keyed by role and key name
#[async_trait]
pub trait ClusterStore: fmt::Debug + Send + Sync {
    /// Store `value` under `key` for `role`, replacing any previous value
    async fn save(&self, role: Role, key: &str, value: Value) -> Result<()>;

    /// Value stored under `key` for `role`
    async fn get(&self, role: Role, key: &str) -> Result<Option<Value>>;

    /// Values stored under `key` for every role
    async fn values(&self, key: &str) -> Result<ClusterValues> {
        Ok(ClusterValues {
            primary: self.get(Role::Primary, key).await?,
            secondary: self.get(Role::Secondary, key).await?,
            tertiary: self.get(Role::Tertiary, key).await?,
        })
    }
}

/// Value of one key on each node, `None` where nothing was saved
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterValues {
    pub primary: Option<Value>,
    pub secondary: Option<Value>,
    pub tertiary: Option<Value>,
}

impl ClusterValues {
    /// Value saved by `role`
    #[must_use]
    pub const fn get(&self, role: Role) -> Option<&Value> {
        match role {
            Role::Primary => self.primary.as_ref(),
            Role::Secondary => self.secondary.as_ref(),
            Role::Tertiary => self.tertiary.as_ref(),
        }
    }

    /// Saved values in cluster order
    pub fn iter(&self) -> impl Iterator<Item = (Role, &Value)> {
        Role::ALL
            .into_iter()
            .filter_map(|role| self.get(role).map(|value| (role, value)))
    }

    /// Number of nodes that saved a value
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns true if no node saved a value
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process [`ClusterStore`], shared between units through an `Arc`
#[derive(Debug, Default)]
pub struct MemoryClusterStore {
    values: RwLock<HashMap<(Role, String), Value>>,
}

impl MemoryClusterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterStore for MemoryClusterStore {
    async fn save(&self, role: Role, key: &str, value: Value) -> Result<()> {
        self.values.write().await.insert((role, key.to_string()), value);
        Ok(())
    }

    async fn get(&self, role: Role, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(&(role, key.to_string())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn values_are_collected_per_role() {
        let store = Arc::new(MemoryClusterStore::new());
        store.save(Role::Primary, "md5", json!({"a": "1"})).await.unwrap();
        store.save(Role::Tertiary, "md5", json!({"a": "2"})).await.unwrap();
        store.save(Role::Tertiary, "md5", json!({"a": "3"})).await.unwrap();

        let values = store.values("md5").await.unwrap();
        assert_eq!(values.get(Role::Primary), Some(&json!({"a": "1"})));
        assert_eq!(values.secondary, None);
        assert_eq!(values.get(Role::Tertiary), Some(&json!({"a": "3"})));
        assert_eq!(
            values.iter().map(|(role, _)| role).collect::<Vec<_>>(),
            vec![Role::Primary, Role::Tertiary]
        );
        assert_eq!(values.len(), 2);

        assert!(store.values("other").await.unwrap().is_empty());
    }
}
