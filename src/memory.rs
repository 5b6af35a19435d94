//! In-memory backend.
//!
//! NOT durable: data is lost when the store is dropped. Used for testing,
//! development, and as the engine's fallback when no backend is configured.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::data::{ContextInheritance, ImmutableSubjectData, RankLadder, SubjectDataKey};
use crate::error::Result;
use crate::factory::StoreFactory;
use crate::store::{BulkOperation, BulkValue, DataStore, Initialized, StoreBackend};

/// Name the memory factory is registered under.
pub const FACTORY_NAME: &str = "memory";

/// Configuration of the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MemoryConfig {
    /// Report fresh storage on initialize, so default data is seeded.
    pub seed_defaults: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            seed_defaults: true,
        }
    }
}

/// Factory for in-memory stores.
pub fn factory() -> Arc<StoreFactory<MemoryBackend>> {
    Arc::new(
        StoreFactory::<MemoryBackend>::new(FACTORY_NAME, |properties| {
            Ok(MemoryBackend::new(properties.config().clone()))
        })
        .with_friendly_name("In-memory"),
    )
}

/// Backend keeping everything in ordered maps behind `RwLock`s.
pub struct MemoryBackend {
    config: MemoryConfig,
    subjects: RwLock<BTreeMap<SubjectDataKey, ImmutableSubjectData>>,
    rank_ladders: RwLock<BTreeMap<String, RankLadder>>,
    context_inheritance: RwLock<Option<ContextInheritance>>,
    initialized: AtomicBool,
}

impl MemoryBackend {
    /// Empty backend.
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            subjects: RwLock::new(BTreeMap::new()),
            rank_ladders: RwLock::new(BTreeMap::new()),
            context_inheritance: RwLock::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    /// Number of stored subjects.
    pub fn len(&self) -> usize {
        self.subjects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.read().is_empty()
    }

    /// Drop all subjects, ladders and context inheritance.
    pub fn clear(&self) {
        self.subjects.write().clear();
        self.rank_ladders.write().clear();
        *self.context_inheritance.write() = None;
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    type Config = MemoryConfig;

    async fn initialize_internal(&self) -> Result<Initialized> {
        let first = !self.initialized.swap(true, Ordering::SeqCst);
        if first && self.config.seed_defaults {
            Ok(Initialized::Created)
        } else {
            Ok(Initialized::Existing)
        }
    }

    async fn get_data_internal(
        &self,
        subject_type: &str,
        identifier: &str,
    ) -> Result<Option<ImmutableSubjectData>> {
        let key = SubjectDataKey::new(subject_type, identifier);
        Ok(self.subjects.read().get(&key).cloned())
    }

    async fn set_data_internal(
        &self,
        subject_type: &str,
        identifier: &str,
        data: Option<ImmutableSubjectData>,
    ) -> Result<Option<ImmutableSubjectData>> {
        let key = SubjectDataKey::new(subject_type, identifier);
        let mut subjects = self.subjects.write();
        match data {
            Some(data) => {
                subjects.insert(key, data.clone());
                Ok(Some(data))
            }
            None => {
                subjects.remove(&key);
                Ok(None)
            }
        }
    }

    async fn is_registered_internal(&self, subject_type: &str, identifier: &str) -> Result<bool> {
        let key = SubjectDataKey::new(subject_type, identifier);
        Ok(self.subjects.read().contains_key(&key))
    }

    async fn get_all_identifiers_internal(&self, subject_type: &str) -> Result<Vec<String>> {
        Ok(self
            .subjects
            .read()
            .keys()
            .filter(|key| key.subject_type == subject_type)
            .map(|key| key.identifier.clone())
            .collect())
    }

    async fn get_registered_types_internal(&self) -> Result<Vec<String>> {
        let mut types: Vec<String> = self
            .subjects
            .read()
            .keys()
            .map(|key| key.subject_type.clone())
            .collect();
        types.dedup();
        Ok(types)
    }

    async fn get_rank_ladder_internal(&self, name: &str) -> Result<Option<RankLadder>> {
        Ok(self.rank_ladders.read().get(name).cloned())
    }

    async fn set_rank_ladder_internal(
        &self,
        name: &str,
        ladder: Option<RankLadder>,
    ) -> Result<Option<RankLadder>> {
        let mut ladders = self.rank_ladders.write();
        match ladder {
            Some(ladder) => {
                ladders.insert(name.to_string(), ladder.clone());
                Ok(Some(ladder))
            }
            None => {
                ladders.remove(name);
                Ok(None)
            }
        }
    }

    async fn get_all_rank_ladders_internal(&self) -> Result<Vec<String>> {
        Ok(self.rank_ladders.read().keys().cloned().collect())
    }

    async fn get_context_inheritance_internal(&self) -> Result<Option<ContextInheritance>> {
        Ok(self.context_inheritance.read().clone())
    }

    async fn set_context_inheritance_internal(
        &self,
        inheritance: ContextInheritance,
    ) -> Result<ContextInheritance> {
        *self.context_inheritance.write() = Some(inheritance.clone());
        Ok(inheritance)
    }

    fn perform_bulk_operation_sync(
        &self,
        store: &dyn DataStore,
        operation: BulkOperation,
    ) -> Result<BulkValue> {
        // Every write is already visible; nothing to flush.
        operation(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ContextSet;

    fn data(permission: &str) -> ImmutableSubjectData {
        ImmutableSubjectData::new().with_permission(ContextSet::new(), permission, 1)
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let backend = MemoryBackend::default();

        let stored = backend
            .set_data_internal("user", "alice", Some(data("a")))
            .await
            .unwrap();
        assert_eq!(stored, Some(data("a")));
        assert_eq!(
            backend.get_data_internal("user", "alice").await.unwrap(),
            Some(data("a"))
        );
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let backend = MemoryBackend::default();
        backend
            .set_data_internal("user", "alice", Some(data("a")))
            .await
            .unwrap();

        backend.set_data_internal("user", "alice", None).await.unwrap();
        assert!(!backend.is_registered_internal("user", "alice").await.unwrap());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_identifiers_and_types() {
        let backend = MemoryBackend::default();
        for (t, id) in [("user", "b"), ("user", "a"), ("group", "admin")] {
            backend.set_data_internal(t, id, Some(data(id))).await.unwrap();
        }

        assert_eq!(
            backend.get_all_identifiers_internal("user").await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            backend.get_registered_types_internal().await.unwrap(),
            vec!["group".to_string(), "user".to_string()]
        );
    }

    #[tokio::test]
    async fn test_initialize_reports_creation_once() {
        let backend = MemoryBackend::default();
        assert_eq!(backend.initialize_internal().await.unwrap(), Initialized::Created);
        assert_eq!(backend.initialize_internal().await.unwrap(), Initialized::Existing);

        let unseeded = MemoryBackend::new(MemoryConfig {
            seed_defaults: false,
        });
        assert_eq!(unseeded.initialize_internal().await.unwrap(), Initialized::Existing);
    }

    #[tokio::test]
    async fn test_clear() {
        let backend = MemoryBackend::default();
        backend.set_data_internal("user", "a", Some(data("a"))).await.unwrap();
        backend
            .set_rank_ladder_internal("staff", Some(RankLadder::new("staff")))
            .await
            .unwrap();
        backend
            .set_context_inheritance_internal(ContextInheritance::new())
            .await
            .unwrap();

        backend.clear();
        assert!(backend.is_empty());
        assert!(backend.get_all_rank_ladders_internal().await.unwrap().is_empty());
        assert!(backend.get_context_inheritance_internal().await.unwrap().is_none());
    }
}
