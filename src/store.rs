//! The data store contract and the backend hooks behind it.
//!
//! [`DataStore`] is the only surface the engine calls. Backends do not
//! implement it directly: they implement the primitive [`StoreBackend`] hooks
//! and are wrapped in a [`BackedStore`](crate::base::BackedStore), which adds
//! dispatch onto the engine's runtime, listener notification and
//! the composite operations (move, default seeding, bulk operations).

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::any::Any;
use std::sync::Arc;

use crate::config::ConfigNode;
use crate::data::{ContextInheritance, ImmutableSubjectData, RankLadder};
use crate::engine::PermissionsEngine;
use crate::error::{Result, StoreError};
use crate::listener::Listener;
use crate::watch::WatchStream;

/// Type-erased result of a bulk operation.
pub type BulkValue = Box<dyn Any + Send>;

/// A bulk operation: runs on a blocking thread against the raw store.
pub type BulkOperation = Box<dyn FnOnce(&dyn DataStore) -> Result<BulkValue> + Send>;

/// Lazily fetched `(identifier, data)` pairs, see [`DataStore::get_all`].
pub type SubjectDataIter<'a> =
    Box<dyn Iterator<Item = Result<(String, ImmutableSubjectData)>> + Send + 'a>;

/// What a backend found when it was initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initialized {
    /// Storage already existed.
    Existing,
    /// Storage was created; default data should be seeded.
    Created,
}

/// The operation set every data store offers the engine.
///
/// Every async operation resolves to a value or a [`StoreError`]; backend
/// failures are never swallowed.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Identifier this store was configured under.
    fn name(&self) -> &str;

    /// Bind the store to its engine and prepare the backend.
    ///
    /// Must be called once, before any other operation.
    async fn initialize(&self, engine: Arc<dyn PermissionsEngine>) -> Result<bool>;

    /// True if initialization created fresh storage.
    fn is_first_run(&self) -> bool;

    /// Fetch the current data of a subject.
    ///
    /// `listener` is registered once the fetch succeeded and is called on
    /// every later write of this key, not for the value returned here.
    async fn get_data(
        &self,
        subject_type: &str,
        identifier: &str,
        listener: Option<Listener<ImmutableSubjectData>>,
    ) -> Result<Option<ImmutableSubjectData>>;

    /// Store (or with `None`, remove) the data of a subject.
    ///
    /// Returns what was stored; listeners of the key are called with it.
    async fn set_data(
        &self,
        subject_type: &str,
        identifier: &str,
        data: Option<ImmutableSubjectData>,
    ) -> Result<Option<ImmutableSubjectData>>;

    /// Check whether a subject has stored data.
    async fn is_registered(&self, subject_type: &str, identifier: &str) -> Result<bool>;

    /// All identifiers with stored data of a subject type.
    async fn get_all_identifiers(&self, subject_type: &str) -> Result<Vec<String>>;

    /// All subject types with stored data.
    async fn get_registered_types(&self) -> Result<Vec<String>>;

    /// Every subject of a type, fetched lazily one by one.
    ///
    /// This blocks the calling thread on each fetch. It is meant for
    /// administrative enumeration and must be called from a blocking context
    /// (inside a bulk operation or `spawn_blocking`), never from an async task.
    fn get_all(&self, subject_type: &str) -> Result<SubjectDataIter<'_>>;

    /// Type-erased form of [`DataStoreExt::perform_bulk_operation`].
    async fn perform_bulk_operation_boxed(&self, operation: BulkOperation) -> Result<BulkValue>;

    /// Fetch a rank ladder; an unknown name yields an empty ladder.
    async fn get_rank_ladder(
        &self,
        name: &str,
        listener: Option<Listener<RankLadder>>,
    ) -> Result<RankLadder>;

    /// Store (or with `None`, remove) a rank ladder.
    async fn set_rank_ladder(
        &self,
        name: &str,
        ladder: Option<RankLadder>,
    ) -> Result<Option<RankLadder>>;

    /// Check whether a rank ladder is stored under `name`.
    async fn has_rank_ladder(&self, name: &str) -> Result<bool>;

    /// Names of all stored rank ladders.
    async fn get_all_rank_ladders(&self) -> Result<Vec<String>>;

    /// Fetch context inheritance; nothing stored yields an empty one.
    ///
    /// `listener` is registered once the fetch succeeded.
    async fn get_context_inheritance(
        &self,
        listener: Option<Listener<ContextInheritance>>,
    ) -> Result<ContextInheritance>;

    /// Replace the context inheritance.
    async fn set_context_inheritance(
        &self,
        inheritance: ContextInheritance,
    ) -> Result<ContextInheritance>;

    /// Rename a subject's data to a new key.
    ///
    /// Fails with [`StoreError::MoveConflict`] unless the old key exists and
    /// the new key does not.
    async fn move_data(
        &self,
        old_type: &str,
        old_identifier: &str,
        new_type: &str,
        new_identifier: &str,
    ) -> Result<()>;

    /// Write this store's configuration into `node`.
    ///
    /// Returns the name of the factory that created the store.
    fn serialize(&self, node: &mut ConfigNode) -> Result<String>;

    /// Subscribe to change events matching a topic pattern.
    fn watch(&self, pattern: &str) -> WatchStream;

    /// Release backend resources.
    async fn close(&self) -> Result<()>;
}

/// Typed convenience methods over any [`DataStore`].
#[async_trait]
pub trait DataStoreExt: DataStore {
    /// Run `operation` against the raw store on a blocking thread.
    ///
    /// The operation may block (e.g. via `Handle::block_on`); the backend
    /// persists whatever it changed before the result is returned.
    async fn perform_bulk_operation<T, F>(&self, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn DataStore) -> Result<T> + Send + 'static;
}

#[async_trait]
impl<S: DataStore + ?Sized> DataStoreExt for S {
    async fn perform_bulk_operation<T, F>(&self, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn DataStore) -> Result<T> + Send + 'static,
    {
        let erased: BulkOperation =
            Box::new(move |store| operation(store).map(|value| Box::new(value) as BulkValue));
        let value = self.perform_bulk_operation_boxed(erased).await?;
        value
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| StoreError::Backend("bulk operation returned an unexpected type".to_string()))
    }
}

/// Primitive persistence hooks a backend provides.
///
/// Hooks run on the engine's runtime and may perform I/O. Rank ladder
/// names arrive lowercased.
#[async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    /// Backend-specific configuration.
    type Config: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Prepare storage, reporting whether it was freshly created.
    async fn initialize_internal(&self) -> Result<Initialized>;

    async fn get_data_internal(
        &self,
        subject_type: &str,
        identifier: &str,
    ) -> Result<Option<ImmutableSubjectData>>;

    async fn set_data_internal(
        &self,
        subject_type: &str,
        identifier: &str,
        data: Option<ImmutableSubjectData>,
    ) -> Result<Option<ImmutableSubjectData>>;

    async fn is_registered_internal(&self, subject_type: &str, identifier: &str) -> Result<bool> {
        Ok(self
            .get_data_internal(subject_type, identifier)
            .await?
            .is_some())
    }

    async fn get_all_identifiers_internal(&self, subject_type: &str) -> Result<Vec<String>>;

    async fn get_registered_types_internal(&self) -> Result<Vec<String>>;

    async fn get_rank_ladder_internal(&self, name: &str) -> Result<Option<RankLadder>>;

    async fn set_rank_ladder_internal(
        &self,
        name: &str,
        ladder: Option<RankLadder>,
    ) -> Result<Option<RankLadder>>;

    async fn get_all_rank_ladders_internal(&self) -> Result<Vec<String>>;

    async fn get_context_inheritance_internal(&self) -> Result<Option<ContextInheritance>>;

    async fn set_context_inheritance_internal(
        &self,
        inheritance: ContextInheritance,
    ) -> Result<ContextInheritance>;

    /// Run a bulk operation synchronously. Blocking calls are fine here.
    fn perform_bulk_operation_sync(
        &self,
        store: &dyn DataStore,
        operation: BulkOperation,
    ) -> Result<BulkValue>;

    async fn close_internal(&self) -> Result<()> {
        Ok(())
    }
}
