//! Shared orchestration wrapped around every backend.
//!
//! [`BackedStore`] implements [`DataStore`] on top of any [`StoreBackend`]:
//!
//! - backend hooks run as tasks on the engine's runtime
//! - successful writes notify the cache listeners and the change feed from
//!   inside the dispatched task, so a caller dropping its future does not
//!   lose notifications
//! - listeners passed to getters are registered only after the fetch
//!   succeeded
//!
//! Writes to the same key are not serialized. Concurrent writers race at the
//! backend and the last commit decides the final notification.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::ConfigNode;
use crate::data::{
    ContextInheritance, ContextSet, ContextValue, ImmutableSubjectData, RankLadder,
    SubjectDataKey, LOCAL_IP_CONTEXT, LOOPBACK_ADDRESS, SUBJECTS_DEFAULTS,
};
use crate::engine::PermissionsEngine;
use crate::error::{Result, StoreError};
use crate::listener::{CacheListenerHolder, Listener};
use crate::properties::StoreProperties;
use crate::store::{
    BulkOperation, BulkValue, DataStore, Initialized, StoreBackend,
    SubjectDataIter,
};
use crate::watch::{StoreEvent, WatchSender, WatchStream};

struct Inner<B: StoreBackend> {
    properties: StoreProperties<B::Config>,
    backend: B,
    engine: RwLock<Option<Arc<dyn PermissionsEngine>>>,
    initializing: AtomicBool,
    first_run: AtomicBool,
    listeners: CacheListenerHolder<SubjectDataKey, ImmutableSubjectData>,
    rank_ladder_listeners: CacheListenerHolder<String, RankLadder>,
    context_inheritance_listeners: CacheListenerHolder<(), ContextInheritance>,
    watcher: WatchSender,
}

/// A [`DataStore`] built from a backend and its properties.
///
/// Cloning is cheap; clones share listeners, backend and engine binding.
pub struct BackedStore<B: StoreBackend> {
    inner: Arc<Inner<B>>,
}

impl<B: StoreBackend> Clone for BackedStore<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: StoreBackend> fmt::Debug for BackedStore<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackedStore")
            .field("name", &self.name())
            .field("factory", &self.inner.properties.factory().name())
            .field("initialized", &self.inner.engine.read().is_some())
            .field("first_run", &self.is_first_run())
            .finish_non_exhaustive()
    }
}

impl<B: StoreBackend> BackedStore<B> {
    /// Wrap `backend`; the store is unusable until [`DataStore::initialize`].
    pub fn new(properties: StoreProperties<B::Config>, backend: B) -> Self {
        Self {
            inner: Arc::new(Inner {
                properties,
                backend,
                engine: RwLock::new(None),
                initializing: AtomicBool::new(false),
                first_run: AtomicBool::new(false),
                listeners: CacheListenerHolder::new(),
                rank_ladder_listeners: CacheListenerHolder::new(),
                context_inheritance_listeners: CacheListenerHolder::new(),
                watcher: WatchSender::default(),
            }),
        }
    }

    /// Identifier, configuration and factory of this store.
    pub fn properties(&self) -> &StoreProperties<B::Config> {
        &self.inner.properties
    }

    /// Backend configuration.
    pub fn config(&self) -> &B::Config {
        self.inner.properties.config()
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// The engine this store was initialized with.
    pub fn engine(&self) -> Option<Arc<dyn PermissionsEngine>> {
        self.inner.engine.read().clone()
    }

    fn executor(&self) -> Result<Handle> {
        self.inner
            .engine
            .read()
            .as_ref()
            .map(|engine| engine.async_executor())
            .ok_or_else(|| StoreError::NotInitialized(self.name().to_string()))
    }

    /// Run `task` on the engine's runtime and wait for its result.
    async fn dispatch<T, F, Fut>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Inner<B>>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let executor = self.executor()?;
        executor.spawn(task(self.inner.clone())).await?
    }

    /// Initialize the backend and seed defaults into fresh storage.
    async fn prepare(&self) -> Result<()> {
        let outcome = self
            .dispatch(|inner| async move { inner.backend.initialize_internal().await })
            .await?;
        info!(store = %self.name(), ?outcome, "data store initialized");

        if outcome == Initialized::Created {
            self.inner.first_run.store(true, Ordering::SeqCst);
            info!(store = %self.name(), "applying default data to new store");
            self.apply_default_data().await?;
        }
        Ok(())
    }

    /// Seed the default subject with full access for loopback connections.
    ///
    /// Runs automatically when the backend reports freshly created storage.
    /// Applying it again leaves the data unchanged.
    pub async fn apply_default_data(&self) -> Result<()> {
        let defaults = self
            .get_data(SUBJECTS_DEFAULTS, SUBJECTS_DEFAULTS, None)
            .await?
            .unwrap_or_default();
        let local: ContextSet = [ContextValue::new(LOCAL_IP_CONTEXT, LOOPBACK_ADDRESS)]
            .into_iter()
            .collect();
        self.set_data(
            SUBJECTS_DEFAULTS,
            SUBJECTS_DEFAULTS,
            Some(defaults.with_default_value(local, 1)),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl<B: StoreBackend> DataStore for BackedStore<B> {
    fn name(&self) -> &str {
        self.inner.properties.identifier()
    }

    async fn initialize(&self, engine: Arc<dyn PermissionsEngine>) -> Result<bool> {
        if self.inner.initializing.swap(true, Ordering::SeqCst) {
            return Err(StoreError::AlreadyInitialized(self.name().to_string()));
        }
        *self.inner.engine.write() = Some(engine);

        if let Err(err) = self.prepare().await {
            warn!(store = %self.name(), error = %err, "data store initialization failed");
            *self.inner.engine.write() = None;
            self.inner.first_run.store(false, Ordering::SeqCst);
            self.inner.initializing.store(false, Ordering::SeqCst);
            return Err(match err {
                err @ StoreError::Loading { .. } => err,
                other => StoreError::loading(self.name(), other),
            });
        }
        Ok(true)
    }

    fn is_first_run(&self) -> bool {
        self.inner.first_run.load(Ordering::SeqCst)
    }

    async fn get_data(
        &self,
        subject_type: &str,
        identifier: &str,
        listener: Option<Listener<ImmutableSubjectData>>,
    ) -> Result<Option<ImmutableSubjectData>> {
        let key = SubjectDataKey::new(subject_type, identifier);
        let lookup = key.clone();
        let data = self
            .dispatch(move |inner| async move {
                inner
                    .backend
                    .get_data_internal(&lookup.subject_type, &lookup.identifier)
                    .await
            })
            .await?;
        self.inner.listeners.add_listener(key, listener);
        Ok(data)
    }

    async fn set_data(
        &self,
        subject_type: &str,
        identifier: &str,
        data: Option<ImmutableSubjectData>,
    ) -> Result<Option<ImmutableSubjectData>> {
        let key = SubjectDataKey::new(subject_type, identifier);
        self.dispatch(move |inner| async move {
            let stored = inner
                .backend
                .set_data_internal(&key.subject_type, &key.identifier, data)
                .await?;
            if let Some(stored) = &stored {
                inner.listeners.call(&key, stored);
            }
            inner.watcher.send(StoreEvent::Subject {
                key,
                data: stored.clone(),
            });
            Ok(stored)
        })
        .await
    }

    async fn is_registered(&self, subject_type: &str, identifier: &str) -> Result<bool> {
        let key = SubjectDataKey::new(subject_type, identifier);
        self.dispatch(move |inner| async move {
            inner
                .backend
                .is_registered_internal(&key.subject_type, &key.identifier)
                .await
        })
        .await
    }

    async fn get_all_identifiers(&self, subject_type: &str) -> Result<Vec<String>> {
        let subject_type = subject_type.to_string();
        self.dispatch(move |inner| async move {
            inner.backend.get_all_identifiers_internal(&subject_type).await
        })
        .await
    }

    async fn get_registered_types(&self) -> Result<Vec<String>> {
        self.dispatch(|inner| async move { inner.backend.get_registered_types_internal().await })
            .await
    }

    fn get_all(&self, subject_type: &str) -> Result<SubjectDataIter<'_>> {
        let executor = self.executor()?;
        let identifiers = executor.block_on(self.get_all_identifiers(subject_type))?;
        let subject_type = subject_type.to_string();
        Ok(Box::new(identifiers.into_iter().filter_map(move |identifier| {
            // Subjects removed since enumeration are skipped.
            match executor.block_on(self.get_data(&subject_type, &identifier, None)) {
                Ok(Some(data)) => Some(Ok((identifier, data))),
                Ok(None) => None,
                Err(err) => Some(Err(err)),
            }
        })))
    }

    async fn perform_bulk_operation_boxed(&self, operation: BulkOperation) -> Result<BulkValue> {
        let executor = self.executor()?;
        let store = self.clone();
        debug!(store = %self.name(), "running bulk operation");
        executor
            .spawn_blocking(move || {
                store
                    .inner
                    .backend
                    .perform_bulk_operation_sync(&store, operation)
            })
            .await?
    }

    async fn get_rank_ladder(
        &self,
        name: &str,
        listener: Option<Listener<RankLadder>>,
    ) -> Result<RankLadder> {
        let key = name.to_lowercase();
        let lookup = key.clone();
        let ladder = self
            .dispatch(move |inner| async move {
                inner.backend.get_rank_ladder_internal(&lookup).await
            })
            .await?
            .unwrap_or_else(|| RankLadder::new(name));
        self.inner.rank_ladder_listeners.add_listener(key, listener);
        Ok(ladder)
    }

    async fn set_rank_ladder(
        &self,
        name: &str,
        ladder: Option<RankLadder>,
    ) -> Result<Option<RankLadder>> {
        let key = name.to_lowercase();
        self.dispatch(move |inner| async move {
            let stored = inner.backend.set_rank_ladder_internal(&key, ladder).await?;
            if let Some(stored) = &stored {
                inner.rank_ladder_listeners.call(&key, stored);
            }
            inner.watcher.send(StoreEvent::RankLadder {
                name: key,
                ladder: stored.clone(),
            });
            Ok(stored)
        })
        .await
    }

    async fn has_rank_ladder(&self, name: &str) -> Result<bool> {
        let key = name.to_lowercase();
        self.dispatch(move |inner| async move {
            Ok(inner.backend.get_rank_ladder_internal(&key).await?.is_some())
        })
        .await
    }

    async fn get_all_rank_ladders(&self) -> Result<Vec<String>> {
        self.dispatch(|inner| async move { inner.backend.get_all_rank_ladders_internal().await })
            .await
    }

    async fn get_context_inheritance(
        &self,
        listener: Option<Listener<ContextInheritance>>,
    ) -> Result<ContextInheritance> {
        let inheritance = self
            .dispatch(|inner| async move {
                inner.backend.get_context_inheritance_internal().await
            })
            .await?
            .unwrap_or_default();
        self.inner
            .context_inheritance_listeners
            .add_listener((), listener);
        Ok(inheritance)
    }

    async fn set_context_inheritance(
        &self,
        inheritance: ContextInheritance,
    ) -> Result<ContextInheritance> {
        self.dispatch(move |inner| async move {
            let stored = inner
                .backend
                .set_context_inheritance_internal(inheritance)
                .await?;
            inner.context_inheritance_listeners.call(&(), &stored);
            inner
                .watcher
                .send(StoreEvent::ContextInheritance(stored.clone()));
            Ok(stored)
        })
        .await
    }

    async fn move_data(
        &self,
        old_type: &str,
        old_identifier: &str,
        new_type: &str,
        new_identifier: &str,
    ) -> Result<()> {
        let from = SubjectDataKey::new(old_type, old_identifier);
        let to = SubjectDataKey::new(new_type, new_identifier);

        let (old_registered, new_registered) = tokio::try_join!(
            self.is_registered(old_type, old_identifier),
            self.is_registered(new_type, new_identifier),
        )?;
        if !old_registered || new_registered {
            warn!(store = %self.name(), %from, %to, "move conflicts with existing data");
            return Err(StoreError::MoveConflict { from, to });
        }

        // Not locked: the source may have been removed since the check.
        let Some(data) = self.get_data(old_type, old_identifier, None).await? else {
            warn!(store = %self.name(), %from, %to, "move source vanished before copy");
            return Err(StoreError::MoveConflict { from, to });
        };
        self.set_data(new_type, new_identifier, Some(data)).await?;
        self.set_data(old_type, old_identifier, None).await?;

        debug!(store = %self.name(), %from, %to, "moved subject data");
        Ok(())
    }

    fn serialize(&self, node: &mut ConfigNode) -> Result<String> {
        node.set(self.inner.properties.config())
            .map_err(|err| StoreError::loading(node.key(), err))?;
        Ok(self.inner.properties.factory().name().to_string())
    }

    fn watch(&self, pattern: &str) -> WatchStream {
        self.inner.watcher.subscribe(pattern)
    }

    async fn close(&self) -> Result<()> {
        if self.inner.engine.read().is_none() {
            return Ok(());
        }
        self.dispatch(|inner| async move { inner.backend.close_internal().await })
            .await
    }
}
