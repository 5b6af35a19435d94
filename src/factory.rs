//! Construction of stores from configuration.
//!
//! A [`StoreFactory`] binds a backend type to a name and a constructor. The
//! [`FactoryRegistry`] maps names to factories so that the engine can
//! recreate a store from the `type` recorded next to its configuration.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::base::BackedStore;
use crate::config::ConfigNode;
use crate::error::{Result, StoreError};
use crate::properties::StoreProperties;
use crate::store::{DataStore, StoreBackend};

/// Config field naming the factory a store was created by.
pub const TYPE_KEY: &str = "type";

/// Creates data stores of one backend type.
pub trait DataStoreFactory: Send + Sync {
    /// Registered name, written by [`DataStore::serialize`].
    fn name(&self) -> &str;

    /// Human readable name.
    fn friendly_name(&self) -> &str;

    /// Build a store named `identifier` from its configuration.
    ///
    /// Configuration that does not deserialize is a loading error naming
    /// `identifier`; it is never replaced by defaults.
    fn create(self: Arc<Self>, identifier: &str, config: &ConfigNode) -> Result<Arc<dyn DataStore>>;
}

type Constructor<B> =
    Box<dyn Fn(&StoreProperties<<B as StoreBackend>::Config>) -> Result<B> + Send + Sync>;

/// Factory for stores backed by `B`.
pub struct StoreFactory<B: StoreBackend> {
    name: String,
    friendly_name: String,
    constructor: Constructor<B>,
}

impl<B: StoreBackend> StoreFactory<B> {
    /// Factory named `name`; the friendly name defaults to it.
    pub fn new<F>(name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&StoreProperties<B::Config>) -> Result<B> + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            friendly_name: name.clone(),
            name,
            constructor: Box::new(constructor),
        }
    }

    /// Set the human readable name.
    pub fn with_friendly_name(mut self, friendly_name: impl Into<String>) -> Self {
        self.friendly_name = friendly_name.into();
        self
    }

    /// Typed form of [`DataStoreFactory::create`].
    pub fn create_store(self: &Arc<Self>, identifier: &str, config: &ConfigNode) -> Result<BackedStore<B>> {
        let store_config: B::Config = config
            .get()
            .map_err(|err| StoreError::loading(identifier, err))?;
        let properties = StoreProperties::new(
            identifier,
            store_config,
            self.clone() as Arc<dyn DataStoreFactory>,
        );
        let backend = (self.constructor)(&properties).map_err(|err| match err {
            err @ StoreError::Loading { .. } => err,
            other => StoreError::loading(identifier, other),
        })?;

        debug!(store = %identifier, factory = %self.name, "created data store");
        Ok(BackedStore::new(properties, backend))
    }
}

impl<B: StoreBackend> DataStoreFactory for StoreFactory<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    fn create(self: Arc<Self>, identifier: &str, config: &ConfigNode) -> Result<Arc<dyn DataStore>> {
        let store = self.create_store(identifier, config)?;
        Ok(Arc::new(store))
    }
}

impl<B: StoreBackend> fmt::Debug for StoreFactory<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreFactory")
            .field("name", &self.name)
            .field("friendly_name", &self.friendly_name)
            .finish_non_exhaustive()
    }
}

/// Factories by registered name.
#[derive(Default, Clone)]
pub struct FactoryRegistry {
    factories: HashMap<String, Arc<dyn DataStoreFactory>>,
}

impl FactoryRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled `memory` and `sqlite` backends.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(crate::memory::factory());
        registry.register(crate::sqlite::factory());
        registry
    }

    /// Register a factory, replacing any factory of the same name.
    pub fn register(&mut self, factory: Arc<dyn DataStoreFactory>) -> Option<Arc<dyn DataStoreFactory>> {
        self.factories.insert(factory.name().to_string(), factory)
    }

    /// Factory registered as `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn DataStoreFactory>> {
        self.factories.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Create a store with the factory registered as `factory_name`.
    pub fn create(
        &self,
        factory_name: &str,
        identifier: &str,
        config: &ConfigNode,
    ) -> Result<Arc<dyn DataStore>> {
        let factory = self
            .get(factory_name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownFactory(factory_name.to_string()))?;
        factory.create(identifier, config)
    }

    /// Create a store from a node carrying its factory under `type`.
    pub fn load(&self, identifier: &str, config: &ConfigNode) -> Result<Arc<dyn DataStore>> {
        let factory_name = config.string(TYPE_KEY).ok_or_else(|| {
            StoreError::loading(identifier, format!("missing `{TYPE_KEY}` in {}", config.key()))
        })?;
        self.create(factory_name, identifier, config)
    }

    /// Serialize `store` into a node that [`FactoryRegistry::load`] accepts.
    pub fn save(&self, store: &dyn DataStore) -> Result<ConfigNode> {
        let mut node = ConfigNode::new(store.name());
        let factory_name = store.serialize(&mut node)?;
        node.set_child(TYPE_KEY, serde_json::Value::String(factory_name));
        Ok(node)
    }
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("factories", &self.names())
            .finish()
    }
}
