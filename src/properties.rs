//! Identity and configuration of a store instance.

use std::fmt;
use std::sync::Arc;

use crate::factory::DataStoreFactory;

/// Immutable binding of a store's identifier, typed config and originating factory.
///
/// Created once when the factory builds the store; owned by that store.
pub struct StoreProperties<C> {
    identifier: String,
    config: C,
    factory: Arc<dyn DataStoreFactory>,
}

impl<C> StoreProperties<C> {
    /// Properties of a store created by `factory`.
    pub fn new(identifier: impl Into<String>, config: C, factory: Arc<dyn DataStoreFactory>) -> Self {
        Self {
            identifier: identifier.into(),
            config,
            factory,
        }
    }

    /// Name the store was configured under.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Deserialized backend configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Factory that created the store.
    pub fn factory(&self) -> &Arc<dyn DataStoreFactory> {
        &self.factory
    }
}

impl<C: fmt::Debug> fmt::Debug for StoreProperties<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreProperties")
            .field("identifier", &self.identifier)
            .field("config", &self.config)
            .field("factory", &self.factory.name())
            .finish()
    }
}
