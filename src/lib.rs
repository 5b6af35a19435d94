//! # perm-store
//!
//! Backend-agnostic data store layer for a permissions engine.
//!
//! The engine talks to a [`DataStore`]. Backends only implement the primitive
//! [`StoreBackend`] hooks; [`BackedStore`] adds everything they share:
//!
//! - **Async dispatch**: every hook runs on the engine's tokio runtime
//! - **Cache listeners**: per-key callbacks fired after successful writes
//! - **Move**: rename of subject data, refused when it would clobber data
//! - **Bulk operations**: blocking batches run off the async workers
//! - **Factories**: stores built from configuration, recreated from [`DataStore::serialize`]
//!
//! ## Backends
//!
//! - [`MemoryBackend`]: in-memory (testing, development, fallback)
//! - [`SqliteBackend`]: embedded SQLite database
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use perm_store::{ConfigNode, DataStore, ImmutableSubjectData, RuntimeEngine};
//!
//! #[tokio::main]
//! async fn main() -> perm_store::Result<()> {
//!     let store = perm_store::memory::factory().create_store("main", &ConfigNode::new("main"))?;
//!     store.initialize(Arc::new(RuntimeEngine::current())).await?;
//!
//!     store.set_data("user", "alice", Some(ImmutableSubjectData::new())).await?;
//!     store.move_data("user", "alice", "user", "bob").await?;
//!     assert!(store.get_data("user", "alice", None).await?.is_none());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Listeners
//!
//! ```rust,no_run
//! use perm_store::{listener, DataStore, ImmutableSubjectData};
//!
//! async fn track(store: &dyn DataStore) -> perm_store::Result<()> {
//!     // Not called for the value returned here, only for later writes.
//!     let current = store
//!         .get_data(
//!             "user",
//!             "alice",
//!             Some(listener(|data: &ImmutableSubjectData| {
//!                 println!("alice changed: {:?}", data);
//!             })),
//!         )
//!         .await?;
//!     println!("alice is {:?}", current);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust,no_run
//! use perm_store::{ConfigNode, FactoryRegistry};
//! use serde_json::json;
//!
//! fn load() -> perm_store::Result<()> {
//!     let registry = FactoryRegistry::with_builtin();
//!     let node = ConfigNode::from_value("main", json!({ "type": "sqlite", "path": "perms.db" }));
//!     let store = registry.load("main", &node)?;
//!
//!     // Written back with its `type`, ready for the next `load`.
//!     let saved = registry.save(store.as_ref())?;
//!     println!("{:?}", saved.value());
//!     Ok(())
//! }
//! ```

pub mod base;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod factory;
pub mod listener;
pub mod memory;
pub mod properties;
pub mod sqlite;
pub mod store;
pub mod watch;

// Re-export main types
pub use base::BackedStore;
pub use config::ConfigNode;
pub use data::{
    ContextInheritance, ContextSet, ContextValue, ImmutableSubjectData, RankLadder, Segment,
    SubjectDataKey,
};
pub use engine::{PermissionsEngine, RuntimeEngine};
pub use error::{Result, StoreError};
pub use factory::{DataStoreFactory, FactoryRegistry, StoreFactory};
pub use listener::{listener, CacheListenerHolder, Listener};
pub use memory::{MemoryBackend, MemoryConfig};
pub use properties::StoreProperties;
pub use sqlite::{SqliteBackend, SqliteConfig};
pub use store::{DataStore, DataStoreExt, Initialized, StoreBackend};
pub use watch::{EventKind, StoreEvent, WatchStream};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::base::BackedStore;
    pub use crate::config::ConfigNode;
    pub use crate::data::{ContextInheritance, ImmutableSubjectData, RankLadder, SubjectDataKey};
    pub use crate::engine::{PermissionsEngine, RuntimeEngine};
    pub use crate::error::{Result, StoreError};
    pub use crate::factory::{DataStoreFactory, FactoryRegistry};
    pub use crate::store::{DataStore, DataStoreExt, StoreBackend};
}
