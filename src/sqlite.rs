//! SQLite backend.
//!
//! Features:
//! - WAL mode for concurrent readers
//! - Values stored as JSON text, one row per subject / ladder
//! - Schema created on first initialize, which also triggers default data

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::data::{ContextInheritance, ImmutableSubjectData, RankLadder};
use crate::error::Result;
use crate::factory::StoreFactory;
use crate::store::{BulkOperation, BulkValue, DataStore, Initialized, StoreBackend};

/// Name the SQLite factory is registered under.
pub const FACTORY_NAME: &str = "sqlite";

/// Path selecting a private in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Configuration of the SQLite backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SqliteConfig {
    /// Database file, or `:memory:`.
    pub path: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: "permissions.db".to_string(),
            max_connections: 5,
            busy_timeout_secs: 30,
        }
    }
}

/// Factory for SQLite stores.
pub fn factory() -> Arc<StoreFactory<SqliteBackend>> {
    Arc::new(
        StoreFactory::<SqliteBackend>::new(FACTORY_NAME, |properties| {
            SqliteBackend::open(properties.config())
        })
        .with_friendly_name("SQLite"),
    )
}

/// Backend persisting into an SQLite database.
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Prepare a lazily connecting pool; nothing touches the disk until
    /// the store is initialized.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let in_memory = config.path == IN_MEMORY_PATH;
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}", config.path)
        };
        debug!("Preparing SQLite store at {}", config.path);

        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

        // An in-memory database lives in its single connection.
        let max_connections = if in_memory { 1 } else { config.max_connections.max(1) };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_lazy_with(options);

        Ok(Self { pool })
    }

    async fn schema_exists(&self) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'subjects'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subjects (
                subject_type TEXT NOT NULL,
                identifier TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (subject_type, identifier)
            );

            CREATE TABLE IF NOT EXISTS rank_ladders (
                name TEXT PRIMARY KEY NOT NULL,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS context_inheritance (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("SQLite schema initialized");
        Ok(())
    }

    fn now_unix() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl StoreBackend for SqliteBackend {
    type Config = SqliteConfig;

    async fn initialize_internal(&self) -> Result<Initialized> {
        let existed = self.schema_exists().await?;
        self.init_schema().await?;
        if existed {
            Ok(Initialized::Existing)
        } else {
            info!("Created new SQLite permissions database");
            Ok(Initialized::Created)
        }
    }

    async fn get_data_internal(
        &self,
        subject_type: &str,
        identifier: &str,
    ) -> Result<Option<ImmutableSubjectData>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT data FROM subjects WHERE subject_type = ? AND identifier = ?")
                .bind(subject_type)
                .bind(identifier)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_data_internal(
        &self,
        subject_type: &str,
        identifier: &str,
        data: Option<ImmutableSubjectData>,
    ) -> Result<Option<ImmutableSubjectData>> {
        let Some(data) = data else {
            sqlx::query("DELETE FROM subjects WHERE subject_type = ? AND identifier = ?")
                .bind(subject_type)
                .bind(identifier)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        };

        let json = serde_json::to_string(&data)?;
        sqlx::query(
            r#"
            INSERT INTO subjects (subject_type, identifier, data, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(subject_type, identifier) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(subject_type)
        .bind(identifier)
        .bind(json)
        .bind(Self::now_unix())
        .execute(&self.pool)
        .await?;

        Ok(Some(data))
    }

    async fn is_registered_internal(&self, subject_type: &str, identifier: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM subjects WHERE subject_type = ? AND identifier = ?")
                .bind(subject_type)
                .bind(identifier)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn get_all_identifiers_internal(&self, subject_type: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT identifier FROM subjects WHERE subject_type = ? ORDER BY identifier",
        )
        .bind(subject_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn get_registered_types_internal(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT subject_type FROM subjects ORDER BY subject_type")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    async fn get_rank_ladder_internal(&self, name: &str) -> Result<Option<RankLadder>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM rank_ladders WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_rank_ladder_internal(
        &self,
        name: &str,
        ladder: Option<RankLadder>,
    ) -> Result<Option<RankLadder>> {
        let Some(ladder) = ladder else {
            sqlx::query("DELETE FROM rank_ladders WHERE name = ?")
                .bind(name)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        };

        let json = serde_json::to_string(&ladder)?;
        sqlx::query(
            r#"
            INSERT INTO rank_ladders (name, data, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(json)
        .bind(Self::now_unix())
        .execute(&self.pool)
        .await?;

        Ok(Some(ladder))
    }

    async fn get_all_rank_ladders_internal(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM rank_ladders ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn get_context_inheritance_internal(&self) -> Result<Option<ContextInheritance>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT data FROM context_inheritance WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_context_inheritance_internal(
        &self,
        inheritance: ContextInheritance,
    ) -> Result<ContextInheritance> {
        let json = serde_json::to_string(&inheritance)?;
        sqlx::query(
            r#"
            INSERT INTO context_inheritance (id, data, updated_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(json)
        .bind(Self::now_unix())
        .execute(&self.pool)
        .await?;

        Ok(inheritance)
    }

    fn perform_bulk_operation_sync(
        &self,
        store: &dyn DataStore,
        operation: BulkOperation,
    ) -> Result<BulkValue> {
        // Each statement commits on its own, so changes are durable once
        // the operation returns.
        operation(store)
    }

    async fn close_internal(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigNode;
    use crate::data::{ContextSet, ContextValue, SubjectDataKey, SUBJECTS_DEFAULTS};
    use crate::engine::RuntimeEngine;
    use serde_json::json;

    fn in_memory() -> SqliteBackend {
        SqliteBackend::open(&SqliteConfig {
            path: IN_MEMORY_PATH.to_string(),
            ..SqliteConfig::default()
        })
        .unwrap()
    }

    fn data(permission: &str) -> ImmutableSubjectData {
        ImmutableSubjectData::new().with_permission(ContextSet::new(), permission, 1)
    }

    #[tokio::test]
    async fn test_sqlite_initialize_creates_schema_once() {
        let backend = in_memory();
        assert_eq!(backend.initialize_internal().await.unwrap(), Initialized::Created);
        assert_eq!(backend.initialize_internal().await.unwrap(), Initialized::Existing);
    }

    #[tokio::test]
    async fn test_sqlite_set_get_remove() {
        let backend = in_memory();
        backend.initialize_internal().await.unwrap();

        backend
            .set_data_internal("user", "alice", Some(data("a")))
            .await
            .unwrap();
        backend
            .set_data_internal("user", "alice", Some(data("b")))
            .await
            .unwrap();
        assert_eq!(
            backend.get_data_internal("user", "alice").await.unwrap(),
            Some(data("b"))
        );
        assert!(backend.is_registered_internal("user", "alice").await.unwrap());

        backend.set_data_internal("user", "alice", None).await.unwrap();
        assert!(backend.get_data_internal("user", "alice").await.unwrap().is_none());
        assert!(!backend.is_registered_internal("user", "alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_enumeration() {
        let backend = in_memory();
        backend.initialize_internal().await.unwrap();
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
    async fn test_sqlite_rank_ladders_and_inheritance() {
        let backend = in_memory();
        backend.initialize_internal().await.unwrap();

        let ladder = RankLadder::new("staff").with_rank(SubjectDataKey::new("group", "mod"));
        backend
            .set_rank_ladder_internal("staff", Some(ladder.clone()))
            .await
            .unwrap();
        assert_eq!(backend.get_rank_ladder_internal("staff").await.unwrap(), Some(ladder));
        assert_eq!(
            backend.get_all_rank_ladders_internal().await.unwrap(),
            vec!["staff".to_string()]
        );

        let inheritance = ContextInheritance::new().with_parents(
            ContextValue::new("world", "nether"),
            vec![ContextValue::new("world", "overworld")],
        );
        backend
            .set_context_inheritance_internal(inheritance.clone())
            .await
            .unwrap();
        assert_eq!(
            backend.get_context_inheritance_internal().await.unwrap(),
            Some(inheritance)
        );
    }

    #[tokio::test]
    async fn test_sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perms.db");
        let node = ConfigNode::from_value("disk", json!({ "path": path.to_str().unwrap() }));

        let store = factory().create_store("disk", &node).unwrap();
        store
            .initialize(Arc::new(RuntimeEngine::current()))
            .await
            .unwrap();
        assert!(store.is_first_run());
        assert!(store
            .is_registered(SUBJECTS_DEFAULTS, SUBJECTS_DEFAULTS)
            .await
            .unwrap());
        store.set_data("user", "alice", Some(data("a"))).await.unwrap();
        store.move_data("user", "alice", "user", "bob").await.unwrap();
        store.close().await.unwrap();

        let reopened = factory().create_store("disk", &node).unwrap();
        reopened
            .initialize(Arc::new(RuntimeEngine::current()))
            .await
            .unwrap();
        assert!(!reopened.is_first_run());
        assert!(reopened.get_data("user", "alice", None).await.unwrap().is_none());
        assert_eq!(
            reopened.get_data("user", "bob", None).await.unwrap(),
            Some(data("a"))
        );
    }
}
