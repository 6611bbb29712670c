//! Persisted client-side state.
//!
//! The client owns a small set of named snapshots (token, profile, side menu,
//! module access, branch selection, branch list). They live in a single
//! SQLite table so the switch-branch replace step can swap several of them in
//! one transaction — snapshots are always replaced wholesale, never merged.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

/// Names of the snapshots this core owns in the persisted store.
///
/// All of them are cleared together on logout; no key is cleared on its own
/// except during the switch-branch replace step.
pub mod keys {
    pub const AUTH_TOKEN: &str = "auth_token";
    pub const USER_PROFILE: &str = "user_profile";
    pub const SIDE_MENU: &str = "side_menu";
    pub const MODULE_ACCESS: &str = "module_access";
    pub const SELECTED_LOCATION: &str = "selected_location_id";
    pub const BRANCH_LIST: &str = "branch_list";

    pub const ALL: &[&str] = &[
        AUTH_TOKEN,
        USER_PROFILE,
        SIDE_MENU,
        MODULE_ACCESS,
        SELECTED_LOCATION,
        BRANCH_LIST,
    ];
}

/// Abstract persisted key/value state.
///
/// `put_many` is the atomicity seam: all entries land together or none do.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn put_many(&self, entries: &[(&str, &str)]) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
    async fn clear(&self, keys: &[&str]) -> anyhow::Result<()>;
}

/// SQLite-backed state store.
///
/// Cheap to clone and safe to share across tasks. The pool is initialized
/// lazily on first use.
#[derive(Debug, Clone)]
pub struct SqliteStateStore {
    pool: Arc<Mutex<Option<SqlitePool>>>,
    db_path: PathBuf,
}

impl SqliteStateStore {
    /// Store at the default path: `{app_data_dir}/medidesk/state.db`.
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self::with_path(state_db_path()?))
    }

    /// Store at an explicit path (tests, embedded hosts).
    pub fn with_path(db_path: PathBuf) -> Self {
        Self {
            pool: Arc::new(Mutex::new(None)),
            db_path,
        }
    }

    /// Initialize the database connection (called lazily on first use).
    async fn ensure_initialized(&self) -> anyhow::Result<()> {
        let mut pool_guard = self.pool.lock().await;
        if pool_guard.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create state directory at {:?}", parent))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open state store at {:?}", self.db_path))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS client_state (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create client_state table")?;

        *pool_guard = Some(pool);
        Ok(())
    }

    /// Get the pool, initializing if necessary.
    async fn get_pool(&self) -> anyhow::Result<SqlitePool> {
        self.ensure_initialized().await?;
        let pool_guard = self.pool.lock().await;
        Ok(pool_guard.as_ref().unwrap().clone())
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let pool = self.get_pool().await?;
        let row = sqlx::query("SELECT value FROM client_state WHERE key = ?1")
            .bind(key)
            .fetch_optional(&pool)
            .await
            .context("failed to read client state")?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.put_many(&[(key, value)]).await
    }

    async fn put_many(&self, entries: &[(&str, &str)]) -> anyhow::Result<()> {
        let pool = self.get_pool().await?;
        let now = Utc::now().to_rfc3339();

        let mut tx = pool.begin().await.context("failed to begin state write")?;
        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO client_state (key, value, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to upsert client state key '{}'", key))?;
        }
        tx.commit().await.context("failed to commit state write")?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let pool = self.get_pool().await?;
        sqlx::query("DELETE FROM client_state WHERE key = ?1")
            .bind(key)
            .execute(&pool)
            .await
            .context("failed to remove client state")?;
        Ok(())
    }

    async fn clear(&self, keys: &[&str]) -> anyhow::Result<()> {
        let pool = self.get_pool().await?;
        let mut tx = pool.begin().await.context("failed to begin state clear")?;
        for key in keys {
            sqlx::query("DELETE FROM client_state WHERE key = ?1")
                .bind(key)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("failed to clear client state key '{}'", key))?;
        }
        tx.commit().await.context("failed to commit state clear")?;
        Ok(())
    }
}

/// In-memory state store for tests and embedded hosts.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn put_many(&self, entries: &[(&str, &str)]) -> anyhow::Result<()> {
        let mut map = self.entries.lock().await;
        for (key, value) in entries {
            map.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn clear(&self, keys: &[&str]) -> anyhow::Result<()> {
        let mut map = self.entries.lock().await;
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

/// Resolve the path to the SQLite state database:
/// `{app_data_dir}/medidesk/state.db`.
fn state_db_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory")?;

    let mut dir = base;
    dir.push("medidesk");
    dir.push("state.db");

    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> SqliteStateStore {
        let path = std::env::temp_dir().join(format!(
            "medidesk-state-test-{}.db",
            uuid::Uuid::now_v7()
        ));
        SqliteStateStore::with_path(path)
    }

    #[tokio::test]
    async fn sqlite_round_trips_values() {
        let store = temp_store();
        assert_eq!(store.get(keys::AUTH_TOKEN).await.unwrap(), None);

        store.put(keys::AUTH_TOKEN, "tok-1").await.unwrap();
        assert_eq!(
            store.get(keys::AUTH_TOKEN).await.unwrap(),
            Some("tok-1".to_string())
        );

        store.put(keys::AUTH_TOKEN, "tok-2").await.unwrap();
        assert_eq!(
            store.get(keys::AUTH_TOKEN).await.unwrap(),
            Some("tok-2".to_string())
        );

        store.remove(keys::AUTH_TOKEN).await.unwrap();
        assert_eq!(store.get(keys::AUTH_TOKEN).await.unwrap(), None);
    }

    #[tokio::test]
    async fn sqlite_put_many_replaces_together() {
        let store = temp_store();
        store
            .put_many(&[
                (keys::USER_PROFILE, "{\"a\":1}"),
                (keys::SIDE_MENU, "[]"),
                (keys::MODULE_ACCESS, "{}"),
            ])
            .await
            .unwrap();

        assert!(store.get(keys::USER_PROFILE).await.unwrap().is_some());
        assert!(store.get(keys::SIDE_MENU).await.unwrap().is_some());
        assert!(store.get(keys::MODULE_ACCESS).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_removes_only_named_keys() {
        let store = MemoryStateStore::new();
        store.put(keys::AUTH_TOKEN, "tok").await.unwrap();
        store.put(keys::SELECTED_LOCATION, "3").await.unwrap();
        store.put("unrelated", "kept").await.unwrap();

        store.clear(keys::ALL).await.unwrap();

        assert_eq!(store.get(keys::AUTH_TOKEN).await.unwrap(), None);
        assert_eq!(store.get(keys::SELECTED_LOCATION).await.unwrap(), None);
        assert_eq!(
            store.get("unrelated").await.unwrap(),
            Some("kept".to_string())
        );
    }
}
