//! Session-scoped client state: a SQLite-backed key/value store plus the two
//! facades built on it, the annotated-order cache and the unsaved-edit
//! overlay. Both are injected where needed; there is no ambient singleton.

use crate::model::AnnotatedOrder;
use anyhow::Result;
use serde_json::{Map, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

pub type Pool = SqlitePool;

const ORDER_CACHE_SCOPE: &str = "orders_cache";
const ORDER_CACHE_KEY: &str = "annotated";
const EDIT_SCOPE: &str = "order_edits";

/// Overlay field for the device descriptor override.
pub const EDIT_DEVICE: &str = "device";
/// Overlay field for the device quantity override.
pub const EDIT_DEVICE_QUANTITY: &str = "deviceQuantity";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // One writer per session; a wider pool over an in-memory URL would also
    // hand out unrelated databases.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&normalized)
        .await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS session_kv (
            scope TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (scope, key)
        )",
    )
    .execute(&pool)
    .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

/// Scoped JSON key/value store over `session_kv`.
#[derive(Clone)]
pub struct SessionStore {
    pool: Pool,
}

impl SessionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, scope: &str, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT value FROM session_kv WHERE scope = ? AND key = ?")
                .bind(scope)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, scope: &str, key: &str, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        sqlx::query("INSERT OR REPLACE INTO session_kv (scope, key, value) VALUES (?, ?, ?)")
            .bind(scope)
            .bind(key)
            .bind(text)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, scope: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM session_kv WHERE scope = ? AND key = ?")
            .bind(scope)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear_scope(&self, scope: &str) -> Result<()> {
        sqlx::query("DELETE FROM session_kv WHERE scope = ?")
            .bind(scope)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Session cache of the reconciled order list. Cleared only on explicit
/// refresh; no TTL.
#[derive(Clone)]
pub struct OrderCache {
    store: SessionStore,
}

impl OrderCache {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Result<Option<Vec<AnnotatedOrder>>> {
        match self.store.get(ORDER_CACHE_SCOPE, ORDER_CACHE_KEY).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn store(&self, orders: &[AnnotatedOrder]) -> Result<()> {
        let value = serde_json::to_value(orders)?;
        self.store.set(ORDER_CACHE_SCOPE, ORDER_CACHE_KEY, &value).await
    }

    pub async fn invalidate(&self) -> Result<()> {
        self.store.remove(ORDER_CACHE_SCOPE, ORDER_CACHE_KEY).await
    }
}

/// Unsaved per-order field overrides, kept apart from server data. Overlay
/// values take priority over the order's originals at display and emission
/// time.
#[derive(Clone)]
pub struct EditOverlay {
    store: SessionStore,
}

impl EditOverlay {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    pub async fn set_edit(&self, order_id: &str, field: &str, value: Value) -> Result<()> {
        let mut edits = self.edits_for(order_id).await?;
        edits.insert(field.to_string(), value);
        self.store
            .set(EDIT_SCOPE, order_id, &Value::Object(edits))
            .await
    }

    /// Recorded overrides for an order; empty map when none.
    pub async fn edits_for(&self, order_id: &str) -> Result<Map<String, Value>> {
        match self.store.get(EDIT_SCOPE, order_id).await? {
            Some(Value::Object(map)) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    /// Drop overlay entries for the given orders. Called after a batch
    /// emission attempt, success and failure alike: a failed emission is not
    /// retried automatically, the user re-initiates.
    pub async fn clear(&self, order_ids: &[String]) -> Result<()> {
        for id in order_ids {
            self.store.remove(EDIT_SCOPE, id).await?;
        }
        Ok(())
    }
}
