//! Local persistence for the chat client
//!
//! A single SQLite file holds two tables: `kv`, a JSON key-value store for
//! settings and conversations, and `images`, binary image payloads keyed by
//! a generated id. Each operation opens its own connection, so a
//! `SqliteStorage` can be shared freely between tasks.

use crate::error::{OpenChatError, Result};
use anyhow::Context;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

mod conversations;
pub mod keys;
mod settings;
pub mod types;

pub use conversations::{derive_title, merge_pending};
pub use types::{
    Conversation, ConversationSummary, ImageRef, StoredImage, StoredMessage, Theme,
    NEW_CHAT_TITLE, THINKING_PLACEHOLDER,
};

/// Generate a unique id of the form `<prefix>_<ulid>`
///
/// # Examples
///
/// ```
/// use openchat::storage::generate_scoped_id;
///
/// let id = generate_scoped_id("img");
/// assert!(id.starts_with("img_"));
/// assert_ne!(id, generate_scoped_id("img"));
/// ```
pub fn generate_scoped_id(prefix: &str) -> String {
    format!("{}_{}", prefix, ulid::Ulid::new().to_string().to_lowercase())
}

/// Storage backend for settings, conversations and images
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    db_path: PathBuf,
}

impl SqliteStorage {
    /// Create a new storage instance
    ///
    /// Uses `OPENCHAT_DATA_DB` when set, otherwise `openchat.db` in the
    /// user's data directory.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("OPENCHAT_DATA_DB") {
            if !override_path.is_empty() {
                return Self::new_with_path(override_path);
            }
        }

        let proj_dirs = ProjectDirs::from("com", "openchat", "openchat")
            .ok_or_else(|| OpenChatError::Storage("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("Failed to create data directory")
            .map_err(|e| OpenChatError::Storage(e.to_string()))?;

        let storage = Self {
            db_path: data_dir.join("openchat.db"),
        };
        storage.init()?;
        Ok(storage)
    }

    /// Create a storage instance at a specific database path
    ///
    /// # Examples
    ///
    /// ```
    /// use openchat::storage::SqliteStorage;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let storage = SqliteStorage::new_with_path(dir.path().join("chat.db")).unwrap();
    /// assert!(storage.db_path().exists());
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| OpenChatError::Storage(e.to_string()))?;
        }

        let storage = Self { db_path };
        storage.init()?;
        Ok(storage)
    }

    /// Open the configured database: an explicit path wins over the default location
    pub fn open(path: Option<&str>) -> Result<Self> {
        match path.filter(|p| !p.is_empty()) {
            Some(path) => Self::new_with_path(path),
            None => Self::new(),
        }
    }

    /// Path of the database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(|e| OpenChatError::Storage(e.to_string()))?;
        Ok(conn)
    }

    fn init(&self) -> Result<()> {
        let conn = self.connect()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value JSON NOT NULL
            );
            CREATE TABLE IF NOT EXISTS images (
                id TEXT PRIMARY KEY,
                mime TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data BLOB NOT NULL
            );",
        )
        .context("Failed to create tables")
        .map_err(|e| OpenChatError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Read and deserialize a value
    ///
    /// A value that no longer deserializes as `T` is logged and treated as
    /// absent, so callers fall back to their default.
    pub fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let conn = self.connect()?;
        read_value(&conn, key)
    }

    /// Serialize and write a value
    pub fn set_value<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let conn = self.connect()?;
        write_value(&conn, key, value)
    }

    /// Remove a value; missing keys are ignored
    pub fn remove_value(&self, key: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM kv WHERE key = ?", params![key])
            .context("Failed to remove value")
            .map_err(|e| OpenChatError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Read-modify-write a value inside one immediate transaction
    ///
    /// The closure receives the stored value (or `T::default()`); the value is
    /// written back only when the closure succeeds.
    pub fn update_value<T, R, F>(&self, key: &str, f: F) -> Result<R>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> Result<R>,
    {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to start transaction")
            .map_err(|e| OpenChatError::Storage(e.to_string()))?;

        let mut value: T = read_value(&tx, key)?.unwrap_or_default();
        let result = f(&mut value)?;
        write_value(&tx, key, &value)?;

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| OpenChatError::Storage(e.to_string()))?;
        Ok(result)
    }

    /// Store an image and return its generated id
    pub fn store_image(&self, data: &[u8], mime: &str) -> Result<String> {
        let conn = self.connect()?;
        let id = generate_scoped_id("img");
        conn.execute(
            "INSERT INTO images (id, mime, created_at, data) VALUES (?, ?, ?, ?)",
            params![id, mime, Utc::now().to_rfc3339(), data],
        )
        .context("Failed to store image")
        .map_err(|e| OpenChatError::Storage(e.to_string()))?;

        tracing::debug!("Stored image {} ({} bytes, {})", id, data.len(), mime);
        Ok(id)
    }

    /// Load an image by id
    pub fn get_image(&self, id: &str) -> Result<Option<StoredImage>> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT id, mime, created_at, data FROM images WHERE id = ?",
                params![id],
                |row| {
                    let id: String = row.get(0)?;
                    let mime: String = row.get(1)?;
                    let created_at: String = row.get(2)?;
                    let data: Vec<u8> = row.get(3)?;
                    Ok((id, mime, created_at, data))
                },
            )
            .optional()
            .context("Failed to query image")
            .map_err(|e| OpenChatError::Storage(e.to_string()))?;

        Ok(row.map(|(id, mime, created_at, data)| StoredImage {
            id,
            mime,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            data,
        }))
    }

    /// Delete images by id and return how many were removed
    pub fn delete_images(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connect()?;
        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| OpenChatError::Storage(e.to_string()))?;

        let mut removed = 0;
        for id in ids {
            removed += tx
                .execute("DELETE FROM images WHERE id = ?", params![id])
                .context("Failed to delete image")
                .map_err(|e| OpenChatError::Storage(e.to_string()))?;
        }

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| OpenChatError::Storage(e.to_string()))?;
        Ok(removed)
    }

    /// Number of stored images
    pub fn image_count(&self) -> Result<usize> {
        let conn = self.connect()?;
        let count: i64 = conn
            .query_row("SELECT count(*) FROM images", [], |r| r.get(0))
            .context("Failed to count images")
            .map_err(|e| OpenChatError::Storage(e.to_string()))?;
        Ok(count as usize)
    }
}

fn read_value<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Option<T>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
            row.get(0)
        })
        .optional()
        .context("Failed to read value")
        .map_err(|e| OpenChatError::Storage(e.to_string()))?;

    let Some(raw) = raw else {
        return Ok(None);
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!("Ignoring unreadable value for key \"{}\": {}", key, e);
            Ok(None)
        }
    }
}

fn write_value<T: Serialize + ?Sized>(conn: &Connection, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)
        .context("Failed to serialize value")
        .map_err(|e| OpenChatError::Storage(e.to_string()))?;

    conn.execute(
        "INSERT INTO kv (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, json],
    )
    .context("Failed to write value")
    .map_err(|e| OpenChatError::Storage(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::BTreeMap;
    use std::env;
    use tempfile::tempdir;

    /// Helper: create a temporary storage instance backed by a temp directory.
    ///
    /// Returns both the `SqliteStorage` and the `TempDir` so the caller keeps
    /// ownership of the directory (preventing it from being removed).
    pub(crate) fn create_test_storage() -> (SqliteStorage, tempfile::TempDir) {
        let dir = tempdir().expect("failed to create tempdir");
        let db_path = dir.path().join("openchat.db");
        let storage = SqliteStorage::new_with_path(db_path).expect("failed to create storage");
        (storage, dir)
    }

    #[test]
    fn test_init_creates_tables() {
        let (storage, _dir) = create_test_storage();
        let conn = Connection::open(storage.db_path()).expect("open connection");
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('kv', 'images')",
                [],
                |r| r.get(0),
            )
            .expect("query row");
        assert_eq!(count, 2);
    }

    #[test]
    fn test_set_and_get_value() {
        let (storage, _dir) = create_test_storage();
        storage.set_value("sidebarCollapsed", &true).unwrap();
        assert_eq!(storage.get_value::<bool>("sidebarCollapsed").unwrap(), Some(true));
        storage.set_value("sidebarCollapsed", &false).unwrap();
        assert_eq!(storage.get_value::<bool>("sidebarCollapsed").unwrap(), Some(false));
    }

    #[test]
    fn test_get_missing_value_is_none() {
        let (storage, _dir) = create_test_storage();
        assert_eq!(storage.get_value::<String>("nope").unwrap(), None);
    }

    #[test]
    fn test_unreadable_value_is_treated_as_missing() {
        let (storage, _dir) = create_test_storage();
        storage.set_value("selectedModel", &42).unwrap();
        assert_eq!(storage.get_value::<String>("selectedModel").unwrap(), None);
    }

    #[test]
    fn test_remove_value() {
        let (storage, _dir) = create_test_storage();
        storage.set_value("k", "v").unwrap();
        storage.remove_value("k").unwrap();
        storage.remove_value("k").unwrap();
        assert_eq!(storage.get_value::<String>("k").unwrap(), None);
    }

    #[test]
    fn test_update_value_writes_only_on_success() {
        let (storage, _dir) = create_test_storage();
        storage
            .update_value("map", |map: &mut BTreeMap<String, u32>| {
                map.insert("a".into(), 1);
                Ok(())
            })
            .unwrap();

        let failed: Result<()> = storage.update_value("map", |map: &mut BTreeMap<String, u32>| {
            map.insert("b".into(), 2);
            Err(OpenChatError::NotFound("b".into()).into())
        });
        assert!(failed.is_err());

        let map: BTreeMap<String, u32> = storage.get_value("map").unwrap().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["a"], 1);
    }

    #[test]
    fn test_image_round_trip_and_delete() {
        let (storage, _dir) = create_test_storage();
        let id = storage.store_image(&[1, 2, 3], "image/png").unwrap();
        assert!(id.starts_with("img_"));

        let image = storage.get_image(&id).unwrap().unwrap();
        assert_eq!(image.mime, "image/png");
        assert_eq!(image.data, vec![1, 2, 3]);
        assert_eq!(storage.image_count().unwrap(), 1);

        let removed = storage
            .delete_images(&[id.clone(), "img_missing".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert!(storage.get_image(&id).unwrap().is_none());
    }

    #[test]
    fn test_scoped_ids_are_unique() {
        let ids: std::collections::HashSet<String> =
            (0..100).map(|_| generate_scoped_id("test")).collect();
        assert_eq!(ids.len(), 100);
        assert!(generate_scoped_id("conv").starts_with("conv_"));
    }

    #[test]
    #[serial]
    fn test_env_override_path() {
        let dir = tempdir().expect("tempdir");
        let db_path = dir.path().join("override.db");
        env::set_var("OPENCHAT_DATA_DB", &db_path);
        let storage = SqliteStorage::new().expect("storage");
        env::remove_var("OPENCHAT_DATA_DB");
        assert_eq!(storage.db_path(), db_path.as_path());
        assert!(db_path.exists());
    }

    #[test]
    #[serial]
    fn test_open_prefers_explicit_path() {
        let dir = tempdir().expect("tempdir");
        let db_path = dir.path().join("explicit.db");
        let storage = SqliteStorage::open(db_path.to_str()).expect("storage");
        assert_eq!(storage.db_path(), db_path.as_path());
    }
}
