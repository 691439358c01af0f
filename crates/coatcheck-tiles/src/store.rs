//! Persistent tile store.
//!
//! `TileStore` is the durable tier of the tile cache: one record per URL with
//! a secondary ordering by write time. `SqliteTileStore` backs it with a
//! single SQLite table indexed on `timestamp`.

use chrono::DateTime;
use coatcheck_core::error::RusqliteErrorExt;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::error::{TileError, TileResult};
use crate::types::{CachedTile, TileEntry};

/// Durable, keyed tile storage.
///
/// Every call is its own transaction. Callers on the fetch path treat any
/// error as a cache miss.
pub trait TileStore: Send + Sync {
    /// Get a tile by URL.
    ///
    /// Returns `None` if the tile isn't stored.
    fn get(&self, url: &str) -> TileResult<Option<CachedTile>>;

    /// Insert or overwrite the tile stored under `tile.url`.
    fn put(&self, tile: &CachedTile) -> TileResult<()>;

    /// Remove a tile. Deleting a missing URL is not an error.
    fn delete(&self, url: &str) -> TileResult<()>;

    /// All stored tiles, oldest first.
    ///
    /// Ties on `timestamp` keep a stable order within one listing.
    fn list_oldest_first(&self) -> TileResult<Vec<TileEntry>>;

    /// Remove every stored tile.
    fn clear(&self) -> TileResult<()>;

    /// Sum of `size` over all stored tiles.
    fn total_size(&self) -> TileResult<u64> {
        Ok(self.list_oldest_first()?.iter().map(|t| t.size).sum())
    }
}

/// SQLite-backed tile store.
pub struct SqliteTileStore {
    conn: Mutex<Connection>,
}

impl SqliteTileStore {
    /// Open (or create) the store at `path` for cache `version`.
    ///
    /// Tiles written under a different version are dropped on open.
    pub fn open<P: AsRef<Path>>(path: P, version: &str) -> TileResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TileError::unavailable(format!("{}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            tracing::debug!("Failed to open tile store at {}", path.display());
            e.into_database_error()
        })?;
        Self::from_connection(conn, version)
    }

    /// Create an in-memory store, useful for tests and throwaway sessions.
    pub fn in_memory(version: &str) -> TileResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| e.into_database_error())?;
        Self::from_connection(conn, version)
    }

    fn from_connection(conn: Connection, version: &str) -> TileResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        store.check_version(version)?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> TileResult<()> {
        self.conn
            .lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS tiles (
                    url TEXT PRIMARY KEY,
                    bytes BLOB NOT NULL,
                    timestamp INTEGER NOT NULL,
                    size INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS store_meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_tiles_timestamp ON tiles(timestamp);
                "#,
            )
            .map_err(|e| TileError::from(e.into_database_error()))
    }

    /// Drop all tiles if they were written under another cache version.
    fn check_version(&self, version: &str) -> TileResult<()> {
        let conn = self.conn.lock();
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| e.into_database_error())?;

        if stored.as_deref() == Some(version) {
            return Ok(());
        }

        if let Some(old) = stored {
            tracing::info!("Tile cache version changed {} -> {}, dropping stored tiles", old, version);
            conn.execute("DELETE FROM tiles", [])
                .map_err(|e| e.into_database_error())?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO store_meta (key, value) VALUES ('version', ?1)",
            params![version],
        )
        .map_err(|e| e.into_database_error())?;
        Ok(())
    }

    /// Number of stored tiles.
    pub fn count(&self) -> TileResult<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))
            .map_err(|e| TileError::read(e.to_string()))?;
        Ok(count as usize)
    }

    fn row_to_tile(row: &rusqlite::Row) -> rusqlite::Result<CachedTile> {
        let timestamp_ms: i64 = row.get(2)?;
        let size: i64 = row.get(3)?;
        Ok(CachedTile {
            url: row.get(0)?,
            bytes: row.get(1)?,
            timestamp: DateTime::from_timestamp_millis(timestamp_ms).unwrap_or_default(),
            size: size as u64,
        })
    }
}

impl TileStore for SqliteTileStore {
    fn get(&self, url: &str) -> TileResult<Option<CachedTile>> {
        self.conn
            .lock()
            .query_row(
                "SELECT url, bytes, timestamp, size FROM tiles WHERE url = ?1",
                params![url],
                Self::row_to_tile,
            )
            .optional()
            .map_err(|e| TileError::read(e.to_string()))
    }

    fn put(&self, tile: &CachedTile) -> TileResult<()> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO tiles (url, bytes, timestamp, size) VALUES (?1, ?2, ?3, ?4)",
                params![
                    tile.url,
                    tile.bytes,
                    tile.timestamp.timestamp_millis(),
                    tile.size as i64,
                ],
            )
            .map_err(|e| TileError::write(e.to_string()))?;
        Ok(())
    }

    fn delete(&self, url: &str) -> TileResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM tiles WHERE url = ?1", params![url])
            .map_err(|e| TileError::write(e.to_string()))?;
        Ok(())
    }

    fn list_oldest_first(&self) -> TileResult<Vec<TileEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT url, timestamp, size FROM tiles ORDER BY timestamp ASC, rowid ASC")
            .map_err(|e| TileError::read(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                let timestamp_ms: i64 = row.get(1)?;
                let size: i64 = row.get(2)?;
                Ok(TileEntry {
                    url: row.get(0)?,
                    timestamp: DateTime::from_timestamp_millis(timestamp_ms).unwrap_or_default(),
                    size: size as u64,
                })
            })
            .map_err(|e| TileError::read(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| TileError::read(format!("Failed to read tiles: {}", e)))
    }

    fn clear(&self) -> TileResult<()> {
        self.conn
            .lock()
            .execute("DELETE FROM tiles", [])
            .map_err(|e| TileError::write(e.to_string()))?;
        Ok(())
    }

    fn total_size(&self) -> TileResult<u64> {
        let total: i64 = self
            .conn
            .lock()
            .query_row("SELECT COALESCE(SUM(size), 0) FROM tiles", [], |row| row.get(0))
            .map_err(|e| TileError::read(e.to_string()))?;
        Ok(total as u64)
    }
}
