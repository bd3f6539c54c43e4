//! Database module for Courtside Sync
//!
//! Provides SQLite storage for the durable operation queue, the local entity
//! mirrors that strategies write confirmed remote state into, and engine
//! settings. Uses r2d2 connection pooling for thread-safe access.

use rusqlite::params;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

// Connection pooling
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Map a logical entity name to its mirror table.
///
/// Table names are interpolated into SQL, so only names from this fixed list
/// are ever accepted.
fn mirror_table(entity: &str) -> DbResult<&'static str> {
    match entity {
        "match" => Ok("matches"),
        "club" => Ok("clubs"),
        "club_member" => Ok("club_members"),
        "user" => Ok("users"),
        "challenge" => Ok("challenges"),
        "invitation" => Ok("invitations"),
        "invitation_participant" => Ok("invitation_participants"),
        other => Err(DbError::UnknownEntity(other.to_string())),
    }
}

/// Database manager for thread-safe SQLite access
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl Database {
    /// Create a new database connection pool backed by a file
    pub fn new(db_path: PathBuf) -> DbResult<Self> {
        let manager = SqliteConnectionManager::file(&db_path);

        let pool = Pool::builder()
            .max_size(10)
            .min_idle(Some(2))
            .connection_timeout(std::time::Duration::from_secs(10))
            .build(manager)?;

        let conn = pool.get()?;

        // Performance PRAGMAs
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;

        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Create an in-memory database pool (for testing)
    ///
    /// Uses a single connection so every caller sees the same in-memory
    /// database.
    pub fn in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory();

        let pool = Pool::builder().max_size(1).build(manager)?;

        let conn = pool.get()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;

        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a connection from the pool
    #[inline]
    pub fn get_conn(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    // =========================================================================
    // GENERIC HELPERS (used by the queue store and strategies)
    // =========================================================================

    /// Execute a SQL statement and return affected rows
    pub fn execute<P>(&self, sql: &str, params: P) -> DbResult<usize>
    where
        P: rusqlite::Params,
    {
        let conn = self.get_conn()?;

        let affected = conn.execute(sql, params)?;
        Ok(affected)
    }

    /// Query database and map results
    pub fn query<T, P, F>(&self, sql: &str, params: P, f: F) -> DbResult<Vec<T>>
    where
        P: rusqlite::Params,
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, f)?;

        rows.collect::<rusqlite::Result<Vec<T>>>()
            .map_err(DbError::from)
    }

    /// Query single row
    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> DbResult<T>
    where
        P: rusqlite::Params,
        F: FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.get_conn()?;

        conn.query_row(sql, params, f).map_err(DbError::from)
    }

    // =========================================================================
    // SETTINGS
    // =========================================================================

    /// Get a JSON-encoded setting value
    pub fn get_setting<T: serde::de::DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        let conn = self.get_conn()?;

        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match value {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| DbError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Store a JSON-encoded setting value
    pub fn set_setting<T: Serialize>(&self, key: &str, value: &T) -> DbResult<()> {
        let json =
            serde_json::to_string(value).map_err(|e| DbError::Serialization(e.to_string()))?;

        self.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, json],
        )?;

        Ok(())
    }

    // =========================================================================
    // ENTITY MIRRORS
    // =========================================================================

    /// Insert or replace a mirrored record with the server-confirmed state
    pub fn upsert_record(
        &self,
        entity: &str,
        id: &str,
        data: &serde_json::Value,
    ) -> DbResult<()> {
        let table = mirror_table(entity)?;
        let json =
            serde_json::to_string(data).map_err(|e| DbError::Serialization(e.to_string()))?;

        self.execute(
            &format!("INSERT OR REPLACE INTO {table} (id, data, updated_at) VALUES (?1, ?2, ?3)"),
            params![id, json, chrono::Utc::now().to_rfc3339()],
        )?;

        Ok(())
    }

    /// Delete a mirrored record
    pub fn delete_record(&self, entity: &str, id: &str) -> DbResult<()> {
        let table = mirror_table(entity)?;

        self.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
        Ok(())
    }

    /// Fetch a mirrored record by id
    pub fn get_record(&self, entity: &str, id: &str) -> DbResult<Option<serde_json::Value>> {
        let table = mirror_table(entity)?;

        let rows = self.query(
            &format!("SELECT data FROM {table} WHERE id = ?1"),
            params![id],
            |row| row.get::<_, String>(0),
        )?;

        match rows.into_iter().next() {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| DbError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
