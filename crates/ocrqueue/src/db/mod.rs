//! Database module for persistent storage.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle. Writes are
//! serialized through a single `Mutex<Connection>`; file-backed databases get
//! a second, query-only connection so readers never wait behind writers.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub mod error;
pub mod job_repo;
pub mod migrations;

pub use error::DatabaseError;

/// Milliseconds SQLite waits on a locked database file before giving up.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Thread-safe database handle.
///
/// Cloning is cheap (inner `Arc`s). WAL mode lets the reader connection see
/// the latest committed state while the writer is busy.
#[derive(Clone)]
pub struct Database {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Opens (or creates) the database at the given path and runs all
    /// pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let writer = Connection::open(path)?;
        writer.execute_batch(&format!(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout={};",
            BUSY_TIMEOUT_MS
        ))?;

        migrations::run_all(&writer)?;

        let reader = Connection::open(path)?;
        reader.execute_batch(&format!(
            "PRAGMA query_only=ON; PRAGMA busy_timeout={};",
            BUSY_TIMEOUT_MS
        ))?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    ///
    /// An in-memory database lives inside one connection, so reads and writes
    /// share it.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        let conn = Arc::new(Mutex::new(conn));
        Ok(Self {
            writer: Arc::clone(&conn),
            reader: conn,
            path: None,
        })
    }

    /// Provides locked access to the writer connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.writer.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Provides locked access to the read connection.
    ///
    /// Must not be nested inside [`Database::with_conn`]: for in-memory
    /// databases both guard the same connection.
    pub fn with_read_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.reader.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Location of the database file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Returns the canonical database path: `~/.ocrqueue/data/ocrqueue.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".ocrqueue").join("data").join("ocrqueue.db"))
}
