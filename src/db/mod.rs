//! SQLite-backed persistence: the shared connection handle, the domain
//! schema, and the typed tool layer.

pub mod schema;
pub mod tools;
pub mod types;

pub use tools::{CreateStopParams, ToolLayer};
pub use types::*;

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

/// Shared handle to the operations database. Cheap to clone; all access is
/// serialised through the inner mutex, and every mutation runs inside a
/// transaction on the locked connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::database(e.to_string()))?;
        if !schema::is_initialized(&conn) {
            schema::initialize_schema(&conn).map_err(|e| Error::database(e.to_string()))?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::database(e.to_string()))?;
        schema::initialize_schema(&conn).map_err(|e| Error::database(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the locked connection. The closure gets a
    /// mutable borrow so it can open transactions.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::internal(format!("failed to lock connection: {}", e)))?;
        f(&mut conn)
    }
}

/// Convert a rusqlite error, preserving domain errors raised inside closures.
pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::database(e.to_string())
}
