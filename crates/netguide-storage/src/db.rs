//! SQLite handle for the assessment ledger.
//!
//! One connection behind a `Mutex`; every repository call borrows it through
//! [`Database::with_conn`]. Opening a database always brings the schema up to
//! date.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use netguide_core::error::NetGuideError;

use crate::migrations;

/// Pragmas for file-backed ledgers.
const FILE_PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;";

const MEMORY_PRAGMAS: &str = "PRAGMA foreign_keys = ON;";

fn storage_error(context: &'static str) -> impl Fn(rusqlite::Error) -> NetGuideError {
    move |e| NetGuideError::Storage(format!("{}: {}", context, e))
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the ledger file at `path`, creating parent
    /// directories as needed.
    pub fn new(path: &Path) -> Result<Self, NetGuideError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage_error("Failed to open database"))?;
        let db = Self::init(conn, FILE_PRAGMAS)?;
        info!(
            path = %path.display(),
            schema_version = db.schema_version()?,
            "Ledger database ready"
        );
        Ok(db)
    }

    /// Private in-memory ledger, used by tests and benches.
    pub fn in_memory() -> Result<Self, NetGuideError> {
        let conn = Connection::open_in_memory()
            .map_err(storage_error("Failed to open in-memory database"))?;
        let db = Self::init(conn, MEMORY_PRAGMAS)?;
        debug!("In-memory ledger database ready");
        Ok(db)
    }

    fn init(conn: Connection, pragmas: &str) -> Result<Self, NetGuideError> {
        conn.execute_batch(pragmas)
            .map_err(storage_error("Failed to set pragmas"))?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, NetGuideError>
    where
        F: FnOnce(&Connection) -> Result<T, NetGuideError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| NetGuideError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    pub fn schema_version(&self) -> Result<i64, NetGuideError> {
        self.with_conn(migrations::schema_version)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
