pub mod messages;
pub mod migrations;
pub mod models;
pub mod rides;
pub mod users;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{CoreError, CoreResult};

/// Type alias for the shared database connection.
/// rusqlite is synchronous, so the connection sits behind Arc<Mutex>
/// with tokio::task::spawn_blocking for DB operations.
pub type DbPool = Arc<Mutex<Connection>>;

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    // Ensure data directory exists
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("ridelink.db");
    let mut conn = Connection::open(&db_path)?;

    // Enable WAL mode for better concurrent read performance
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // Enable foreign key enforcement
    conn.pragma_update(None, "foreign_keys", "ON")?;

    let migrations = migrations::migrations();
    migrations.to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// Run a synchronous query closure on the blocking pool.
///
/// Every persistence call made from an event handler goes through here, so a
/// poisoned lock, a rusqlite error or a panicked task all surface as
/// `TransientDependencyFailure`.
pub async fn with_conn<T, F>(db: &DbPool, f: F) -> CoreResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> CoreResult<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|e| {
            CoreError::TransientDependencyFailure(format!("DB lock error: {}", e))
        })?;
        f(&mut conn)
    })
    .await?
}
