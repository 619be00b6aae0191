mod from_row;
mod schema;
pub mod queries;

pub use from_row::{FromRow, query_all, query_one};
pub use schema::{init_audit_db, init_db, schema_version};

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tokio::sync::Notify;

use crate::config::Config;
use crate::payments::PaymentProcessor;

pub type DbPool = Pool<SqliteConnectionManager>;

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Application state shared by handlers and background workers
#[derive(Clone)]
pub struct AppState {
    /// Ledger database pool (events, payments, tickets, follow-ups)
    pub db: DbPool,
    /// Activity log database pool (separate file to isolate growth)
    pub audit: DbPool,
    pub config: Arc<Config>,
    pub processor: Arc<dyn PaymentProcessor>,
    /// Wakes the follow-up worker after a webhook commits new tasks
    pub follow_up_notify: Arc<Notify>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
    });
    Pool::builder().max_size(10).build(manager)
}
