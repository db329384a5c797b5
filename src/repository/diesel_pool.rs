//! SQLite connection pool for the ledger database.
//!
//! Diesel's SQLite backend is synchronous, so connections come from an r2d2
//! pool and every query runs on the blocking thread pool via [`run_blocking`].

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use std::time::Duration;

/// Diesel error type alias.
pub type DieselError = diesel::result::Error;

/// Connection pool for SQLite using r2d2.
pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

/// Pragmas applied to every connection when the pool hands it out.
#[derive(Debug, Clone, Copy)]
pub struct SqlitePragmas {
    pub busy_timeout_ms: u64,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        init_connection_pragmas(conn, self.busy_timeout_ms).map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Create a pool with an explicit size and pragma set.
///
/// Accepts a plain path or a `sqlite:` URL.
pub fn create_diesel_pool_with(
    database_url: &str,
    max_size: u32,
    pragmas: SqlitePragmas,
) -> Result<SqlitePool, diesel::r2d2::PoolError> {
    let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
    let manager = ConnectionManager::<SqliteConnection>::new(path);

    Pool::builder()
        .max_size(max_size.max(1))
        .connection_timeout(Duration::from_secs(30))
        .connection_customizer(Box::new(pragmas))
        .build(manager)
}

/// `synchronous = FULL` makes every committed ledger transition survive a
/// crash of the process or the machine.
pub fn init_connection_pragmas(
    conn: &mut SqliteConnection,
    busy_timeout_ms: u64,
) -> Result<(), DieselError> {
    conn.batch_execute(&format!(
        "PRAGMA busy_timeout = {busy_timeout_ms};
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = FULL;
         PRAGMA foreign_keys = ON;"
    ))
}

/// Run a blocking Diesel operation on the blocking thread pool.
///
/// Pool checkout and join failures surface as `DieselError::DatabaseError`
/// converted into `E`.
///
/// # Example
/// ```ignore
/// let entry = run_blocking(pool.clone(), |conn| {
///     crawl_ledger::table.filter(crawl_ledger::url.eq("https://example.com"))
///         .first::<LedgerRecord>(conn)
///         .optional()
/// }).await?;
/// ```
pub async fn run_blocking<F, T, E>(pool: SqlitePool, f: F) -> Result<T, E>
where
    F: FnOnce(&mut SqliteConnection) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<DieselError> + Send + 'static,
{
    let unknown = |message: String| {
        DieselError::DatabaseError(diesel::result::DatabaseErrorKind::Unknown, Box::new(message))
    };

    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(|e| E::from(unknown(e.to_string())))?;
        f(&mut conn)
    })
    .await
    .map_err(|e| E::from(unknown(e.to_string())))?
}
