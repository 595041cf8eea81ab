//! Database connectivity


use std::borrow::Borrow;
use std::time::Duration;

use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection, Pool};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, info, trace};

use crate::config::Config;
use crate::error::{Error, Result};


pub mod schema;


/// Connection pool type used throughout porchwatch
pub type ConnectionPool = Pool<ConnectionManager<SqliteConnection>>;


/// Pooled connection type used throughout porchwatch
pub type PooledConnection = r2d2::PooledConnection<ConnectionManager<SqliteConnection>>;


const MIGRATIONS: EmbeddedMigrations = embed_migrations!();


/// Applies per-connection pragmas when the pool opens a connection
#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), r2d2::Error> {
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(r2d2::Error::QueryError)
    }
}


/// Connects to and initializes the porchwatch database
///
/// The database file lives in the configured state directory, which is
/// created if it does not yet exist.
pub fn connect(config: &Config) -> Result<ConnectionPool> {

    trace!("ensuring state directory exists");
    std::fs::create_dir_all(&config.state_dir)?;

    let db_url = config.database_path()
        .to_string_lossy()
        .into_owned();

    open(&db_url, 8)
}


/// Opens a connection pool for the given database URL and runs migrations
///
/// `max_size` must be 1 for `:memory:` databases, because every connection
/// to an in-memory database sees a different database.
pub fn open(db_url: &str, max_size: u32) -> Result<ConnectionPool> {

    debug!("connecting to database at {}", db_url);
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_secs(10))
        .connection_customizer(Box::new(ConnectionOptions))
        .build(ConnectionManager::new(db_url))?;

    debug!("running migrations if necessary");
    let mut conn = pool.get()?;
    let applied = conn.run_pending_migrations(MIGRATIONS)
        .map_err(|err| Error::Migration(err.to_string()))?;
    if !applied.is_empty() {
        info!("applied {} database migration(s)", applied.len());
    }

    Ok(pool)
}


/// Current time as Unix seconds, the representation of every stored timestamp
pub fn now() -> i64 {
    Utc::now().timestamp()
}


/// Provides access to the application database
pub trait DatabaseContext {

    /// Gets a pooled database connection
    fn conn(&self) -> Result<PooledConnection>;
}

impl<T> DatabaseContext for T
where T: Borrow<ConnectionPool>
{
    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.borrow().get()?)
    }
}


#[cfg(test)]
pub(crate) mod testing {

    use super::*;

    /// Opens a fresh, fully migrated in-memory database
    pub fn memory_pool() -> ConnectionPool {
        open(":memory:", 1).expect("in-memory database")
    }
}
