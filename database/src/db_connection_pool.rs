use std::path::Path;
#[cfg(any(test, feature = "testing"))]
use std::sync::Arc;

use deadpool_diesel::Runtime;
use deadpool_diesel::sqlite::Manager;
use deadpool_diesel::sqlite::Object;
use deadpool_diesel::sqlite::Pool;
use diesel::RunQueryDsl;
use diesel::SqliteConnection;
use diesel::connection::SimpleConnection as _;
use diesel::sql_query;
use tracing::trace;

use crate::DatabaseError;

/// Pragmas applied to every connection handed out by the pool
///
/// `foreign_keys` is a per-connection setting in SQLite and defaults to off.
const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;";

/// A connection checked out from a [DbConnectionPool]
///
/// Diesel's SQLite backend is synchronous: every query runs inside
/// [DbConnection::interact], on the blocking thread pool of the runtime.
pub struct DbConnection {
    inner: Object,
}

impl DbConnection {
    /// Runs `f` with exclusive access to the underlying connection
    pub async fn interact<R, E, F>(&mut self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: From<DatabaseError> + Send + 'static,
    {
        self.inner
            .interact(f)
            .await
            .map_err(|e| E::from(DatabaseError::Interaction(e.to_string())))?
    }
}

/// Wrapper for connection pooling with support for test database isolation
///
/// # Testing pool
///
/// In test mode, each pool owns a dedicated SQLite file created inside a temporary
/// directory and migrated up front. The directory is removed when the last clone of
/// the pool is dropped.
///
/// A new pool is expected to be initialized for each test, see `DbConnectionPool::for_tests`.
#[derive(Clone)]
pub struct DbConnectionPool {
    pool: Pool,
    #[cfg(any(test, feature = "testing"))]
    _test_dir: Option<Arc<tempfile::TempDir>>,
}

#[cfg(any(test, feature = "testing"))]
impl Default for DbConnectionPool {
    fn default() -> Self {
        Self::for_tests()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabasePoolBuildError {
    #[error("could not create the database directory '{0}': {1}")]
    Directory(String, #[source] std::io::Error),
    #[error("an error occurred while building the database pool: '{0}'")]
    Pool(#[from] deadpool_diesel::sqlite::BuildError),
}

#[derive(Debug, thiserror::Error)]
pub enum DatabasePoolError {
    #[error("an error occurred while getting a connection from the database pool: '{0}'")]
    Pool(#[from] deadpool_diesel::sqlite::PoolError),
    #[error("could not configure the database connection: '{0}'")]
    Setup(#[from] DatabaseError),
}

impl DbConnectionPool {
    /// Creates a connection pool over the SQLite file at `path`
    ///
    /// The file (and its parent directory) is created when missing.
    /// In a testing environment, you should use `DbConnectionPool::for_tests` instead.
    pub fn try_initialize(path: &Path, max_size: usize) -> Result<Self, DatabasePoolBuildError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabasePoolBuildError::Directory(parent.display().to_string(), e)
            })?;
        }
        Ok(Self {
            pool: create_connection_pool(path, max_size)?,
            #[cfg(any(test, feature = "testing"))]
            _test_dir: None,
        })
    }

    /// Get a connection from the pool
    ///
    /// Per-connection pragmas are (re)applied on every checkout.
    pub async fn get(&self) -> Result<DbConnection, DatabasePoolError> {
        let mut conn = DbConnection {
            inner: self.pool.get().await?,
        };
        conn.interact(|conn| {
            conn.batch_execute(CONNECTION_PRAGMAS)
                .map_err(DatabaseError::from)
        })
        .await?;
        Ok(conn)
    }

    /// Create a connection pool for testing purposes
    ///
    /// The database is fully migrated before the pool is returned.
    #[cfg(any(test, feature = "testing"))]
    pub fn for_tests() -> Self {
        use diesel::Connection as _;

        let dir = tempfile::tempdir().expect("Failed to create test database directory");
        let path = dir.path().join("clubsite.sqlite3");
        let mut conn = SqliteConnection::establish(&path.to_string_lossy())
            .expect("Failed to open test database");
        crate::migrations::run_pending_migrations(
            &mut conn,
            &crate::migrations::MigrationOptions::new(dir.path().join("uploads")),
        )
        .expect("Failed to migrate test database");
        tracing::debug!(path = %path.display(), "Using test database");
        Self {
            pool: create_connection_pool(&path, 2).expect("Failed to build test pool"),
            _test_dir: Some(Arc::new(dir)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("could not ping the database: '{0}'")]
pub struct PingError(#[from] DatabaseError);

pub async fn ping_database(conn: &mut DbConnection) -> Result<(), PingError> {
    conn.interact(|conn| {
        sql_query("SELECT 1")
            .execute(conn)
            .map_err(DatabaseError::from)
    })
    .await?;
    trace!("Database ping successful");
    Ok(())
}

fn create_connection_pool(path: &Path, max_size: usize) -> Result<Pool, DatabasePoolBuildError> {
    let manager = Manager::new(path.to_string_lossy(), Runtime::Tokio1);
    Ok(Pool::builder(manager).max_size(max_size).build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_connection_pool() {
        let pool = DbConnectionPool::for_tests();
        let mut conn = pool.get().await.expect("Failed to get connection");
        ping_database(&mut conn).await.expect("Failed to ping");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn connections_enforce_foreign_keys() {
        #[derive(diesel::QueryableByName)]
        struct ForeignKeys {
            #[diesel(sql_type = diesel::sql_types::Integer)]
            foreign_keys: i32,
        }

        let pool = DbConnectionPool::for_tests();
        let mut conn = pool.get().await.unwrap();
        let pragma = conn
            .interact(|conn| {
                sql_query("PRAGMA foreign_keys")
                    .get_result::<ForeignKeys>(conn)
                    .map_err(DatabaseError::from)
            })
            .await
            .unwrap();
        assert_eq!(pragma.foreign_keys, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn initialize_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.sqlite3");
        let pool = DbConnectionPool::try_initialize(&path, 1).unwrap();
        let mut conn = pool.get().await.unwrap();
        ping_database(&mut conn).await.unwrap();
        assert!(path.exists());
    }
}
