mod db_connection_pool;
pub mod migrations;
pub mod tables;

pub use db_connection_pool::DatabasePoolBuildError;
pub use db_connection_pool::DatabasePoolError;
pub use db_connection_pool::DbConnection;
pub use db_connection_pool::DbConnectionPool;
pub use db_connection_pool::PingError;
pub use db_connection_pool::ping_database;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Query(#[from] diesel::result::Error),
    #[error("could not run the query on the blocking pool: {0}")]
    Interaction(String),
}
