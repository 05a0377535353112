use std::path::PathBuf;

use clap::Args;

use crate::views;

#[derive(Args, Debug, Clone)]
pub struct DatabaseConfig {
    /// The SQLite file, created if missing
    #[arg(long, env = "CLUBSITE_DATABASE_PATH", default_value = "./clubsite.sqlite3")]
    pub database_path: PathBuf,
    #[arg(long, env = "CLUBSITE_DATABASE_POOL_SIZE", default_value_t = 8)]
    pub database_pool_size: usize,
    /// Where the files referenced by a path-based database are read from
    #[arg(long, env = "CLUBSITE_LEGACY_UPLOADS_DIR", default_value = "./uploads")]
    pub legacy_uploads_dir: PathBuf,
}

impl From<DatabaseConfig> for views::DatabaseConfig {
    fn from(config: DatabaseConfig) -> Self {
        Self {
            path: config.database_path,
            pool_size: config.database_pool_size,
            legacy_uploads_dir: config.legacy_uploads_dir,
        }
    }
}
