use std::path::PathBuf;

use chrono::Duration;
use clap::Args;

use crate::views;

use super::AdminConfig;
use super::DatabaseConfig;

#[derive(Args, Debug)]
pub struct RunserverArgs {
    #[arg(long, env = "CLUBSITE_PORT", default_value_t = 3000)]
    pub(super) port: u16,
    #[arg(long, env = "CLUBSITE_ADDRESS", default_value_t = String::from("0.0.0.0"))]
    pub(super) address: String,
    /// Files served for every path no API route matches
    #[clap(long, env = "CLUBSITE_STATIC_ASSETS_PATH")]
    pub(super) static_assets_path: Option<PathBuf>,
    /// Maximum size of an uploaded file, in bytes
    #[clap(long, env = "CLUBSITE_MAX_UPLOAD_SIZE", default_value_t = 10 * 1024 * 1024)]
    pub(super) max_upload_size: usize,
    /// The timeout to use when performing the healthcheck, in milliseconds
    #[clap(long, env = "CLUBSITE_HEALTH_CHECK_TIMEOUT_MS", default_value_t = 1000)]
    pub(super) health_check_timeout_ms: u64,
    /// The only origin allowed by CORS, any origin if unset
    #[clap(long, env = "CLUBSITE_ALLOWED_ORIGIN")]
    pub(super) allowed_origin: Option<String>,
}

/// Create and run the server
pub async fn runserver(
    RunserverArgs {
        port,
        address,
        static_assets_path,
        max_upload_size,
        health_check_timeout_ms,
        allowed_origin,
    }: RunserverArgs,
    database: DatabaseConfig,
    admin: AdminConfig,
    app_version: Option<String>,
) -> anyhow::Result<()> {
    let config = views::ServerConfig {
        port,
        address,
        health_check_timeout: Duration::milliseconds(health_check_timeout_ms as i64),
        database_config: database.into(),
        admin_config: admin.into(),
        max_upload_size,
        allowed_origin,
        static_assets_path,
        app_version,
    };

    let server = views::Server::new(config).await?;
    Ok(server.start().await?)
}
