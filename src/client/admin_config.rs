use chrono::Duration;
use clap::Args;

use crate::views;

/// A century
const MAX_SESSION_TTL_SECONDS: i64 = 100 * 365 * 24 * 3600;

#[derive(Args, Debug, Clone)]
pub struct AdminConfig {
    /// Created at startup if no admin exists yet
    #[arg(long, env = "ADMIN_USERNAME", default_value = "admin")]
    pub admin_username: String,
    #[arg(
        long,
        env = "ADMIN_PASSWORD",
        default_value = views::DEFAULT_ADMIN_PASSWORD,
        hide_env_values = true
    )]
    pub admin_password: String,
    /// Lifetime of the tokens issued by `POST /auth/login`
    #[arg(
        long,
        env = "ADMIN_SESSION_TTL_SECONDS",
        default_value_t = 86400,
        value_parser = clap::value_parser!(i64).range(1..=MAX_SESSION_TTL_SECONDS)
    )]
    pub session_ttl_seconds: i64,
}

impl From<AdminConfig> for views::AdminConfig {
    fn from(config: AdminConfig) -> Self {
        Self {
            username: config.admin_username,
            password: config.admin_password,
            session_ttl: Duration::seconds(config.session_ttl_seconds),
        }
    }
}
