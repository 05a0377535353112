mod admin_config;
mod database_config;
pub mod runserver;

pub use admin_config::AdminConfig;
use clap::Parser;
use clap::ValueEnum;
pub use database_config::DatabaseConfig;
use runserver::RunserverArgs;

#[derive(Parser, Debug)]
#[command(author, version)]
pub struct Client {
    #[command(flatten)]
    pub database_config: DatabaseConfig,
    #[command(flatten)]
    pub admin_config: AdminConfig,
    #[command(flatten)]
    pub runserver_args: RunserverArgs,
    #[arg(long, env, value_enum, default_value_t = Color::Auto)]
    pub color: Color,
    #[arg(long, env = "CLUBSITE_LOG_STREAM", value_enum, default_value_t = LogStream::Stdout)]
    pub log_stream: LogStream,
    /// Version reported by `GET /version`
    #[clap(long, env = "CLUBSITE_GIT_DESCRIBE")]
    pub app_version: Option<String>,
}

#[derive(ValueEnum, Debug, Default, Clone)]
pub enum Color {
    Never,
    Always,
    #[default]
    Auto,
}

#[derive(ValueEnum, Debug, Default, Clone, Copy, PartialEq)]
pub enum LogStream {
    #[default]
    Stdout,
    Stderr,
}

impl From<LogStream> for common::tracing::Stream {
    fn from(stream: LogStream) -> Self {
        match stream {
            LogStream::Stdout => Self::Stdout,
            LogStream::Stderr => Self::Stderr,
        }
    }
}
