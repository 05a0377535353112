mod client;
mod error;
mod views;

use std::io::IsTerminal;
use std::process::exit;

use clap::Parser;
use client::Client;
use client::Color;
use client::runserver::runserver;
use colored::control::set_override;
use common::tracing::TracingConfig;
use common::tracing::create_tracing_subscriber;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(_) => (),
        Err(e) => {
            eprintln!("{e:#}");
            exit(2);
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let client = Client::parse();

    match client.color {
        Color::Never => set_override(false),
        Color::Always => set_override(true),
        Color::Auto => set_override(std::io::stderr().is_terminal()),
    }

    let tracing_config = TracingConfig {
        stream: client.log_stream.into(),
        directives: vec![],
    };
    tracing::subscriber::set_global_default(create_tracing_subscriber(
        tracing_config,
        LevelFilter::INFO,
    ))?;

    runserver(
        client.runserver_args,
        client.database_config,
        client.admin_config,
        client.app_version,
    )
    .await
}
