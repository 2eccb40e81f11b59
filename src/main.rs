mod bot;
mod config;
mod downloader;
mod errors;
mod metadata;
mod security;
mod utils;

use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

/// Drive the uploader bot from a terminal. Stdin lines are chat messages,
/// uploads land in the outbox directory.
#[derive(Parser, Debug)]
#[command(name = "url-uploader", version, about)]
struct Cli {
    /// Path to the JSON config file. Defaults to the per-user config dir.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Chat user id to act as. Defaults to the configured owner.
    #[arg(long)]
    user: Option<u64>,

    /// Directory receiving uploaded files.
    #[arg(long, default_value = "outbox")]
    outbox: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    info!("Starting URL uploader");

    let config = match config::AppConfig::load(cli.config.as_deref()) {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::error!("Failed to load configuration: {}", e);
            config::AppConfig::default()
        }
    };

    let user = cli.user.unwrap_or(config.owner_id);
    info!("Acting as user {}, uploads go to {:?}", user, cli.outbox);

    let messenger = Arc::new(bot::console::ConsoleMessenger::new(cli.outbox));
    let handler = Arc::new(bot::BotHandler::from_config(&config, messenger)?);

    bot::console::run(handler, user).await?;
    Ok(())
}
