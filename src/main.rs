use anyhow::Result;
use log::{error, info};
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::RwLock;

use automoderator::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("Starting AutoModerator v{}", automoderator::VERSION);

    let config_manager = ConfigurationManager::new(Path::new("config"));
    if let Err(e) = config_manager.initialize().await {
        error!("Failed to initialize configuration: {:#}", e);
        return Err(e);
    }

    let bot_config = config_manager.get_bot_config().await;
    if env::var("RUST_LOG").is_err() {
        log::set_max_level(bot_config.core.log_level_filter());
    }

    let config_channel = Arc::new(RwLock::new(bot_config.core.config_channel.clone()));
    let console_config = ConsoleConfig::from_env(bot_config.rules_dir.clone(), Arc::clone(&config_channel))?;
    info!(
        "Console rules for server '{}' are read from {}",
        console_config.server_id,
        bot_config.rules_dir.display()
    );

    let bot = ModerationBot::with_config_channel(
        Box::new(ConsoleConnection::new(console_config)),
        &bot_config.core,
        config_channel,
    );
    let mut events = bot.start().await?;
    let config_watch = bot.watch_config(&config_manager);

    info!("Type messages to test the rules. `#channel text` posts to a channel, Ctrl+C exits.");

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C signal: {}", e);
            }
            info!("Received Ctrl+C signal, shutting down...");
        }
        _ = &mut events => {
            info!("Event stream ended, shutting down...");
        }
    }

    config_watch.abort();
    events.abort();
    bot.shutdown().await?;

    info!("AutoModerator stopped");
    Ok(())
}
