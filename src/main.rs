
mod completion;
mod config;
mod conversation_manager;
mod discord_manager;
mod error;
mod history;

use std::sync::Arc;

use anyhow::Context as _;
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

use crate::completion::OpenAiGateway;
use crate::config::{BotConfig, Credentials};
use crate::conversation_manager::ConversationManager;
use crate::discord_manager::DiscordManager;

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_LEVEL));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv_loaded = dotenv().is_ok();

    let config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            init_tracing(config::DEFAULT_LOG_LEVEL);
            tracing::error!(%error, "cannot start the bot without a valid configuration");
            return Err(error.into());
        }
    };
    init_tracing(&config.log_level);

    if !dotenv_loaded {
        tracing::debug!("no .env file found, using process environment only");
    }

    let credentials = Credentials::load(&config.credentials_path).map_err(|error| {
        tracing::error!(%error, "failed to load API credentials");
        error
    })?;

    let gateway = OpenAiGateway::new(&config, &credentials);
    tracing::info!(
        model = gateway.model(),
        history_length = config.history_length,
        "starting chat relay"
    );

    let conversations = Arc::new(ConversationManager::new(
        Arc::new(gateway),
        config.history_length,
    ));

    let mut discord = DiscordManager::new(&config.bot_token, conversations)
        .await
        .context("failed to create Discord client")?;

    if let Err(why) = discord.start().await {
        tracing::error!(error = %why, "an error occurred while running the client");
        return Err(why.into());
    }

    Ok(())
}
