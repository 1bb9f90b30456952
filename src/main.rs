use anyhow::{Context, Result};

use badgebot::acbot;
use badgebot::acdb::Database;
use badgebot::config::BotConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Begin logger
    env_logger::init();

    // Load discord bot token and role lists
    let config = BotConfig::from_env()?;

    // Initialize database
    let db = Database::open(&config.database_path)
        .with_context(|| format!("Could not open database at {}", config.database_path.display()))?;

    if let Err(why) = acbot::run_bot(config, db).await {
        log::error!("Client error: {why:?}");
        return Err(why);
    }

    Ok(())
}
