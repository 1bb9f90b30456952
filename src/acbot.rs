pub mod commands;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serenity::async_trait;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::*;

use crate::acdb::Database;
use crate::config::BotConfig;
use commands::{Commands, Reply};

/// Connects to Discord and serves commands until the client stops.
pub async fn run_bot(config: BotConfig, db: Database) -> Result<()> {
    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let token = config.discord_token.clone();
    let handler = BadgeHandler { config: Arc::new(config), db };

    let mut client = Client::builder(&token, intents)
        .event_handler(handler)
        .await
        .context("Error creating client.")?;

    client.start().await?;

    Ok(())
}

/// Runs a chat command on the blocking pool.
/// SQLite work can wait up to the busy timeout, which must not stall the gateway.
pub async fn run_command_blocking(db: Database, config: Arc<BotConfig>, author_id: u64, content: String) -> Result<Reply> {
    tokio::task::spawn_blocking(move || Commands::new(&db, &config).run_command(author_id, &content))
        .await
        .unwrap_or_else(|err| Err(anyhow!("Command task failed: {err}")))
}

struct BadgeHandler {
    config: Arc<BotConfig>,
    db: Database,
}

#[async_trait]
impl EventHandler for BadgeHandler {
    async fn ready(&self, _ctx: serenity::client::Context, ready: Ready) {
        log::info!("Bot is connected and ready as {}!", ready.user.name);
    }

    async fn message(&self, ctx: serenity::client::Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let content = msg.content.clone();
        if !content.starts_with(self.config.call_token) || content.chars().count() < 2 {
            return;
        }

        let reply = run_command_blocking(self.db.clone(), Arc::clone(&self.config), msg.author.id.get(), content).await;

        let chunks = match reply {
            Ok(Reply::Ack) => {
                if let Err(why) = msg
                    .react(&ctx.http, serenity::all::ReactionType::Unicode(String::from("✅")))
                    .await
                {
                    log::error!("Error reacting to message: {why:?}");
                }
                return;
            }
            Ok(Reply::Text(text)) => commands::chunk_message(&text),
            Err(err) => vec![format!("Error: {err}")],
        };

        // If sending fails, try a short notice before giving up; it is logged either way.
        for chunk in chunks {
            if let Err(why) = msg.channel_id.say(&ctx.http, chunk).await {
                let _ = msg.channel_id.say(&ctx.http, "Oops, internal error.").await;
                log::error!("Error sending message: {why:?}");
                return;
            }
        }
    }
}
