use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use crate::access::Role;

const DEFAULT_DATABASE_PATH: &str = "badges.db";
const DEFAULT_CALL_TOKEN: char = '$';

/// Runtime configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub discord_token: String,
    pub database_path: PathBuf,
    pub call_token: char,
    pub admin_ids: HashSet<u64>,
    pub committee_ids: HashSet<u64>,
}

impl BotConfig {
    /// Loads `.env` (if any) and reads the configuration from the environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let discord_token = lookup("DISCORD_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .context("Expected 'DISCORD_TOKEN=<token>' in .env in project root.")?;

        let database_path = lookup("DATABASE_PATH")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string())
            .into();

        Ok(Self {
            discord_token,
            database_path,
            call_token: parse_call_token(lookup("BOT_CALL_TOKEN")),
            admin_ids: parse_id_list("ADMIN_USER_IDS", lookup("ADMIN_USER_IDS"))?,
            committee_ids: parse_id_list("COMMITTEE_USER_IDS", lookup("COMMITTEE_USER_IDS"))?,
        })
    }

    /// Role claims for a Discord user. Admin wins over committee.
    pub fn role_for(&self, user_id: u64) -> Role {
        if self.admin_ids.contains(&user_id) {
            Role::Admin
        } else if self.committee_ids.contains(&user_id) {
            Role::Committee
        } else {
            Role::Member
        }
    }
}

/// Single-character command prefix. Longer values are truncated.
fn parse_call_token(raw: Option<String>) -> char {
    let Some(token) = raw.as_deref().map(str::trim).and_then(|t| t.chars().next()) else {
        return DEFAULT_CALL_TOKEN;
    };

    if raw.as_deref().is_some_and(|r| r.trim().chars().count() > 1) {
        log::warn!("$BOT_CALL_TOKEN not a single character. Truncating to {token}");
    }
    token
}

fn parse_id_list(var: &str, raw: Option<String>) -> Result<HashSet<u64>> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| id.parse::<u64>().map_err(|err| anyhow!("${var} contains invalid user id '{id}': {err}")))
        .collect()
}
