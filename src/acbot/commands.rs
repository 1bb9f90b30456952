use anyhow::{Context, Result, anyhow};
use itertools::Itertools;
use regex::Regex;

use crate::access::Caller;
use crate::acdb::Database;
use crate::admin;
use crate::aggregate::AchievementAggregateReader;
use crate::config::BotConfig;
use crate::models::{AchievementDefinition, UserAchievementStatus};
use crate::profile;
use crate::progress::ProgressReconciler;

const MAX_CMD_LENGTH: usize = 12;

/// Discord refuses messages longer than this.
const MAX_MESSAGE_LENGTH: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// React with a checkmark instead of answering.
    Ack,
    Text(String),
}

struct CommandInstance<'a> {
    db: &'a Database,
    config: &'a BotConfig,

    caller_id: u64,
    caller: Caller,
    parameters: &'a [&'a str],
    /// Everything after the command name, untokenized.
    rest: &'a str,
}

pub struct Commands<'a> {
    db: &'a Database,
    config: &'a BotConfig,
}

impl<'a> Commands<'a> {
    pub fn new(db: &'a Database, config: &'a BotConfig) -> Self {
        Self { db, config }
    }

    /// Runs one chat command sent by `author_id`. `content` still carries the call token.
    pub fn run_command(&self, author_id: u64, content: &str) -> Result<Reply> {
        // Skip the call token, then split into the command and its parameters.
        let input = content
            .strip_prefix(self.config.call_token)
            .context("Message does not start with the call token.")?;
        let split_tokens = input.split_whitespace().collect::<Vec<_>>();
        let Some((&command, parameters)) = split_tokens.split_first() else {
            return Err(anyhow!("Empty command, see {}help for commands.", self.config.call_token));
        };
        let rest = input.trim_start()[command.len()..].trim();

        let cmd = CommandInstance {
            db: self.db,
            config: self.config,
            caller_id: author_id,
            caller: Caller::new(author_id.to_string(), self.config.role_for(author_id)),
            parameters,
            rest,
        };

        let reply = match command {
            "achievements" | "badges" => cmd.achievements()?,
            "grant" => cmd.set_achieved(true)?,
            "revoke" => cmd.set_achieved(false)?,
            "count" => cmd.count()?,
            "score" => cmd.score()?,
            "who" => cmd.who()?,
            "define" => cmd.define()?,
            "enable" => cmd.enable()?,
            "delete" => cmd.delete()?,
            "favorite" => cmd.favorite()?,
            "card" => cmd.card()?,
            "help" => Reply::Text(self.get_help()),
            _ => {
                if is_valid_cmd(command)? {
                    log::info!("User submitted unknown command: {}", command);
                    return Err(anyhow!(
                        "No such command found: {}, see {}help for commands.",
                        command,
                        self.config.call_token
                    ));
                } else {
                    log::info!("User submitted invalid command: {}", command);
                    return Err(anyhow!("Invalid command syntax."));
                }
            }
        };

        Ok(reply)
    }

    /// Gets a help string. Should be updated after a new command is added
    pub fn get_help(&self) -> String {
        let t = self.config.call_token;
        format!(
            r#"
**Command List:**
`{t}achievements [@user]`:  List achievements and progress.
`{t}who <achievement>`:  List everyone with progress on an achievement.
`{t}favorite <achievement|clear>`:  Pick the achievement shown on your profile card.
`{t}card [@user]`:  Show a profile card.
`{t}grant <achievement> <@user>`:  Grant an achievement (admin).
`{t}revoke <achievement> <@user>`:  Revoke an achievement (admin).
`{t}count <achievement> <@user> <+n|-n>`:  Change attendance progress (committee).
`{t}score <achievement> <@user> <score|clear>`:  Set a score (committee).
`{t}define <json>`:  Create or replace an achievement definition (admin).
`{t}enable <achievement> <true|false>`:  Show or hide an achievement (admin).
`{t}delete <achievement>`:  Delete an achievement and all progress on it (admin).
`{t}help`:  Get information on supported commands
"#,
        )
    }
}

impl CommandInstance<'_> {
    fn achievements(&self) -> Result<Reply> {
        let target = match self.parameters.first() {
            Some(token) => parse_user_ref(token)?.context("Expected a user mention.")?,
            None => self.caller_id,
        };

        // Someone else's list, seen with the requester's privileges.
        let viewer = Caller::new(target.to_string(), self.caller.role);
        let views = AchievementAggregateReader::new(self.db).list_for_user(&viewer)?;
        if views.is_empty() {
            return Ok(Reply::Text(String::from("No achievements yet.")));
        }

        let mut output = format!("**Achievements for <@{target}>:**");
        for (category, group) in &views.iter().chunk_by(|v| v.category.as_str()) {
            output += &format!("\n__{}__", if category.is_empty() { "General" } else { category });
            for view in group {
                output += &format!("\n{view}");
            }
        }

        Ok(Reply::Text(output))
    }

    fn who(&self) -> Result<Reply> {
        let achievement_id = self.parameters.first().context(usage(self.config, "who <achievement>"))?;
        let view = AchievementAggregateReader::new(self.db)
            .view_for_user(&self.caller, achievement_id)?
            .with_context(|| format!("No achievement with id '{achievement_id}'."))?;

        let mut output = format!("**{}**: {} achiever(s)", view.title, view.total_achievers);
        if let Some(best) = view.highest_score {
            output += &format!(", best score {best}");
        }
        for entry in &view.achievers {
            output += &format!(
                "\n\t<@{}> {} count {}{}",
                entry.user_id,
                if entry.achieved { "🏅" } else { "·" },
                entry.attendance_count,
                entry.score.map(|s| format!(", score {s}")).unwrap_or_default()
            );
        }

        Ok(Reply::Text(output))
    }

    fn set_achieved(&self, achieved: bool) -> Result<Reply> {
        let name = if achieved { "grant" } else { "revoke" };
        let (achievement_id, target) = self.achievement_and_target(&format!("{name} <achievement> <@user>"))?;

        let status = ProgressReconciler::new(self.db)
            .set_achieved(&self.caller, achievement_id, &target.to_string(), achieved)?;

        Ok(Reply::Text(describe_status(&status)))
    }

    fn count(&self) -> Result<Reply> {
        let usage_line = "count <achievement> <@user> <+n|-n>";
        let (achievement_id, target) = self.achievement_and_target(usage_line)?;
        let delta = self
            .parameters
            .get(2)
            .context(usage(self.config, usage_line))?
            .parse::<i64>()
            .with_context(|| usage(self.config, usage_line))?;

        let status = ProgressReconciler::new(self.db)
            .update_count(&self.caller, achievement_id, &target.to_string(), delta)?;

        Ok(Reply::Text(describe_status(&status)))
    }

    fn score(&self) -> Result<Reply> {
        let usage_line = "score <achievement> <@user> <score|clear>";
        let (achievement_id, target) = self.achievement_and_target(usage_line)?;
        let score = match *self.parameters.get(2).context(usage(self.config, usage_line))? {
            "clear" => None,
            raw => Some(raw.parse::<f64>().with_context(|| format!("'{raw}' is not a number."))?),
        };

        let status = ProgressReconciler::new(self.db)
            .update_score(&self.caller, achievement_id, &target.to_string(), score)?;

        Ok(Reply::Text(describe_status(&status)))
    }

    fn define(&self) -> Result<Reply> {
        let payload = self
            .rest
            .trim_start_matches("```json")
            .trim_matches('`')
            .trim();
        if payload.is_empty() {
            return Err(anyhow!(usage(self.config, "define <json>")));
        }

        let definition: AchievementDefinition =
            serde_json::from_str(payload).context("Could not read the achievement definition.")?;
        let created = admin::define_achievement(self.db, &self.caller, &definition)?;

        Ok(Reply::Text(format!(
            "{} achievement `{}` ({} level(s)).",
            if created { "Created" } else { "Updated" },
            definition.id,
            definition.level_config.len()
        )))
    }

    fn enable(&self) -> Result<Reply> {
        let usage_line = "enable <achievement> <true|false>";
        let (achievement_id, state) = self
            .parameters
            .iter()
            .next_tuple()
            .context(usage(self.config, usage_line))?;
        let enabled = match *state {
            "true" => true,
            "false" => false,
            other => return Err(anyhow!("Cannot set enabled to {other}: \n{}", usage(self.config, usage_line))),
        };

        admin::set_enabled(self.db, &self.caller, achievement_id, enabled)?;
        Ok(Reply::Ack)
    }

    fn delete(&self) -> Result<Reply> {
        let achievement_id = self.parameters.first().context(usage(self.config, "delete <achievement>"))?;
        admin::delete_achievement(self.db, &self.caller, achievement_id)?;
        Ok(Reply::Ack)
    }

    fn favorite(&self) -> Result<Reply> {
        let choice = match *self.parameters.first().context(usage(self.config, "favorite <achievement|clear>"))? {
            "clear" => None,
            id => Some(id),
        };

        profile::set_favorite(self.db, &self.caller, choice)?;
        Ok(Reply::Ack)
    }

    fn card(&self) -> Result<Reply> {
        let target = match self.parameters.first() {
            Some(token) => parse_user_ref(token)?.context("Expected a user mention.")?,
            None => self.caller_id,
        };

        let card = profile::profile_card(self.db, &target.to_string())?;
        Ok(Reply::Text(format!("<@{target}>\n{card}")))
    }

    fn achievement_and_target(&self, usage_line: &str) -> Result<(&str, u64)> {
        let (&achievement_id, &user) = self
            .parameters
            .iter()
            .next_tuple()
            .with_context(|| usage(self.config, usage_line))?;
        let target = parse_user_ref(user)?.with_context(|| format!("'{user}' is not a user mention."))?;

        Ok((achievement_id, target))
    }
}

fn usage(config: &BotConfig, line: &str) -> String {
    format!("Expected usage: `{}{line}`", config.call_token)
}

fn describe_status(status: &UserAchievementStatus) -> String {
    let mut output = format!(
        "<@{}> `{}`: count {}, {}",
        status.user_id,
        status.achievement_id,
        status.attendance_count,
        if status.achieved { "achieved 🏅" } else { "not achieved" }
    );
    if let Some(date) = status.achieved_date {
        output += &format!(" (since {})", date.format("%Y-%m-%d"));
    }
    if let Some(score) = status.score {
        output += &format!(", score {score}");
    }
    output
}

/// Ensures that the string slice conforms to C-like identifier regex
fn is_valid_cmd(s: &str) -> Result<bool> {
    Ok(s.len() <= MAX_CMD_LENGTH && Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$")?.is_match(s))
}

/// Reads a Discord user mention (`<@id>` / `<@!id>`) or a bare user id.
pub fn parse_user_ref(token: &str) -> Result<Option<u64>> {
    let re = Regex::new(r"^(?:<@!?(\d+)>|(\d+))$")?;
    let Some(captures) = re.captures(token.trim()) else {
        return Ok(None);
    };

    let digits = captures
        .get(1)
        .or_else(|| captures.get(2))
        .map(|m| m.as_str())
        .context("Malformed mention.")?;
    Ok(Some(digits.parse()?))
}

/// Splits text into Discord-sized messages, on line boundaries where possible.
/// Never yields a blank chunk; Discord rejects those.
pub fn chunk_message(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        let mut line = line.to_string();
        while line.chars().count() > MAX_MESSAGE_LENGTH {
            let split_at = line.char_indices().nth(MAX_MESSAGE_LENGTH).map_or(line.len(), |(i, _)| i);
            let tail = line.split_off(split_at);
            flush_chunk(&mut chunks, &mut current);
            chunks.push(line);
            line = tail;
        }

        let separator = usize::from(!current.is_empty());
        if current.chars().count() + separator + line.chars().count() > MAX_MESSAGE_LENGTH {
            flush_chunk(&mut chunks, &mut current);
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&line);
    }

    flush_chunk(&mut chunks, &mut current);
    chunks
}

fn flush_chunk(chunks: &mut Vec<String>, current: &mut String) {
    let chunk = std::mem::take(current);
    if !chunk.trim().is_empty() {
        chunks.push(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::{TempDir, tempdir};

    const ADMIN: u64 = 100;
    const COMMITTEE: u64 = 200;
    const MEMBER: u64 = 300;

    fn setup() -> (TempDir, Database, BotConfig) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("badges.db")).unwrap();
        let config = BotConfig {
            discord_token: "token".to_string(),
            database_path: dir.path().join("badges.db"),
            call_token: '$',
            admin_ids: HashSet::from([ADMIN]),
            committee_ids: HashSet::from([COMMITTEE]),
        };
        (dir, db, config)
    }

    fn text(reply: Reply) -> String {
        match reply {
            Reply::Text(text) => text,
            Reply::Ack => String::from("<ack>"),
        }
    }

    #[test]
    fn test_parse_user_ref() {
        assert_eq!(parse_user_ref("<@123>").unwrap(), Some(123));
        assert_eq!(parse_user_ref("<@!456>").unwrap(), Some(456));
        assert_eq!(parse_user_ref("789").unwrap(), Some(789));
        assert_eq!(parse_user_ref("@someone").unwrap(), None);
    }

    #[test]
    fn test_define_count_and_list() {
        let (_dir, db, config) = setup();
        let commands = Commands::new(&db, &config);

        let define = r#"$define {"id":"regular","title":"Regular","category":"Events","attendanceCounter":true,
            "levelConfig":[{"progressNeeded":2,"levelTitle":"Bronze"},{"progressNeeded":4,"levelTitle":"Silver"}]}"#;
        let reply = text(commands.run_command(ADMIN, define).unwrap());
        assert!(reply.contains("Created achievement `regular` (2 level(s))"));

        let reply = text(commands.run_command(COMMITTEE, &format!("$count regular <@{MEMBER}> +2")).unwrap());
        assert!(reply.contains("count 2, achieved"));

        let reply = text(commands.run_command(MEMBER, "$achievements").unwrap());
        assert!(reply.contains("Bronze"));
        assert!(reply.contains("Level 1/2"));

        let reply = text(commands.run_command(COMMITTEE, "$who regular").unwrap());
        assert!(reply.contains(&format!("<@{MEMBER}>")));

        let reply = text(commands.run_command(MEMBER, "$who regular").unwrap());
        assert!(reply.starts_with("**Bronze**: 1 achiever(s)"));
        assert!(!reply.contains(&format!("<@{MEMBER}>")));
    }

    #[test]
    fn test_permissions_surface_as_errors() {
        let (_dir, db, config) = setup();
        let commands = Commands::new(&db, &config);
        commands
            .run_command(ADMIN, r#"$define {"id":"founder","title":"Founder"}"#)
            .unwrap();

        let err = commands.run_command(COMMITTEE, &format!("$grant founder <@{MEMBER}>")).unwrap_err();
        assert!(err.to_string().starts_with("[setAchieved]"));

        let err = commands.run_command(MEMBER, &format!("$count founder <@{MEMBER}> 1")).unwrap_err();
        assert!(err.to_string().starts_with("[updateCount]"));

        let err = commands.run_command(ADMIN, &format!("$score founder <@{MEMBER}> 10")).unwrap_err();
        assert!(err.to_string().contains("scoring is disabled"));
    }

    #[test]
    fn test_grant_favorite_and_card() {
        let (_dir, db, config) = setup();
        let commands = Commands::new(&db, &config);
        commands
            .run_command(ADMIN, r#"$define {"id":"founder","title":"Founder","cardSkinImageUrl":"https://img/f.png"}"#)
            .unwrap();

        assert_eq!(commands.run_command(MEMBER, "$favorite founder").ok(), None);
        commands.run_command(ADMIN, &format!("$grant founder <@{MEMBER}>")).unwrap();
        assert_eq!(commands.run_command(MEMBER, "$favorite founder").unwrap(), Reply::Ack);

        let reply = text(commands.run_command(ADMIN, &format!("$card <@{MEMBER}>")).unwrap());
        assert!(reply.contains("https://img/f.png"));
    }

    #[test]
    fn test_unknown_and_invalid_commands() {
        let (_dir, db, config) = setup();
        let commands = Commands::new(&db, &config);

        let err = commands.run_command(MEMBER, "$frobnicate").unwrap_err();
        assert!(err.to_string().contains("No such command found"));

        let err = commands.run_command(MEMBER, "$9lives").unwrap_err();
        assert_eq!(err.to_string(), "Invalid command syntax.");

        assert!(text(commands.run_command(MEMBER, "$help").unwrap()).contains("$grant"));
    }

    #[test]
    fn test_chunk_message() {
        assert_eq!(chunk_message("a\nb"), vec!["a\nb".to_string()]);

        let long = vec!["x".repeat(1500), "y".repeat(1500)].join("\n");
        let chunks = chunk_message(&long);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= MAX_MESSAGE_LENGTH));

        let huge = "z".repeat(4500);
        let chunks = chunk_message(&huge);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), huge);

        for (length, expected) in [(2000, 1), (4000, 2)] {
            let exact = "z".repeat(length);
            let chunks = chunk_message(&exact);
            assert_eq!(chunks.len(), expected, "{length} characters");
            assert!(chunks.iter().all(|c| c.chars().count() == MAX_MESSAGE_LENGTH));
            assert_eq!(chunks.concat(), exact);
        }

        let padded = format!("a\n{}\n\n\nb", "w".repeat(2000));
        let chunks = chunk_message(&padded);
        assert!(chunks.iter().all(|c| !c.trim().is_empty()));
        assert_eq!(chunks.len(), 3);
    }
}
