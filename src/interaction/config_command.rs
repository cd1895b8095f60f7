//! `/config` and install acknowledgement commands.
//!
//! These run against the store for a guild and channel context and return the reply
//! text. Permission checks happen in the chat front-end before a command gets here.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, instrument};

use crate::{base::types::Res, service::db::DbClient};

static REPOSITORY_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w\-\.]+/[\w\-\.]+$").expect("repository pattern is valid"));

/// Whether `repository` looks like `owner/repo`.
pub fn is_valid_repository(repository: &str) -> bool {
    REPOSITORY_PATTERN.is_match(repository)
}

/// A configuration command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Show the guild configuration, or the current channel's when `channel` is set.
    View { channel: bool },
    /// Set the default repository for the guild, or the current channel only.
    SetDefaultRepo { repository: String, channel: bool },
    /// Clear the default repository for the guild, or the current channel only.
    ClearDefaultRepo { channel: bool },
    /// Acknowledge that the GitHub app has been installed.
    MarkInstalled,
}

/// Executes a command for the given context and returns the reply.
#[instrument(skip(db))]
pub async fn execute(db: &DbClient, guild_id: Option<&str>, channel_id: Option<&str>, command: ConfigCommand) -> Res<String> {
    let Some(guild_id) = guild_id else {
        return Ok("⚠️ This command can only be used in a server, not in DMs.".to_string());
    };

    match command {
        ConfigCommand::View { channel } => view(db, guild_id, channel_id.filter(|_| channel)).await,
        ConfigCommand::SetDefaultRepo { repository, channel } => {
            if !is_valid_repository(&repository) {
                return Ok(format!(
                    "⚠️ Invalid repository format. Please use `owner/repo` format (e.g., `acme/widgets`).\n\nYou provided: `{repository}`"
                ));
            }

            let channel_id = channel_id.filter(|_| channel);
            db.set_default_repository(guild_id, &repository, channel_id).await?;

            info!("Default repository set to `{}`.", repository);

            Ok(match channel_id {
                Some(channel_id) => format!("✅ Default repository for <#{channel_id}> set to `{repository}`"),
                None => format!("✅ Default repository for this server set to `{repository}`"),
            })
        }
        ConfigCommand::ClearDefaultRepo { channel } => {
            let channel_id = channel_id.filter(|_| channel);
            db.clear_default_repository(guild_id, channel_id).await?;

            Ok(match channel_id {
                Some(channel_id) => format!("✅ Default repository cleared for <#{channel_id}>"),
                None => "✅ Default repository cleared for this server".to_string(),
            })
        }
        ConfigCommand::MarkInstalled => {
            db.mark_installed(guild_id).await?;

            Ok("✅ GitHub App marked as installed for this server!".to_string())
        }
    }
}

async fn view(db: &DbClient, guild_id: &str, channel_id: Option<&str>) -> Res<String> {
    if let Some(channel_id) = channel_id {
        let channel = db.get_channel_config(guild_id, channel_id).await?;
        let repository = db.get_default_repository(guild_id, Some(channel_id)).await?;

        let mut reply = format!(
            "**Channel Configuration** (<#{channel_id}>)\n\n**Default Repository:** {}\n",
            repository.as_deref().unwrap_or("Not set (using server default)")
        );

        if let Some(features) = channel.and_then(|c| c.features) {
            reply.push_str(&format!("**Features:** {}", serde_json::to_string_pretty(&features.entries)?));
        }

        return Ok(reply);
    }

    let Some(guild) = db.get_guild_config(guild_id).await? else {
        return Ok("**Server Configuration**\n\nNo configuration set for this server yet. Use `/config set-default-repo` to get started!".to_string());
    };

    let channel_count = guild.channels.len();
    let mut reply = format!(
        "**Server Configuration**\n\n**Default Repository:** {}\n**GitHub App Installed:** {}\n**Configured Channels:** {}\n",
        guild.default_repository.as_deref().unwrap_or("Not set"),
        if guild.github_app_installed { "Yes" } else { "No" },
        channel_count
    );

    if channel_count > 0 {
        reply.push_str("\nUse `/config view channel:true` to see channel-specific settings.");
    }

    Ok(reply)
}
