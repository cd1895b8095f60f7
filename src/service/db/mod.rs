use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{
    ChannelConfig, ChannelConfigPatch, GuildConfig, GuildConfigPatch, Patch, PrKey, PtalMessageMapping, Res, Void,
};

mod locks;
pub mod surreal;

// Traits.

/// Generic database client trait that clients must implement.
///
/// This covers two logical namespaces: guild/channel settings keyed by guild ID, and
/// PTAL message mappings keyed by pull request. Every write must be serialized per key
/// and persisted before the call returns.
#[async_trait]
pub trait GenericDbClient: Send + Sync + 'static {
    /// Gets the guild configuration, if one has ever been written.
    async fn get_guild_config(&self, guild_id: &str) -> Res<Option<GuildConfig>>;

    /// Shallow-merges the patch into the guild record, creating it if needed.
    ///
    /// Returns the merged record.
    async fn set_guild_config(&self, guild_id: &str, patch: GuildConfigPatch) -> Res<GuildConfig>;

    /// Gets the configuration for a single channel of a guild.
    async fn get_channel_config(&self, guild_id: &str, channel_id: &str) -> Res<Option<ChannelConfig>>;

    /// Shallow-merges the patch into one channel of the guild record.
    ///
    /// Sibling channels and guild-level fields are untouched.
    async fn set_channel_config(&self, guild_id: &str, channel_id: &str, patch: ChannelConfigPatch) -> Res<GuildConfig>;

    /// Removes the whole guild record. Removing a missing record is not an error.
    async fn delete_guild_config(&self, guild_id: &str) -> Void;

    /// Adds a PTAL message mapping to the pull request's collection.
    ///
    /// A mapping for the same channel and message replaces the existing entry.
    async fn store_ptal_message(&self, key: &PrKey, mapping: &PtalMessageMapping) -> Void;

    /// Lists every PTAL message mapping stored for the pull request.
    async fn list_ptal_messages(&self, key: &PrKey) -> Res<Vec<PtalMessageMapping>>;

    /// Removes every PTAL message mapping for the pull request. Idempotent.
    async fn remove_ptal_messages(&self, key: &PrKey) -> Void;
}

/// Database client for ptal-bot.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct DbClient {
    inner: Arc<dyn GenericDbClient>,
}

impl Deref for DbClient {
    type Target = dyn GenericDbClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl DbClient {
    pub fn new(inner: Arc<dyn GenericDbClient>) -> Self {
        Self { inner }
    }

    /// Resolves the effective default repository for a guild and optional channel.
    ///
    /// The channel's own setting wins, then the guild's, then nothing.
    pub async fn get_default_repository(&self, guild_id: &str, channel_id: Option<&str>) -> Res<Option<String>> {
        let guild = self.get_guild_config(guild_id).await?;

        Ok(guild.as_ref().and_then(|g| g.default_repository_for(channel_id)).map(str::to_string))
    }

    /// Sets the default repository at channel level when a channel is given, else at guild level.
    pub async fn set_default_repository(&self, guild_id: &str, repository: &str, channel_id: Option<&str>) -> Res<GuildConfig> {
        let default_repository = Patch::Set(repository.to_string());

        match channel_id {
            Some(channel_id) => {
                self.set_channel_config(
                    guild_id,
                    channel_id,
                    ChannelConfigPatch {
                        default_repository,
                        ..Default::default()
                    },
                )
                .await
            }
            None => {
                self.set_guild_config(
                    guild_id,
                    GuildConfigPatch {
                        default_repository,
                        ..Default::default()
                    },
                )
                .await
            }
        }
    }

    /// Clears the default repository at channel level when a channel is given, else at guild level.
    pub async fn clear_default_repository(&self, guild_id: &str, channel_id: Option<&str>) -> Res<GuildConfig> {
        match channel_id {
            Some(channel_id) => {
                self.set_channel_config(
                    guild_id,
                    channel_id,
                    ChannelConfigPatch {
                        default_repository: Patch::Clear,
                        ..Default::default()
                    },
                )
                .await
            }
            None => {
                self.set_guild_config(
                    guild_id,
                    GuildConfigPatch {
                        default_repository: Patch::Clear,
                        ..Default::default()
                    },
                )
                .await
            }
        }
    }

    /// Records that the GitHub app has been installed for the guild.
    pub async fn mark_installed(&self, guild_id: &str) -> Res<GuildConfig> {
        self.set_guild_config(
            guild_id,
            GuildConfigPatch {
                github_app_installed: Some(true),
                ..Default::default()
            },
        )
        .await
    }
}
