//! SurrealDB implementation for ptal-bot data storage.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::{
    Surreal,
    engine::any::{self, Any},
    opt::auth::Root,
};
use tracing::{debug, info, instrument};

use crate::base::{
    config::Config,
    types::{ChannelConfig, ChannelConfigPatch, GuildConfig, GuildConfigPatch, PrKey, PtalMessageMapping, Res, Void},
};

use super::{DbClient, GenericDbClient, locks::KeyedLocks};

// Tables.

const GUILD_TABLE: &str = "guild";
const PR_MESSAGE_TABLE: &str = "pr_message";

// Extra methods on `DbClient` applied by the surreal implementation.

impl DbClient {
    /// Connects to the SurrealDB instance named by the configuration.
    pub async fn surreal(config: &Config) -> Res<Self> {
        let credentials = config.db_username.as_deref().zip(config.db_password.as_deref());
        let client = SurrealDbClient::new(&config.db_endpoint, credentials, &config.db_namespace, &config.db_database).await?;

        Ok(Self::new(Arc::new(client)))
    }

    /// Creates a client backed by a fresh in-memory database.
    pub async fn surreal_memory() -> Res<Self> {
        let client = SurrealDbClient::new("mem://", None, "ptal", "bot").await?;

        Ok(Self::new(Arc::new(client)))
    }
}

// Records.

/// Stored collection of PTAL messages for one pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PrMessageRecord {
    owner: String,
    repo: String,
    number: u64,
    #[serde(default)]
    mappings: Vec<PtalMessageMapping>,
}

impl PrMessageRecord {
    fn new(key: &PrKey) -> Self {
        Self {
            owner: key.owner.clone(),
            repo: key.repo.clone(),
            number: key.number,
            mappings: Vec::new(),
        }
    }

    /// Inserts the mapping, replacing any entry that addresses the same message.
    fn upsert(&mut self, mapping: &PtalMessageMapping) {
        match self.mappings.iter_mut().find(|m| m.same_message(mapping)) {
            Some(existing) => *existing = mapping.clone(),
            None => self.mappings.push(mapping.clone()),
        }
    }
}

// Client.

/// SurrealDB client.
///
/// Writes are read-modify-write cycles guarded by a per-record lock, so concurrent
/// writers of the same guild or pull request are applied one at a time.
pub struct SurrealDbClient {
    db: Surreal<Any>,
    locks: KeyedLocks,
}

impl SurrealDbClient {
    #[instrument(name = "SurrealDbClient::new", skip(credentials))]
    pub async fn new(endpoint: &str, credentials: Option<(&str, &str)>, namespace: &str, database: &str) -> Res<Self> {
        let db = any::connect(endpoint).await?;

        // Authenticate when connecting to a remote server.
        if let Some((username, password)) = credentials {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        // Define schemas.

        db.query(format!("DEFINE TABLE IF NOT EXISTS {GUILD_TABLE} SCHEMALESS;"))
            .query(format!("DEFINE TABLE IF NOT EXISTS {PR_MESSAGE_TABLE} SCHEMALESS;"))
            .await?
            .check()?;

        info!("Database initialized successfully.");

        Ok(Self {
            db,
            locks: KeyedLocks::default(),
        })
    }

    async fn write_guild(&self, guild: GuildConfig) -> Res<GuildConfig> {
        let id = guild.guild_id.clone();
        let written: Option<GuildConfig> = self.db.upsert((GUILD_TABLE, id.as_str())).content(guild).await?;

        written.ok_or_else(|| anyhow!("Guild `{id}` was not written."))
    }

    async fn read_pr_record(&self, key: &PrKey) -> Res<Option<PrMessageRecord>> {
        Ok(self.db.select((PR_MESSAGE_TABLE, key.storage_key())).await?)
    }
}

#[async_trait]
impl GenericDbClient for SurrealDbClient {
    #[instrument(skip(self))]
    async fn get_guild_config(&self, guild_id: &str) -> Res<Option<GuildConfig>> {
        Ok(self.db.select((GUILD_TABLE, guild_id)).await?)
    }

    #[instrument(skip(self))]
    async fn set_guild_config(&self, guild_id: &str, patch: GuildConfigPatch) -> Res<GuildConfig> {
        let _guard = self.locks.lock(&format!("{GUILD_TABLE}:{guild_id}")).await;

        let mut guild = self.get_guild_config(guild_id).await?.unwrap_or_else(|| GuildConfig::new(guild_id));
        guild.apply(patch);

        self.write_guild(guild).await
    }

    #[instrument(skip(self))]
    async fn get_channel_config(&self, guild_id: &str, channel_id: &str) -> Res<Option<ChannelConfig>> {
        let guild = self.get_guild_config(guild_id).await?;

        Ok(guild.and_then(|mut g| g.channels.remove(channel_id)))
    }

    #[instrument(skip(self))]
    async fn set_channel_config(&self, guild_id: &str, channel_id: &str, patch: ChannelConfigPatch) -> Res<GuildConfig> {
        let _guard = self.locks.lock(&format!("{GUILD_TABLE}:{guild_id}")).await;

        let mut guild = self.get_guild_config(guild_id).await?.unwrap_or_else(|| GuildConfig::new(guild_id));
        guild.apply_channel(channel_id, patch);

        self.write_guild(guild).await
    }

    #[instrument(skip(self))]
    async fn delete_guild_config(&self, guild_id: &str) -> Void {
        let _guard = self.locks.lock(&format!("{GUILD_TABLE}:{guild_id}")).await;

        let deleted: Option<GuildConfig> = self.db.delete((GUILD_TABLE, guild_id)).await?;
        debug!("Guild `{}` deleted: {}.", guild_id, deleted.is_some());

        Ok(())
    }

    #[instrument(skip(self, mapping), fields(message_id = %mapping.message_id))]
    async fn store_ptal_message(&self, key: &PrKey, mapping: &PtalMessageMapping) -> Void {
        let storage_key = key.storage_key();
        let _guard = self.locks.lock(&format!("{PR_MESSAGE_TABLE}:{storage_key}")).await;

        let mut record = self.read_pr_record(key).await?.unwrap_or_else(|| PrMessageRecord::new(key));
        record.upsert(mapping);

        let written: Option<PrMessageRecord> = self.db.upsert((PR_MESSAGE_TABLE, storage_key)).content(record).await?;
        written.ok_or_else(|| anyhow!("PTAL messages for `{key}` were not written."))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_ptal_messages(&self, key: &PrKey) -> Res<Vec<PtalMessageMapping>> {
        Ok(self.read_pr_record(key).await?.map(|r| r.mappings).unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn remove_ptal_messages(&self, key: &PrKey) -> Void {
        let storage_key = key.storage_key();
        let _guard = self.locks.lock(&format!("{PR_MESSAGE_TABLE}:{storage_key}")).await;

        let removed: Option<PrMessageRecord> = self.db.delete((PR_MESSAGE_TABLE, storage_key)).await?;
        debug!("PTAL messages for `{}` removed: {}.", key, removed.is_some());

        Ok(())
    }
}
