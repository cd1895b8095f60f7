use std::{collections::BTreeMap, fmt, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

// Pull request identity.

/// Identifies a pull request by owner, repository, and number.
///
/// The storage form is `owner/repo#number`. GitHub does not allow `/` or `#` in owner or
/// repository names, so two distinct pull requests never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrKey {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PrKey {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }

    /// The composite key used to address the pull request's record in the store.
    ///
    /// GitHub owner and repository names are case-insensitive, so both are lowercased.
    pub fn storage_key(&self) -> String {
        format!("{}/{}#{}", self.owner.to_lowercase(), self.repo.to_lowercase(), self.number)
    }

    /// Parses a pull request URL such as `https://github.com/acme/widgets/pull/42`.
    pub fn from_pull_request_url(url: &str) -> Res<Self> {
        let path = url.split("://").nth(1).unwrap_or(url);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            [_host, owner, repo, "pull", number, ..] => Ok(Self::new(*owner, *repo, number.parse()?)),
            _ => Err(anyhow!("`{url}` is not a pull request URL.")),
        }
    }
}

impl fmt::Display for PrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

impl FromStr for PrKey {
    type Err = Err;

    fn from_str(s: &str) -> Res<Self> {
        let (repository, number) = s.rsplit_once('#').ok_or_else(|| anyhow!("Expected `owner/repo#number`, got `{s}`."))?;
        let (owner, repo) = repository.split_once('/').ok_or_else(|| anyhow!("Expected `owner/repo#number`, got `{s}`."))?;

        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return Err(anyhow!("Expected `owner/repo#number`, got `{s}`."));
        }

        Ok(Self::new(owner, repo, number.parse()?))
    }
}

// Guild and channel configuration.

/// A tri-state field update: leave the stored value alone, replace it, or remove it.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Keep,
    Set(T),
    Clear,
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Self::Keep
    }
}

impl<T> Patch<T> {
    /// Applies the patch to an optional stored field.
    pub fn apply(self, target: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Set(value) => *target = Some(value),
            Patch::Clear => *target = None,
        }
    }
}

/// Partial update for a [`GuildConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuildConfigPatch {
    pub default_repository: Patch<String>,
    pub github_app_installed: Option<bool>,
}

/// Partial update for a [`ChannelConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelConfigPatch {
    pub default_repository: Patch<String>,
    pub features: Patch<ChannelFeatures>,
}

/// Per-server settings, materialized on first write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildConfig {
    pub guild_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_repository: Option<String>,
    #[serde(default)]
    pub github_app_installed: bool,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,
}

impl GuildConfig {
    pub fn new(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            ..Default::default()
        }
    }

    /// Shallow-merges a patch into the guild-level fields. Channels are left alone.
    pub fn apply(&mut self, patch: GuildConfigPatch) {
        patch.default_repository.apply(&mut self.default_repository);

        if let Some(installed) = patch.github_app_installed {
            self.github_app_installed = installed;
        }
    }

    /// Shallow-merges a patch into a single channel, creating the entry if needed.
    pub fn apply_channel(&mut self, channel_id: &str, patch: ChannelConfigPatch) {
        let channel = self.channels.entry(channel_id.to_string()).or_default();

        patch.default_repository.apply(&mut channel.default_repository);
        patch.features.apply(&mut channel.features);
    }

    /// Resolves the effective default repository: the channel's own setting, then the guild's.
    pub fn default_repository_for(&self, channel_id: Option<&str>) -> Option<&str> {
        channel_id
            .and_then(|id| self.channels.get(id))
            .and_then(|channel| channel.default_repository.as_deref())
            .or(self.default_repository.as_deref())
    }
}

/// Per-channel overrides nested under a [`GuildConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<ChannelFeatures>,
}

/// Current layout version of [`ChannelFeatures`].
pub const CHANNEL_FEATURES_SCHEMA_VERSION: u32 = 1;

/// Versioned map of feature name to feature data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFeatures {
    pub schema_version: u32,
    #[serde(default)]
    pub entries: BTreeMap<String, ChannelFeature>,
}

impl Default for ChannelFeatures {
    fn default() -> Self {
        Self {
            schema_version: CHANNEL_FEATURES_SCHEMA_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// A single feature setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelFeature {
    /// On/off switch.
    Flag(bool),
    /// Feature-specific payload.
    Data(Value),
}

// PTAL messages.

/// One posted chat message that represents a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtalMessageMapping {
    pub channel_id: String,
    pub message_id: String,
    /// Credential used to edit the message.
    pub webhook_token: String,
    /// Canonical pull request URL.
    pub github_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_urls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

impl PtalMessageMapping {
    /// Two mappings address the same chat message when channel and message ids match.
    pub fn same_message(&self, other: &Self) -> bool {
        self.channel_id == other.channel_id && self.message_id == other.message_id
    }
}

/// Message body produced by a renderer and pushed to the chat platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub content: Option<String>,
    pub embeds: Vec<Value>,
    pub components: Vec<Value>,
}

// Tests.
