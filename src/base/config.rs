//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, sync::Arc};

use serde::Deserialize;

use super::types::Res;

/// Default GitHub REST API base URL.
fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

/// Default Discord REST API base URL.
fn default_discord_api_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_db_namespace() -> String {
    "ptal".to_string()
}

fn default_db_database() -> String {
    "bot".to_string()
}

/// Default address for the webhook listener.
fn default_listen_address() -> String {
    "0.0.0.0:8787".to_string()
}

/// Default number of delivery attempts per message.
fn default_delivery_max_attempts() -> u32 {
    3
}

/// Default backoff base between delivery attempts.
fn default_delivery_retry_base_ms() -> u64 {
    500
}

/// Configuration for the ptal-bot application.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConfigInner {
    /// Shared secret used to sign GitHub webhooks (`GITHUB_WEBHOOK_SECRET`).
    pub github_webhook_secret: String,
    /// Optional GitHub token used when fetching pull requests (`GITHUB_TOKEN`).
    #[serde(default)]
    pub github_token: Option<String>,
    /// GitHub REST API base URL (`GITHUB_API_URL`).
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    /// Discord bot token (`DISCORD_TOKEN`).
    pub discord_token: String,
    /// Discord application ID, enables editing through interaction webhooks (`DISCORD_APPLICATION_ID`).
    #[serde(default)]
    pub discord_application_id: Option<String>,
    /// Discord REST API base URL (`DISCORD_API_URL`).
    #[serde(default = "default_discord_api_url")]
    pub discord_api_url: String,
    /// Database endpoint URL, e.g. `surrealkv://data/ptal` or `ws://localhost:8000` (`DB_ENDPOINT`).
    pub db_endpoint: String,
    /// Database root username (`DB_USERNAME`).
    #[serde(default)]
    pub db_username: Option<String>,
    /// Database root password (`DB_PASSWORD`).
    #[serde(default)]
    pub db_password: Option<String>,
    /// Database namespace (`DB_NAMESPACE`).
    #[serde(default = "default_db_namespace")]
    pub db_namespace: String,
    /// Database name (`DB_DATABASE`).
    #[serde(default = "default_db_database")]
    pub db_database: String,
    /// Address the webhook listener binds to (`LISTEN_ADDRESS`).
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Total attempts per chat message update, including the first (`DELIVERY_MAX_ATTEMPTS`).
    #[serde(default = "default_delivery_max_attempts")]
    pub delivery_max_attempts: u32,
    /// Backoff base in milliseconds between delivery attempts (`DELIVERY_RETRY_BASE_MS`).
    #[serde(default = "default_delivery_retry_base_ms")]
    pub delivery_retry_base_ms: u64,
}

impl Config {
    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        let mut cfg = config::Config::builder().add_source(config::Environment::default().prefix("PTAL_BOT"));

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        let result = Config {
            inner: Arc::new(cfg.build()?.try_deserialize()?),
        };

        result.validate()?;

        Ok(result)
    }

    /// Checks values that deserialize fine but cannot work at runtime.
    pub fn validate(&self) -> Res<()> {
        if self.github_webhook_secret.trim().is_empty() {
            return Err(anyhow::anyhow!("GitHub webhook secret must not be empty."));
        }

        if self.db_endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!("Database endpoint must not be empty."));
        }

        if self.discord_token.trim().is_empty() {
            return Err(anyhow::anyhow!("Discord token must not be empty."));
        }

        if self.delivery_max_attempts < 1 || self.delivery_max_attempts > 10 {
            return Err(anyhow::anyhow!("Delivery max attempts must be between 1 and 10."));
        }

        if self.db_username.is_some() != self.db_password.is_some() {
            return Err(anyhow::anyhow!("Database username and password must be set together."));
        }

        Ok(())
    }

    /// Whether the database lives only in this process and is lost on exit.
    pub fn is_ephemeral_db(&self) -> bool {
        self.db_endpoint.trim_start().starts_with("mem:")
    }
}
