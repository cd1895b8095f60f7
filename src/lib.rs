//! Library root for `ptal-bot`.
//!
//! Ptal-bot keeps Discord "please take a look" messages in sync with the GitHub pull
//! requests they announce:
//! - Stores per-server and per-channel settings such as the default repository
//! - Indexes which chat messages represent which pull request
//! - Verifies GitHub webhooks and refreshes every linked message when a pull request changes
//!
//! The bot integrates with GitHub for pull request state, SurrealDB for storage, and
//! Discord for delivery. Each integration sits behind a trait so it can be swapped or mocked.

pub mod base;
pub mod interaction;
pub mod runtime;
pub mod service;
pub mod web;

use anyhow::bail;
use base::{
    config::Config,
    types::{PrKey, Res, Void},
};
use rustls::crypto;
use service::db::DbClient;
use tracing::{info, warn};

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the ptal-bot runtime:
/// - Initializes the crypto provider
/// - Creates the runtime context with database, renderer, and chat clients
/// - Serves webhooks until shutdown, then drains background work
pub async fn start(config: Config) -> Void {
    info!("Starting ptal-bot ...");

    // Start the crypto provider.
    if crypto::ring::default_provider().install_default().is_err() {
        warn!("A crypto provider was already installed.");
    }

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config).await?;

    // Start the runtime.
    runtime.start().await?;

    Ok(())
}

/// Connects to the store shared with the running server.
///
/// An in-memory endpoint is refused: it would open an empty database that no server sees.
async fn admin_db(config: &Config) -> Res<DbClient> {
    if config.is_ephemeral_db() {
        bail!("`{}` is an in-memory database; administrative commands need the server's persistent endpoint.", config.db_endpoint);
    }

    DbClient::surreal(config).await
}

/// Removes all stored configuration for a guild.
pub async fn clear_guild(config: Config, guild_id: &str) -> Void {
    let db = admin_db(&config).await?;
    db.delete_guild_config(guild_id).await?;

    info!("Cleared configuration for guild `{}`.", guild_id);

    Ok(())
}

/// Retracts every PTAL message mapping for a pull request.
pub async fn forget_pull_request(config: Config, key: &PrKey) -> Void {
    let db = admin_db(&config).await?;
    db.remove_ptal_messages(key).await?;

    info!("Forgot PTAL messages for `{}`.", key);

    Ok(())
}
