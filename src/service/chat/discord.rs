//! Discord delivery for ptal-bot.
//!
//! Edits previously posted PTAL messages through the Discord REST API. The bot token
//! route is tried first; when the bot cannot see the channel and an application ID is
//! configured, the interaction webhook that originally posted the message is used.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use serde_with::skip_serializing_none;
use tracing::{info, instrument, warn};

use crate::base::{
    config::Config,
    types::{RenderedMessage, Res, Void},
};

use super::{ChatClient, DeliveryError, GenericChatClient};

/// Upper bound for a single edit request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

// Extra methods on `ChatClient` applied by the discord implementation.

impl ChatClient {
    /// Creates a new Discord chat client.
    pub fn discord(config: &Config) -> Res<Self> {
        let client = DiscordChatClient::new(config)?;
        Ok(Self::new(Arc::new(client)))
    }
}

// Structs.

/// Body of a message edit.
#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct EditMessageBody<'a> {
    content: Option<&'a str>,
    embeds: &'a [Value],
    components: &'a [Value],
}

impl<'a> From<&'a RenderedMessage> for EditMessageBody<'a> {
    fn from(message: &'a RenderedMessage) -> Self {
        Self {
            content: message.content.as_deref(),
            embeds: &message.embeds,
            components: &message.components,
        }
    }
}

/// Discord client implementation.
struct DiscordChatClient {
    http: reqwest::Client,
    api_url: String,
    bot_token: String,
    application_id: Option<String>,
}

impl DiscordChatClient {
    #[instrument(name = "DiscordChatClient::new", skip_all)]
    fn new(config: &Config) -> Res<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).user_agent("ptal-bot").build()?;

        Ok(Self {
            http,
            api_url: config.discord_api_url.trim_end_matches('/').to_string(),
            bot_token: config.discord_token.clone(),
            application_id: config.discord_application_id.clone(),
        })
    }

    /// Sends one edit request and classifies the outcome.
    async fn send_edit(&self, url: &str, authorization: Option<&str>, body: &EditMessageBody<'_>) -> Result<(), DeliveryError> {
        let mut request = self.http.request(Method::PATCH, url).json(body);

        if let Some(authorization) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }

        let response = request.send().await.map_err(|e| DeliveryError::Transient(e.to_string()))?;
        let status = response.status();

        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();

        Err(DeliveryError::from_status(status.as_u16(), &text))
    }
}

#[async_trait]
impl GenericChatClient for DiscordChatClient {
    #[instrument(skip(self, webhook_token, message))]
    async fn edit_message(&self, channel_id: &str, message_id: &str, webhook_token: &str, message: &RenderedMessage) -> Void {
        let body = EditMessageBody::from(message);

        let bot_url = format!("{}/channels/{}/messages/{}", self.api_url, channel_id, message_id);
        let authorization = format!("Bot {}", self.bot_token);

        let result = self.send_edit(&bot_url, Some(&authorization), &body).await;

        let result = match (result, self.application_id.as_deref()) {
            (Err(DeliveryError::Forbidden(_)), Some(application_id)) if !webhook_token.is_empty() => {
                warn!("Bot cannot edit message `{}`, falling back to the interaction webhook.", message_id);

                let webhook_url = format!("{}/webhooks/{}/{}/messages/{}", self.api_url, application_id, webhook_token, message_id);
                self.send_edit(&webhook_url, None, &body).await
            }
            (result, _) => result,
        };

        result?;

        info!("Successfully updated PTAL message `{}`.", message_id);

        Ok(())
    }
}
