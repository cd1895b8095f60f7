pub mod discord;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{RenderedMessage, Void};

// Errors.

/// Classified failure of a single message edit.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Worth another attempt: rate limits, server errors, network trouble.
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// The credential was rejected or has expired.
    #[error("delivery forbidden: {0}")]
    Forbidden(String),
    /// Retrying cannot help, e.g. the message was deleted.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    /// Classifies an HTTP failure status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {status}: {body}");

        match status {
            408 | 429 | 500..=599 => Self::Transient(detail),
            401 | 403 => Self::Forbidden(detail),
            _ => Self::Permanent(detail),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Whether an error returned by a chat client is worth retrying.
///
/// Errors that were not classified as a [`DeliveryError`] are treated as permanent.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.downcast_ref::<DeliveryError>().is_some_and(DeliveryError::is_transient)
}

// Traits.

/// Generic "chat" trait that clients must implement.
///
/// This is the delivery side of reconciliation: it edits a previously posted message
/// in place. Implementations should return a [`DeliveryError`] so callers can decide
/// whether to retry.
#[async_trait]
pub trait GenericChatClient: Send + Sync + 'static {
    /// Replace the content, embeds, and components of an existing message.
    ///
    /// `webhook_token` is the credential stored with the message when it was posted.
    async fn edit_message(&self, channel_id: &str, message_id: &str, webhook_token: &str, message: &RenderedMessage) -> Void;
}

// Structs.

/// Chat client for the application.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<dyn GenericChatClient>,
}

impl Deref for ChatClient {
    type Target = dyn GenericChatClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl ChatClient {
    pub fn new(inner: Arc<dyn GenericChatClient>) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(DeliveryError::from_status(429, "slow down").is_transient());
        assert!(DeliveryError::from_status(502, "").is_transient());
        assert!(!DeliveryError::from_status(404, "Unknown Message").is_transient());
        assert!(matches!(DeliveryError::from_status(403, ""), DeliveryError::Forbidden(_)));
        assert!(!DeliveryError::from_status(401, "").is_transient());
    }

    #[test]
    fn test_unclassified_errors_are_permanent() {
        assert!(!is_transient(&anyhow::anyhow!("boom")));
        assert!(is_transient(&DeliveryError::Transient("reset".to_string()).into()));
    }
}
