pub mod github;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{PtalMessageMapping, RenderedMessage, Res};

// Types.

/// Everything a renderer needs to rebuild a PTAL message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderRequest {
    pub github_url: String,
    pub deployment_url: Option<String>,
    pub other_urls: Vec<String>,
    pub emoji: Option<String>,
}

impl From<&PtalMessageMapping> for RenderRequest {
    fn from(mapping: &PtalMessageMapping) -> Self {
        Self {
            github_url: mapping.github_url.clone(),
            deployment_url: mapping.deployment_url.clone(),
            other_urls: mapping.other_urls.clone().unwrap_or_default(),
            emoji: mapping.emoji.clone(),
        }
    }
}

// Traits.

/// Generic renderer trait that clients must implement.
///
/// A renderer turns the current upstream state of a pull request into the content,
/// embeds, and components of a chat message.
#[async_trait]
pub trait GenericRenderer: Send + Sync + 'static {
    /// Render a fresh message for the pull request.
    async fn render(&self, request: &RenderRequest) -> Res<RenderedMessage>;
}

// Structs.

/// Renderer client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct RendererClient {
    inner: Arc<dyn GenericRenderer>,
}

impl Deref for RendererClient {
    type Target = dyn GenericRenderer;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl RendererClient {
    pub fn new(inner: Arc<dyn GenericRenderer>) -> Self {
        Self { inner }
    }
}
