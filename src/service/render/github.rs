//! GitHub-backed PTAL renderer.
//!
//! Fetches the pull request and its reviews from the GitHub REST API and builds a
//! Discord embed with link buttons.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::base::{
    config::Config,
    types::{PrKey, RenderedMessage, Res},
};

use super::{GenericRenderer, RenderRequest, RendererClient};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Discord allows at most five buttons in one action row.
const MAX_BUTTONS: usize = 5;

const COLOR_OPEN: u32 = 0x238636;
const COLOR_DRAFT: u32 = 0x6e7681;
const COLOR_MERGED: u32 = 0x8957e5;
const COLOR_CLOSED: u32 = 0xda3633;

// Extra methods on `RendererClient` applied by the github implementation.

impl RendererClient {
    /// Creates a new GitHub renderer.
    pub fn github(config: &Config) -> Res<Self> {
        let renderer = GithubRenderer::new(config)?;
        Ok(Self::new(Arc::new(renderer)))
    }
}

// API types.

#[derive(Debug, Clone, Deserialize)]
struct GithubUser {
    login: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GithubPullRequest {
    title: String,
    html_url: String,
    state: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    merged: bool,
    user: GithubUser,
    #[serde(default)]
    additions: Option<u64>,
    #[serde(default)]
    deletions: Option<u64>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
struct GithubReview {
    user: Option<GithubUser>,
    state: String,
}

/// Display state of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrStatus {
    Open,
    Draft,
    Merged,
    Closed,
}

impl PrStatus {
    fn of(pr: &GithubPullRequest) -> Self {
        match (pr.state.as_str(), pr.merged, pr.draft) {
            (_, true, _) => Self::Merged,
            ("closed", false, _) => Self::Closed,
            (_, false, true) => Self::Draft,
            _ => Self::Open,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Open => "🟢 Open",
            Self::Draft => "📝 Draft",
            Self::Merged => "🟣 Merged",
            Self::Closed => "🔴 Closed",
        }
    }

    fn color(self) -> u32 {
        match self {
            Self::Open => COLOR_OPEN,
            Self::Draft => COLOR_DRAFT,
            Self::Merged => COLOR_MERGED,
            Self::Closed => COLOR_CLOSED,
        }
    }
}

// Renderer.

struct GithubRenderer {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl GithubRenderer {
    #[instrument(name = "GithubRenderer::new", skip_all)]
    fn new(config: &Config) -> Res<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).user_agent("ptal-bot").build()?;

        Ok(Self {
            http,
            api_url: config.github_api_url.trim_end_matches('/').to_string(),
            token: config.github_token.clone(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Res<T> {
        let mut request = self
            .http
            .get(format!("{}{}", self.api_url, path))
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;

        Ok(response.json().await?)
    }
}

#[async_trait]
impl GenericRenderer for GithubRenderer {
    #[instrument(skip(self))]
    async fn render(&self, request: &RenderRequest) -> Res<RenderedMessage> {
        let key = PrKey::from_pull_request_url(&request.github_url)?;
        let base = format!("/repos/{}/{}/pulls/{}", key.owner, key.repo, key.number);

        let pr: GithubPullRequest = self.get(&base).await?;
        let reviews: Vec<GithubReview> = self.get(&format!("{base}/reviews?per_page=100")).await?;

        debug!("Fetched `{}` with {} reviews.", key, reviews.len());

        Ok(build_message(&key, &pr, &reviews, request))
    }
}

// Helpers.

/// Keeps the latest decisive review state per reviewer.
fn latest_review_states(reviews: &[GithubReview]) -> BTreeMap<String, String> {
    let mut states = BTreeMap::new();

    for review in reviews {
        let Some(user) = &review.user else { continue };

        // Comments do not change a reviewer's verdict.
        if review.state == "COMMENTED" || review.state == "PENDING" {
            continue;
        }

        states.insert(user.login.clone(), review.state.clone());
    }

    states
}

fn reviewers_with(states: &BTreeMap<String, String>, state: &str) -> Vec<String> {
    states.iter().filter(|(_, s)| s.as_str() == state).map(|(login, _)| format!("@{login}")).collect()
}

fn link_button(label: &str, url: &str) -> Value {
    json!({ "type": 2, "style": 5, "label": label, "url": url })
}

/// Builds the PTAL message from fetched pull request state.
fn build_message(key: &PrKey, pr: &GithubPullRequest, reviews: &[GithubReview], request: &RenderRequest) -> RenderedMessage {
    let status = PrStatus::of(pr);
    let states = latest_review_states(reviews);

    let title = match &request.emoji {
        Some(emoji) => format!("{emoji} {}", pr.title),
        None => pr.title.clone(),
    };

    let mut fields = vec![json!({ "name": "Status", "value": status.label(), "inline": true })];

    if let (Some(additions), Some(deletions)) = (pr.additions, pr.deletions) {
        fields.push(json!({ "name": "Changes", "value": format!("+{additions} / -{deletions}"), "inline": true }));
    }

    let approved = reviewers_with(&states, "APPROVED");
    if !approved.is_empty() {
        fields.push(json!({ "name": "✅ Approved", "value": approved.join(", ") }));
    }

    let changes = reviewers_with(&states, "CHANGES_REQUESTED");
    if !changes.is_empty() {
        fields.push(json!({ "name": "🔁 Changes requested", "value": changes.join(", ") }));
    }

    let mut embed = json!({
        "title": title,
        "url": pr.html_url,
        "description": format!("{key} by @{}", pr.user.login),
        "color": status.color(),
        "fields": fields,
    });

    if let Some(updated_at) = pr.updated_at {
        embed["timestamp"] = Value::String(updated_at.to_rfc3339());
    }

    let mut buttons = vec![link_button("View PR", &pr.html_url)];

    if let Some(deployment_url) = &request.deployment_url {
        buttons.push(link_button("Deployment", deployment_url));
    }

    for (index, url) in request.other_urls.iter().enumerate() {
        buttons.push(link_button(&format!("Link {}", index + 1), url));
    }

    buttons.truncate(MAX_BUTTONS);

    RenderedMessage {
        content: None,
        embeds: vec![embed],
        components: vec![json!({ "type": 1, "components": buttons })],
    }
}
