//! Parsing of GitHub pull request webhook payloads.

use serde::Deserialize;

use crate::base::types::PrKey;

/// Header naming the GitHub event category.
pub const EVENT_HEADER: &str = "x-github-event";

/// Event categories that trigger reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PullRequest,
    PullRequestReview,
}

impl EventKind {
    /// Maps the `x-github-event` header to a recognized kind; anything else is ignored.
    pub fn from_header(value: &str) -> Option<Self> {
        match value {
            "pull_request" => Some(Self::PullRequest),
            "pull_request_review" => Some(Self::PullRequestReview),
            _ => None,
        }
    }
}

/// Payload that could not be turned into a [`PullRequestEvent`].
#[derive(Debug, thiserror::Error)]
pub enum MalformedEvent {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload is missing `{0}`")]
    MissingField(&'static str),
}

/// A verified pull request change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestEvent {
    pub kind: EventKind,
    pub action: Option<String>,
    pub key: PrKey,
}

// Wire shape. Every field is optional so missing data is reported by name.

#[derive(Debug, Deserialize)]
struct Payload {
    action: Option<String>,
    repository: Option<Repository>,
    pull_request: Option<PullRequest>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: Option<String>,
    owner: Option<Owner>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: Option<u64>,
}

fn non_empty(value: Option<String>, field: &'static str) -> Result<String, MalformedEvent> {
    value.filter(|v| !v.is_empty()).ok_or(MalformedEvent::MissingField(field))
}

impl PullRequestEvent {
    /// Extracts the pull request identity from a raw payload.
    pub fn parse(kind: EventKind, body: &[u8]) -> Result<Self, MalformedEvent> {
        let payload: Payload = serde_json::from_slice(body)?;

        let repository = payload.repository.ok_or(MalformedEvent::MissingField("repository"))?;
        let owner = non_empty(repository.owner.and_then(|o| o.login), "repository.owner.login")?;
        let repo = non_empty(repository.name, "repository.name")?;
        let number = payload
            .pull_request
            .and_then(|pr| pr.number)
            .ok_or(MalformedEvent::MissingField("pull_request.number"))?;

        Ok(Self {
            kind,
            action: payload.action,
            key: PrKey::new(owner, repo, number),
        })
    }
}
