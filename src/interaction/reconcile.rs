//! Keeps PTAL messages in sync with their pull requests.
//!
//! A pull request event is acknowledged immediately and the refresh runs on a tracked
//! background task. Every chat message linked to the pull request is re-rendered and
//! edited on its own; one failing message never blocks the others.

use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, error, info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{PrKey, PtalMessageMapping, Res, Void},
    },
    service::{
        chat::{self, ChatClient},
        db::DbClient,
        render::{RenderRequest, RendererClient},
    },
};

/// Bounded retry for transient delivery failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff base; attempt `n` waits `base * 2^(n-1)` plus up to `base` of jitter.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.delivery_max_attempts.max(1),
            base_delay: Duration::from_millis(config.delivery_retry_base_ms),
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before the attempt following `attempt`.
    fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.saturating_mul(1 << attempt.saturating_sub(1).min(16));
        let base_ms = self.base_delay.as_millis() as u64;
        let jitter = if base_ms == 0 { 0 } else { rand::thread_rng().gen_range(0..=base_ms) };

        exponential.saturating_add(Duration::from_millis(jitter))
    }
}

/// Per-message outcome of one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Message IDs that were edited.
    pub updated: Vec<String>,
    /// Message IDs whose render or edit failed.
    pub failed: Vec<String>,
}

/// Refreshes chat messages for pull requests.
///
/// This is trivially cloneable; clones share the same task tracker.
#[derive(Clone)]
pub struct Reconciler {
    db: DbClient,
    renderer: RendererClient,
    chat: ChatClient,
    retry: RetryPolicy,
    tasks: TaskTracker,
}

impl Reconciler {
    pub fn new(db: DbClient, renderer: RendererClient, chat: ChatClient, retry: RetryPolicy, tasks: TaskTracker) -> Self {
        Self {
            db,
            renderer,
            chat,
            retry,
            tasks,
        }
    }

    /// Schedules reconciliation on a tracked background task and returns immediately.
    #[instrument(skip(self))]
    pub fn schedule(&self, key: PrKey) -> JoinHandle<()> {
        let this = self.clone();

        self.tasks.spawn(
            async move {
                // Process the event.
                let result = this.reconcile(&key).await;

                // Log any errors.
                match result {
                    Ok(report) if report.failed.is_empty() => info!("Reconciled `{}`: {} updated.", key, report.updated.len()),
                    Ok(report) => warn!(
                        "Reconciled `{}`: {} updated, {} failed ({:?}).",
                        key,
                        report.updated.len(),
                        report.failed.len(),
                        report.failed
                    ),
                    Err(err) => error!("Error while reconciling `{}`: {:#}", key, err),
                }
            }
            .in_current_span(),
        )
    }

    /// Re-renders and edits every PTAL message stored for the pull request.
    ///
    /// Only a failure to read the index is returned as an error; per-message failures are
    /// logged and reported.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, key: &PrKey) -> Res<ReconcileReport> {
        let mappings = self.db.list_ptal_messages(key).await?;

        if mappings.is_empty() {
            info!("No PTAL messages found for `{}`.", key);
            return Ok(ReconcileReport::default());
        }

        let outcomes = join_all(mappings.iter().map(|mapping| self.update_message(mapping))).await;

        let mut report = ReconcileReport::default();

        for (mapping, outcome) in mappings.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.updated.push(mapping.message_id.clone()),
                Err(err) => {
                    error!("Failed to update message `{}`: {:#}", mapping.message_id, err);
                    report.failed.push(mapping.message_id.clone());
                }
            }
        }

        Ok(report)
    }

    /// Renders and delivers one message.
    #[instrument(skip_all, fields(channel_id = %mapping.channel_id, message_id = %mapping.message_id))]
    async fn update_message(&self, mapping: &PtalMessageMapping) -> Void {
        let message = self
            .renderer
            .render(&RenderRequest::from(mapping))
            .await
            .with_context(|| format!("failed to render `{}`", mapping.github_url))?;

        let mut attempt = 1;

        loop {
            match self.chat.edit_message(&mapping.channel_id, &mapping.message_id, &mapping.webhook_token, &message).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.retry.max_attempts && chat::is_transient(&err) => {
                    let delay = self.retry.backoff(attempt);
                    warn!("Attempt {} failed ({}), retrying in {:?}.", attempt, err, delay);

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.context(format!("delivery failed after {attempt} attempt(s)"))),
            }
        }
    }
}
