//! Runtime services and shared state for the ptal-bot.

use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{Res, Void},
    },
    interaction::reconcile::{Reconciler, RetryPolicy},
    service::{chat::ChatClient, db::DbClient, render::RendererClient},
    web::{self, AppState},
};

/// Runtime service context that can be shared across the application.
///
/// This struct holds the database, renderer, and chat clients, the configuration, and
/// the tracker for background reconciliation. It is designed to be trivially cloneable,
/// allowing it to be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The database client instance.
    pub db: DbClient,
    /// The renderer client instance.
    pub renderer: RendererClient,
    /// The chat client instance.
    pub chat: ChatClient,
    /// Background reconciliation tasks.
    pub tasks: TaskTracker,
}

impl Runtime {
    /// Create a new runtime instance.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Initialize the database.
        if config.is_ephemeral_db() {
            warn!("Database `{}` is in-memory; settings and PTAL mappings are lost on exit.", config.db_endpoint);
        }

        let db = DbClient::surreal(&config).await?;

        // Initialize the renderer.
        let renderer = RendererClient::github(&config)?;

        // Initialize the chat client.
        let chat = ChatClient::discord(&config)?;

        Ok(Self {
            config,
            db,
            renderer,
            chat,
            tasks: TaskTracker::new(),
        })
    }

    /// Builds a reconciler that shares this runtime's clients and task tracker.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.db.clone(),
            self.renderer.clone(),
            self.chat.clone(),
            RetryPolicy::from_config(&self.config),
            self.tasks.clone(),
        )
    }

    /// Builds the HTTP router for this runtime.
    pub fn router(&self) -> axum::Router {
        web::router(AppState {
            config: self.config.clone(),
            reconciler: self.reconciler(),
        })
    }

    /// Serves webhooks until a shutdown signal, then waits for in-flight reconciliation.
    pub async fn start(&self) -> Void {
        let listener = TcpListener::bind(&self.config.listen_address).await?;
        info!("Listening on {}.", self.config.listen_address);

        axum::serve(listener, self.router()).with_graceful_shutdown(shutdown_signal()).await?;

        self.drain().await;

        Ok(())
    }

    /// Closes the task tracker and waits for running reconciliations to finish.
    pub async fn drain(&self) {
        info!("Waiting for {} background task(s) ...", self.tasks.len());

        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// Resolves on Ctrl-C, or on SIGTERM where available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down."),
        _ = terminate => info!("Received SIGTERM, shutting down."),
    }
}
