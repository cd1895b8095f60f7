//! Binary entry point for `ptal-bot`.
//!
//! This module provides the command-line interface for ptal-bot with options
//! for configuration file paths and logging verbosity. It initializes the
//! necessary components and starts the service or runs an administrative command.

use clap::{Parser, Subcommand};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use ptal_bot::base::{
    config::Config,
    types::{PrKey, Void},
};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// Ptal-bot – keeps Discord PTAL messages in sync with GitHub pull requests.
///
/// Configuration can come from `config.toml` or environment variables.
/// The bot listens for GitHub webhooks and refreshes every chat message
/// that announces the affected pull request.
#[derive(Parser, Debug)]
#[command(version, author, about, long_about = None)]
struct Args {
    /// Override the config file path (optional).
    ///
    /// By default, the bot will look for a config file at `.hidden/config.toml`
    /// in the current directory.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
    /// Increase log verbosity (-v, -vv, etc.).
    ///
    /// Use multiple times to increase verbosity:
    /// - No flag: INFO level
    /// - -v: DEBUG level
    /// - -vv or more: TRACE level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// What to run; defaults to `serve`.
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve GitHub webhooks (default).
    Serve,
    /// Remove all stored configuration for a guild.
    ClearGuild {
        /// The guild ID.
        guild_id: String,
    },
    /// Retract all PTAL message mappings for a pull request.
    ForgetPr {
        /// The pull request, as `owner/repo#number`.
        pull_request: PrKey,
    },
}

/// Main entry point for the ptal-bot binary.
///
/// Sets up logging based on verbosity, loads configuration, and runs the command.
#[tokio::main]
async fn main() -> Void {
    let args = Args::parse();

    // Construct the level filter.

    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let level_filter = tracing_subscriber::filter::LevelFilter::from_level(level);

    // Prepare the log layer.

    let stdout = tracing_subscriber::fmt::layer()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_file(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    // Prepare the otlp layer.

    let exporter = opentelemetry_otlp::SpanExporter::builder().with_http().with_protocol(Protocol::HttpBinary).build()?;
    let tracer = opentelemetry_sdk::trace::SdkTracerProvider::builder().with_simple_exporter(exporter).build().tracer("ptal-bot");
    let otel = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry().with(otel).with(level_filter).with(stdout).init();

    let config = Config::load(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => ptal_bot::start(config).await,
        Command::ClearGuild { guild_id } => ptal_bot::clear_guild(config, &guild_id).await,
        Command::ForgetPr { pull_request } => ptal_bot::forget_pull_request(config, &pull_request).await,
    }
}
