//! logwatch - terminal client for the activity log feed
//!
//! Polls the server every 7 seconds and prints a one-shot notification for
//! every activity log entry it has not shown before. Ctrl-C tears the feed
//! down; an in-flight poll is simply dropped with it.

use std::env;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use netwatch_server::feed::{
    FeedConfig, HttpLogSource, LogEntry, LogFeed, Notifier, DEFAULT_POLL_INTERVAL,
};
use netwatch_server::models::LogLevel;

/// Prints notifications to the terminal
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&mut self, entry: &LogEntry) {
        let marker = match entry.level {
            LogLevel::Info => "[info]",
            LogLevel::Warning => "[warn]",
            LogLevel::Critical => "[crit]",
        };
        println!(
            "{} {} {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            marker,
            entry.message
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "logwatch=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = FeedConfig {
        server_url: env::var("NETWATCH_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string()),
        token: env::var("NETWATCH_TOKEN").unwrap_or_default(),
        timeout_seconds: 30,
    };

    tracing::info!("Watching activity logs at {}", config.server_url);

    let source = HttpLogSource::new(config)?;
    let feed = LogFeed::new();

    tokio::select! {
        _ = feed.run(source, ConsoleNotifier, DEFAULT_POLL_INTERVAL) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("logwatch stopped");
        }
    }

    Ok(())
}
