//! procaudit - public procurement ingestion and AI risk-audit pipeline.
//!
//! A tool for acquiring public procurement records, preparing their attached
//! documents for generative-AI auditing, and persisting structured risk
//! verdicts.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if procaudit::cli::is_verbose() {
        "procaudit=info"
    } else {
        "procaudit=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Run CLI
    procaudit::cli::run().await
}
