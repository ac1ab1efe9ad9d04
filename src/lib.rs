//! # records-dl
//!
//! Backend library for harvesting tabular judgment records from paginated,
//! form-driven public records sites into one consolidated export.
//!
//! ## Design Philosophy
//!
//! records-dl is designed to be:
//! - **Crash-tolerant** - accepted records are spooled in batches; a failed
//!   merge degrades to a fallback dump instead of losing the run
//! - **Bounded** - memory is capped by the flush threshold regardless of
//!   result volume, pagination is capped per task
//! - **Library-first** - no CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use records_dl::{Config, Harvester, config::ScopeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         scope: ScopeConfig {
//!             categories: vec!["CRM-M".to_string()],
//!             from_date: "2024-01-01".parse()?,
//!             to_date: "2024-03-01".parse()?,
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     };
//!
//!     let harvester = Harvester::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = harvester.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = harvester.run().await?;
//!     println!("Outcome: {:?}", report.outcome);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Batched export sink, batch spool, and artifact writers
pub mod export;
/// Core harvester implementation (decomposed into focused submodules)
pub mod harvester;
/// HTML parsing of result pages
pub mod parse;
/// Retry logic with exponential backoff
pub mod retry;
/// HTTP transport for the site's search form
pub mod transport;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, RetryConfig, ScopeConfig, SiteConfig};
pub use error::{Error, Result, StorageError, TransportError};
pub use export::{ArtifactWriter, BatchHandle, BatchStore, CsvArtifactWriter, JsonBatchStore};
pub use harvester::Harvester;
pub use parse::PageParser;
pub use transport::{HttpPageFetcher, PageFetcher};
pub use types::{
    DateWindow, Event, ExportSummary, FilterStats, QueryTask, Record, RunOutcome, RunReport,
    TaskId, TaskReport,
};

/// Helper function to run the harvester with graceful signal handling.
///
/// Spawns the run, waits for a termination signal, and on receiving one
/// requests cancellation so the run finalizes with whatever has been
/// harvested so far.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use records_dl::{Config, Harvester, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let harvester = Harvester::new(Config::default()).await?;
///     let report = run_with_shutdown(harvester).await?;
///     println!("{:?}", report.outcome);
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(harvester: Harvester) -> Result<RunReport> {
    let runner = harvester.clone();
    let mut run_task = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        result = &mut run_task => {
            return result.map_err(|e| Error::Other(format!("run task panicked: {e}")))?;
        }
        _ = wait_for_signal() => {
            harvester.cancel();
        }
    }

    run_task
        .await
        .map_err(|e| Error::Other(format!("run task panicked: {e}")))?
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
