//! Core harvester implementation split into focused submodules.
//!
//! The `Harvester` struct and the run orchestration live here; the moving
//! parts are organized by domain:
//! - [`partition`] - scope partitioning into query tasks
//! - [`walker`] - per-task pagination state machine
//! - [`extract`] - parsed rows to keyed records
//! - [`filter`] - per-run deduplication and validation

mod extract;
mod filter;
mod partition;
mod walker;


use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::export::{BatchStore, CsvArtifactWriter, ExportSink, FinalizeResult, JsonBatchStore};
use crate::parse::PageParser;
use crate::transport::{HttpPageFetcher, PageFetcher};
use crate::types::{Event, RunOutcome, RunReport, TaskReport};

use filter::ValidationFilter;
use walker::{RecordPipeline, WalkerContext, walk_task};

/// Main harvester instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Harvester {
    /// Configuration (wrapped in Arc for sharing across tasks)
    config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Page fetcher (trait object for pluggable transports)
    fetcher: Arc<dyn PageFetcher>,
    /// Compiled parser for the site's results markup
    parser: Arc<PageParser>,
    /// Intermediate batch storage (trait object for pluggable spools)
    store: Arc<dyn BatchStore>,
    /// Run-level cancellation signal
    cancel_token: CancellationToken,
}

impl Harvester {
    /// Create a new Harvester instance
    ///
    /// This validates the configuration, creates the output and spool
    /// directories, compiles the site selectors, and sets up the HTTP
    /// client and the event broadcast channel.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.export.output_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create output directory '{}': {}",
                        config.export.output_dir.display(),
                        e
                    ),
                ))
            })?;
        tokio::fs::create_dir_all(&config.export.spool_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create spool directory '{}': {}",
                        config.export.spool_dir.display(),
                        e
                    ),
                ))
            })?;

        let fetcher = Arc::new(HttpPageFetcher::new(&config.site, &config.crawl)?);
        let parser = Arc::new(PageParser::new(&config.site)?);
        let store = Arc::new(JsonBatchStore::new(config.export.spool_dir.clone()));

        // Broadcast channel with buffer size of 1000 events; subscribers
        // that fall further behind receive a Lagged error, not backpressure
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        Ok(Self {
            config: Arc::new(config),
            event_tx,
            fetcher,
            parser,
            store,
            cancel_token: CancellationToken::new(),
        })
    }

    /// Subscribe to harvest events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all
    /// events independently; if nobody subscribes, events are dropped.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Request cancellation of the running harvest
    ///
    /// No new fetches are issued after this; in-flight tasks wind down and
    /// the run proceeds directly to finalization with whatever has been
    /// buffered and spooled. No task is left half-written to the spool.
    pub fn cancel(&self) {
        tracing::info!("Cancellation requested");
        self.cancel_token.cancel();
    }

    /// Drive one full harvest run: plan tasks, walk them concurrently,
    /// finalize the export.
    ///
    /// Task-local failures are reported in the returned [`RunReport`] and
    /// never abort the run; only a failed finalization yields
    /// [`RunOutcome::Failure`]. The run always terminates with an artifact
    /// or an explicit failure outcome.
    pub async fn run(&self) -> Result<RunReport> {
        if self.cancel_token.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let tasks = partition::plan_tasks(&self.config.scope);
        tracing::info!(
            tasks = tasks.len(),
            categories = self.config.scope.categories.len(),
            from = %self.config.scope.from_date,
            to = %self.config.scope.to_date,
            "Planned query tasks"
        );
        self.event_tx
            .send(Event::RunStarted { tasks: tasks.len() })
            .ok();

        let pipeline = Arc::new(tokio::sync::Mutex::new(RecordPipeline {
            filter: ValidationFilter::new(&self.config.validation),
            sink: ExportSink::new(
                self.config.export.flush_threshold,
                Arc::clone(&self.store),
                self.event_tx.clone(),
            ),
        }));

        let ctx = WalkerContext {
            fetcher: Arc::clone(&self.fetcher),
            parser: Arc::clone(&self.parser),
            retry: self.config.retry.clone(),
            max_pages: self.config.crawl.max_pages_per_task,
            cancel_token: self.cancel_token.clone(),
            event_tx: self.event_tx.clone(),
            pipeline: Arc::clone(&pipeline),
        };

        let mut reports: Vec<TaskReport> = stream::iter(tasks)
            .map(|task| walk_task(&ctx, task))
            .buffer_unordered(self.config.crawl.max_concurrent_tasks)
            .collect()
            .await;
        reports.sort_by_key(|r| r.id);

        // All walkers have finished; reclaim the pipeline for finalization
        drop(ctx);
        let RecordPipeline { filter, sink } = Arc::try_unwrap(pipeline)
            .map_err(|_| {
                Error::Other("record pipeline still shared after all tasks finished".to_string())
            })?
            .into_inner();
        let stats = filter.stats();

        let writer = CsvArtifactWriter::new(
            self.config.export.output_dir.clone(),
            self.config.export.artifact_stem.clone(),
            self.config.validation.dedup_fields.clone(),
        );

        let (outcome, artifact, summary) = match sink.finalize(&writer).await {
            Ok(FinalizeResult::Exported { path, summary }) => {
                (RunOutcome::Success, Some(path), Some(summary))
            }
            Ok(FinalizeResult::FellBack { path, records }) => {
                tracing::warn!(records = records, "Run degraded to the fallback artifact");
                (RunOutcome::PartialSuccess, Some(path), None)
            }
            Err(e) => {
                tracing::error!(error = %e, "Finalization failed, no artifact produced");
                (RunOutcome::Failure, None, None)
            }
        };

        let failed_tasks = reports.iter().filter(|r| !r.succeeded()).count();
        tracing::info!(
            outcome = ?outcome,
            total = stats.total,
            valid = stats.valid,
            invalid = stats.invalid,
            duplicate = stats.duplicate,
            failed_tasks = failed_tasks,
            "Harvest run finished"
        );
        self.event_tx.send(Event::RunFinished { outcome }).ok();

        Ok(RunReport {
            outcome,
            artifact,
            summary,
            stats,
            tasks: reports,
        })
    }
}
