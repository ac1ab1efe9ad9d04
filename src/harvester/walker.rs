//! Pagination walking — the per-task fetch/extract/decide state machine.
//!
//! The original interaction with the site is a chain of form submissions,
//! each page handler discovering the next page. Here that chain is an
//! explicit state machine over the task's serializable (category, window,
//! cursor) state, so a task can be persisted and resumed at any page
//! boundary instead of living in a call stack.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::export::ExportSink;
use crate::parse::PageParser;
use crate::retry::fetch_with_retry;
use crate::transport::PageFetcher;
use crate::types::{Event, ParsedPage, QueryTask, RawResponse, Record, TaskReport};

use super::extract::records_from_page;
use super::filter::{ValidationFilter, Verdict};

/// The run's shared record pipeline: validation filter and export sink.
///
/// Lives behind one async mutex so that only one task's records are
/// appended at a time (single-writer discipline around the sink buffer).
pub(crate) struct RecordPipeline {
    pub(crate) filter: ValidationFilter,
    pub(crate) sink: ExportSink,
}

impl RecordPipeline {
    /// Filter a page's candidate records and append the accepted ones to
    /// the sink. Returns the number accepted.
    pub(crate) async fn ingest(&mut self, records: Vec<Record>) -> u64 {
        let mut accepted = 0;
        for record in records {
            if self.filter.admit(&record) == Verdict::Accepted {
                self.sink.append(record).await;
                accepted += 1;
            }
        }
        accepted
    }
}

/// Everything a task walker needs besides the task itself.
pub(crate) struct WalkerContext {
    pub(crate) fetcher: Arc<dyn PageFetcher>,
    pub(crate) parser: Arc<PageParser>,
    pub(crate) retry: RetryConfig,
    pub(crate) max_pages: u32,
    pub(crate) cancel_token: CancellationToken,
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    pub(crate) pipeline: Arc<tokio::sync::Mutex<RecordPipeline>>,
}

/// Walker states; `Extracting` and `Deciding` carry the data produced by
/// the previous step, so raw pages are dropped as soon as extraction ends.
enum WalkState {
    Fetching,
    Extracting(RawResponse),
    Deciding(Option<String>),
    Done,
    Failed(String),
}

/// Drive one query task to completion.
///
/// Failures here are task-local: a failed task is reported and never aborts
/// its siblings or the run.
pub(crate) async fn walk_task(ctx: &WalkerContext, mut task: QueryTask) -> TaskReport {
    let mut seen_cursors: HashSet<String> = HashSet::new();
    let mut pages_fetched = 0u32;
    let mut records_extracted = 0u64;
    let mut records_accepted = 0u64;

    ctx.event_tx
        .send(Event::TaskStarted {
            id: task.id,
            category: task.category.clone(),
            window: task.window,
        })
        .ok();

    let mut state = WalkState::Fetching;
    let error = loop {
        state = match state {
            WalkState::Fetching => {
                if ctx.cancel_token.is_cancelled() {
                    tracing::info!(
                        task_id = task.id.get(),
                        category = %task.category,
                        "Cancellation requested, finishing task with what was harvested"
                    );
                    WalkState::Done
                } else if pages_fetched >= ctx.max_pages {
                    tracing::warn!(
                        task_id = task.id.get(),
                        category = %task.category,
                        max_pages = ctx.max_pages,
                        "Page cap reached, finishing task"
                    );
                    WalkState::Done
                } else {
                    let fetched = fetch_with_retry(&ctx.retry, || {
                        ctx.fetcher
                            .fetch(&task.category, task.window, task.cursor.as_deref())
                    })
                    .await;
                    match fetched {
                        Ok(raw) => WalkState::Extracting(raw),
                        Err(e) => WalkState::Failed(e.to_string()),
                    }
                }
            }

            WalkState::Extracting(raw) => {
                pages_fetched += 1;
                let page = match ctx.parser.parse_page(&raw) {
                    Ok(page) => page,
                    Err(e) => {
                        tracing::warn!(
                            task_id = task.id.get(),
                            category = %task.category,
                            error = %e,
                            "Page extraction failed, treating page as empty"
                        );
                        ParsedPage::default()
                    }
                };

                tracing::info!(
                    category = %task.category,
                    window = %task.window,
                    page = pages_fetched,
                    rows = page.rows.len(),
                    "Scraped result page"
                );
                ctx.event_tx
                    .send(Event::PageScraped {
                        id: task.id,
                        page: pages_fetched,
                        rows: page.rows.len(),
                    })
                    .ok();

                let records = records_from_page(&task, &page);
                records_extracted += records.len() as u64;

                if !records.is_empty() {
                    let mut pipeline = ctx.pipeline.lock().await;
                    records_accepted += pipeline.ingest(records).await;
                }

                WalkState::Deciding(page.next_cursor)
            }

            WalkState::Deciding(next_cursor) => match next_cursor {
                Some(cursor) => {
                    if seen_cursors.insert(cursor.clone()) {
                        task.cursor = Some(cursor);
                        WalkState::Fetching
                    } else {
                        tracing::warn!(
                            task_id = task.id.get(),
                            category = %task.category,
                            cursor = %cursor,
                            "Pagination cursor repeated, stopping to break the cycle"
                        );
                        WalkState::Done
                    }
                }
                None => WalkState::Done,
            },

            WalkState::Done => break None,
            WalkState::Failed(error) => break Some(error),
        };
    };

    match &error {
        None => {
            ctx.event_tx
                .send(Event::TaskCompleted {
                    id: task.id,
                    pages: pages_fetched,
                    records: records_accepted,
                })
                .ok();
        }
        Some(e) => {
            tracing::error!(
                task_id = task.id.get(),
                category = %task.category,
                window = %task.window,
                error = %e,
                "Query task failed"
            );
            ctx.event_tx
                .send(Event::TaskFailed {
                    id: task.id,
                    error: e.clone(),
                })
                .ok();
        }
    }

    TaskReport {
        id: task.id,
        category: task.category,
        window: task.window,
        pages_fetched,
        records_extracted,
        records_accepted,
        error,
    }
}
