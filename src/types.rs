//! Core types and events for records-dl

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Unique identifier for a query task within one run
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Half-open date interval `[from, to)`
///
/// The site's search form takes inclusive bounds, so the last form date is
/// [`DateWindow::inclusive_to`], one day before `to`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    /// First day of the window (inclusive)
    pub from: NaiveDate,
    /// Day after the last day of the window (exclusive)
    pub to: NaiveDate,
}

impl DateWindow {
    /// Create a new window over `[from, to)`
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    /// Number of days covered by the window (zero if `to <= from`)
    pub fn days(&self) -> u64 {
        (self.to - self.from).num_days().max(0) as u64
    }

    /// Last day of the window, inclusive
    ///
    /// For a zero-length window this equals `from` minus nothing sensible;
    /// callers only format windows produced by the partitioner, which are
    /// always at least one day long.
    pub fn inclusive_to(&self) -> NaiveDate {
        self.to.pred_opt().unwrap_or(self.to)
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

/// One partitioned unit of harvest work: a category crossed with a date
/// sub-window, plus the current pagination cursor.
///
/// Immutable except `cursor`, which advances as pagination proceeds. The
/// whole struct is serializable so an interrupted task can be persisted and
/// resumed from its last cursor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTask {
    /// Task identifier, unique within a run
    pub id: TaskId,
    /// Case category this task queries
    pub category: String,
    /// Date sub-window this task covers
    pub window: DateWindow,
    /// Opaque pagination token; `None` means the first page
    pub cursor: Option<String>,
}

/// Raw response from one page fetch; consumed immediately by the parser
#[derive(Clone, Debug)]
pub struct RawResponse {
    /// Final URL the response was served from (base for link resolution)
    pub url: url::Url,
    /// Response body
    pub body: String,
}

/// One cell of a parsed results row
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedCell {
    /// Whitespace-normalized cell text
    pub text: String,
    /// Absolute URLs of all links found inside the cell
    pub links: Vec<String>,
}

/// One row of a parsed results table
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedRow {
    /// Cells in column order
    pub cells: Vec<ParsedCell>,
}

/// Structured contents of one fetched page; transient, not retained after
/// extraction
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedPage {
    /// Column headers declared by the page (possibly empty or short)
    pub headers: Vec<String>,
    /// Data rows in page order
    pub rows: Vec<ParsedRow>,
    /// Opaque token for the next page, if one was discovered
    pub next_cursor: Option<String>,
}

/// The canonical unit of output: one normalized judgment record
///
/// `fields` keys are either the site-declared headers or a positional
/// `col_<i>` fallback, so every record is addressable by key even when the
/// markup is malformed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Category the record was harvested under
    pub category: String,
    /// Date window of the query that produced the record
    pub window: DateWindow,
    /// Column values keyed by header name or `col_<i>` fallback
    pub fields: BTreeMap<String, String>,
    /// De-duplicated absolute URLs found in the record's row
    pub related_links: BTreeSet<String>,
}

/// Running accept/reject counts maintained by the validation filter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    /// Records inspected
    pub total: u64,
    /// Records accepted
    pub valid: u64,
    /// Records rejected for a missing required field
    pub invalid: u64,
    /// Records rejected as duplicates
    pub duplicate: u64,
}

/// Per-task result returned by the pagination walker
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskReport {
    /// Task identifier
    pub id: TaskId,
    /// Category the task queried
    pub category: String,
    /// Date window the task covered
    pub window: DateWindow,
    /// Pages fetched before the task finished
    pub pages_fetched: u32,
    /// Candidate records extracted (before validation)
    pub records_extracted: u64,
    /// Records accepted into the export sink
    pub records_accepted: u64,
    /// Task-level error, if the task failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskReport {
    /// Whether the task ran to completion
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary written alongside the final artifact
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportSummary {
    /// Total records in the artifact
    pub records: u64,
    /// Distinct categories present, sorted
    pub categories: Vec<String>,
    /// Earliest window start and latest window end across all records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateWindow>,
    /// When the artifact was produced
    pub generated_at: DateTime<Utc>,
}

/// Terminal status of a harvest run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Final artifact written from merged batches
    Success,
    /// Fallback artifact written after normal finalization failed
    PartialSuccess,
    /// No artifact could be produced
    Failure,
}

/// Full report of one harvest run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    /// Terminal status
    pub outcome: RunOutcome,
    /// Location of the artifact (final or fallback), if one was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    /// Export summary, present only when normal finalization succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ExportSummary>,
    /// Accept/reject counts from the validation filter
    pub stats: FilterStats,
    /// Per-task results, in task id order
    pub tasks: Vec<TaskReport>,
}

/// Events emitted on the harvester's broadcast channel
///
/// Consumers subscribe via [`crate::Harvester::subscribe`]; if nobody is
/// listening events are dropped silently.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run started
    RunStarted {
        /// Number of query tasks planned
        tasks: usize,
    },

    /// A query task started walking its result pages
    TaskStarted {
        /// Task identifier
        id: TaskId,
        /// Category the task queries
        category: String,
        /// Date window the task covers
        window: DateWindow,
    },

    /// One result page was fetched and extracted
    PageScraped {
        /// Task identifier
        id: TaskId,
        /// 1-based page number within the task
        page: u32,
        /// Rows extracted from the page
        rows: usize,
    },

    /// A query task finished walking its result pages
    TaskCompleted {
        /// Task identifier
        id: TaskId,
        /// Pages fetched by the task
        pages: u32,
        /// Records the task pushed into the sink
        records: u64,
    },

    /// A query task failed after transport retries were exhausted
    TaskFailed {
        /// Task identifier
        id: TaskId,
        /// Error message
        error: String,
    },

    /// A batch of accepted records was flushed to the spool
    BatchFlushed {
        /// Batch sequence number
        sequence: u64,
        /// Records in the batch
        records: usize,
    },

    /// The final artifact was written
    ExportWritten {
        /// Artifact location
        path: PathBuf,
        /// Records in the artifact
        records: u64,
    },

    /// The fallback artifact was written after normal finalization failed
    FallbackWritten {
        /// Artifact location
        path: PathBuf,
        /// Records in the artifact
        records: u64,
    },

    /// The run terminated
    RunFinished {
        /// Terminal status
        outcome: RunOutcome,
    },
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn window_days_counts_half_open_interval() {
        let w = DateWindow::new(date(2024, 1, 1), date(2024, 1, 11));
        assert_eq!(w.days(), 10);
    }

    #[test]
    fn window_inclusive_to_is_one_day_before_end() {
        let w = DateWindow::new(date(2024, 1, 1), date(2024, 1, 11));
        assert_eq!(w.inclusive_to(), date(2024, 1, 10));
    }

    #[test]
    fn single_day_window() {
        let w = DateWindow::new(date(2024, 1, 21), date(2024, 1, 22));
        assert_eq!(w.days(), 1);
        assert_eq!(w.inclusive_to(), date(2024, 1, 21));
    }

    #[test]
    fn query_task_round_trips_through_serde() {
        let task = QueryTask {
            id: TaskId(7),
            category: "CRM-M".to_string(),
            window: DateWindow::new(date(2024, 1, 1), date(2024, 1, 11)),
            cursor: Some("https://example.com/page2".to_string()),
        };
        let json = serde_json::to_string(&task).unwrap();
        let back: QueryTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, task);
    }
}
