//! Configuration types for records-dl

use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, time::Duration};

/// Site layout and form wiring for the target records site
///
/// The defaults describe the judgment search form this crate was written
/// against; pointing the harvester at another form-driven site is a matter
/// of overriding these fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SiteConfig {
    /// URL of the search form endpoint
    #[serde(default = "default_search_url")]
    pub search_url: String,

    /// Form field carrying the case category
    #[serde(default = "default_category_field")]
    pub category_field: String,

    /// Form field carrying the window start date
    #[serde(default = "default_from_field")]
    pub from_field: String,

    /// Form field carrying the window end date (inclusive)
    #[serde(default = "default_to_field")]
    pub to_field: String,

    /// Additional form fields submitted verbatim with every request
    #[serde(default = "default_static_fields")]
    pub static_fields: HashMap<String, String>,

    /// strftime format the site expects for form dates (default: `%d-%m-%Y`)
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// CSS selector of the results table
    #[serde(default = "default_table_selector")]
    pub table_selector: String,

    /// Link text identifying the next-page link
    #[serde(default = "default_next_link_label")]
    pub next_link_label: String,

    /// Marker phrase the site uses to ask for a narrower query; matched
    /// case-insensitively against the response body and logged as a warning
    #[serde(default = "default_refine_marker")]
    pub refine_marker: Option<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            category_field: default_category_field(),
            from_field: default_from_field(),
            to_field: default_to_field(),
            static_fields: default_static_fields(),
            date_format: default_date_format(),
            table_selector: default_table_selector(),
            next_link_label: default_next_link_label(),
            refine_marker: default_refine_marker(),
        }
    }
}

/// Global query scope: which categories and dates to harvest
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Case categories to query, in the order tasks should be planned
    #[serde(default)]
    pub categories: Vec<String>,

    /// First day of the global interval (inclusive)
    #[serde(default)]
    pub from_date: NaiveDate,

    /// Day after the last day of the global interval (exclusive)
    #[serde(default)]
    pub to_date: NaiveDate,

    /// Maximum days per query task sub-window (default: 10)
    #[serde(default = "default_chunk_days")]
    pub chunk_days: u32,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            from_date: NaiveDate::default(),
            to_date: NaiveDate::default(),
            chunk_days: default_chunk_days(),
        }
    }
}

/// Crawl behavior: concurrency, pagination bounds, transport guards
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Maximum query tasks walked concurrently (default: 4)
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Hard cap on pages fetched per task (default: 50)
    ///
    /// A defensive bound against pathological pagination; reaching it
    /// finishes the task with a warning, not an error.
    #[serde(default = "default_max_pages_per_task")]
    pub max_pages_per_task: u32,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Maximum accepted response body size in bytes (default: 32 MiB)
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: u64,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            max_pages_per_task: default_max_pages_per_task(),
            request_timeout: default_request_timeout(),
            max_response_bytes: default_max_response_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

/// Retry configuration for transient transport failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Record validation and deduplication contract
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Field names that must be present and non-empty for a record to be
    /// accepted
    #[serde(default = "default_key_fields")]
    pub required_fields: Vec<String>,

    /// Field names combined with (category, window) into the dedup
    /// fingerprint
    #[serde(default = "default_key_fields")]
    pub dedup_fields: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            required_fields: default_key_fields(),
            dedup_fields: default_key_fields(),
        }
    }
}

/// Export sink configuration: spool location, flush threshold, artifact naming
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory the final artifact and summary are written to
    /// (default: "./export")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Directory intermediate batches are spooled to (default: "./spool")
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,

    /// Buffered records that trigger a batch flush (default: 500)
    ///
    /// Peak memory held by the sink is bounded by this many records
    /// regardless of total run volume.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// File stem of the artifact (default: "records")
    #[serde(default = "default_artifact_stem")]
    pub artifact_stem: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            spool_dir: default_spool_dir(),
            flush_threshold: default_flush_threshold(),
            artifact_stem: default_artifact_stem(),
        }
    }
}

/// Main configuration for the harvester
///
/// Fields are organized into logical sub-configs:
/// - [`site`](SiteConfig) — target site layout and form wiring
/// - [`scope`](ScopeConfig) — categories and date interval to harvest
/// - [`crawl`](CrawlConfig) — concurrency and transport guards
/// - [`retry`](RetryConfig) — backoff policy for transient failures
/// - [`validation`](ValidationConfig) — required fields and dedup keys
/// - [`export`](ExportConfig) — spool and artifact locations
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Target site layout and form wiring
    #[serde(default)]
    pub site: SiteConfig,

    /// Categories and date interval to harvest
    #[serde(default)]
    pub scope: ScopeConfig,

    /// Concurrency and transport guards
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Backoff policy for transient transport failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Required fields and dedup keys
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Spool and artifact locations
    #[serde(default)]
    pub export: ExportConfig,
}

impl Config {
    /// Validate the configuration before a run
    ///
    /// An empty category list or zero-length interval is valid (it plans an
    /// empty run); structurally unusable settings are not.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.site.search_url).map_err(|e| Error::Config {
            message: format!("search_url is not a valid URL: {e}"),
            key: Some("site.search_url".to_string()),
        })?;

        if self.scope.chunk_days == 0 {
            return Err(Error::Config {
                message: "chunk_days must be at least 1".to_string(),
                key: Some("scope.chunk_days".to_string()),
            });
        }

        if self.scope.from_date > self.scope.to_date {
            return Err(Error::Config {
                message: format!(
                    "from_date {} is after to_date {}",
                    self.scope.from_date, self.scope.to_date
                ),
                key: Some("scope.from_date".to_string()),
            });
        }

        if self.crawl.max_concurrent_tasks == 0 {
            return Err(Error::Config {
                message: "max_concurrent_tasks must be at least 1".to_string(),
                key: Some("crawl.max_concurrent_tasks".to_string()),
            });
        }

        if self.export.flush_threshold == 0 {
            return Err(Error::Config {
                message: "flush_threshold must be at least 1".to_string(),
                key: Some("export.flush_threshold".to_string()),
            });
        }

        Ok(())
    }
}

fn default_search_url() -> String {
    "https://www.phhc.gov.in/home.php?search_param=free_text_search_judgment".to_string()
}

fn default_category_field() -> String {
    "ctype".to_string()
}

fn default_from_field() -> String {
    "dfrom".to_string()
}

fn default_to_field() -> String {
    "dto".to_string()
}

fn default_static_fields() -> HashMap<String, String> {
    HashMap::from([("search_type".to_string(), "J".to_string())])
}

fn default_date_format() -> String {
    "%d-%m-%Y".to_string()
}

fn default_table_selector() -> String {
    "table#tables11".to_string()
}

fn default_next_link_label() -> String {
    "Next".to_string()
}

fn default_refine_marker() -> Option<String> {
    Some("refine your query".to_string())
}

fn default_chunk_days() -> u32 {
    10
}

fn default_max_concurrent_tasks() -> usize {
    4
}

fn default_max_pages_per_task() -> u32 {
    50
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_response_bytes() -> u64 {
    32 * 1024 * 1024
}

fn default_user_agent() -> String {
    format!("records-dl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_key_fields() -> Vec<String> {
    vec!["Case No".to_string(), "Decision Date".to_string()]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./export")
}

fn default_spool_dir() -> PathBuf {
    PathBuf::from("./spool")
}

fn default_flush_threshold() -> usize {
    500
}

fn default_artifact_stem() -> String {
    "records".to_string()
}

// Duration serialization helper (seconds as u64)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
