//! Batched export sink — bounded buffering, spooled batches, and
//! merge-on-finalize.
//!
//! Accepted records are buffered in insertion order and flushed to the
//! batch store whenever the buffer reaches the flush threshold, bounding
//! peak memory to one threshold's worth of records regardless of total run
//! volume. Finalization merges all spooled batches back in sequence order
//! into the final artifact, best-effort: unreadable batches are skipped,
//! and a fallback dump of whatever is still in memory is written if the
//! merge yields nothing at all.

pub mod artifact;
pub mod batch_store;

pub use artifact::{ArtifactWriter, CsvArtifactWriter};
pub use batch_store::{BatchHandle, BatchStore, JsonBatchStore};

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::types::{DateWindow, Event, ExportSummary, Record};

/// How finalization produced its artifact.
#[derive(Clone, Debug)]
pub(crate) enum FinalizeResult {
    /// Normal path: batches merged into the final artifact
    Exported {
        /// Artifact location
        path: PathBuf,
        /// Summary written alongside the artifact
        summary: ExportSummary,
    },
    /// Degraded path: fallback dump of in-memory remnants
    FellBack {
        /// Artifact location
        path: PathBuf,
        /// Records in the fallback dump
        records: u64,
    },
}

/// Buffering sink for accepted records.
///
/// Appends happen under the run's pipeline mutex, so the sink itself is
/// single-writer and needs no internal locking.
pub(crate) struct ExportSink {
    flush_threshold: usize,
    buffer: Vec<Record>,
    next_sequence: u64,
    written: Vec<BatchHandle>,
    appended: u64,
    store: Arc<dyn BatchStore>,
    event_tx: tokio::sync::broadcast::Sender<Event>,
}

impl ExportSink {
    pub(crate) fn new(
        flush_threshold: usize,
        store: Arc<dyn BatchStore>,
        event_tx: tokio::sync::broadcast::Sender<Event>,
    ) -> Self {
        Self {
            flush_threshold,
            buffer: Vec::new(),
            next_sequence: 0,
            written: Vec::new(),
            appended: 0,
            store,
            event_tx,
        }
    }

    /// Append one accepted record, flushing if the buffer reaches the
    /// threshold.
    ///
    /// A flush that fails (after its single retry) keeps the records
    /// buffered and is not an append error; the next append attempts the
    /// flush again, and finalization gets a last chance at the remnants.
    pub(crate) async fn append(&mut self, record: Record) {
        self.buffer.push(record);
        self.appended += 1;

        if self.buffer.len() >= self.flush_threshold
            && let Err(e) = self.flush().await
        {
            tracing::warn!(
                error = %e,
                buffered = self.buffer.len(),
                "Batch flush failed, records stay buffered"
            );
        }
    }

    /// Flush the current buffer as the next batch, retrying the write once.
    ///
    /// On success the buffer is cleared and the batch handle recorded for
    /// the merge; on failure the buffer is left intact.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let sequence = self.next_sequence;
        let handle = match self.store.write_batch(sequence, &self.buffer).await {
            Ok(handle) => handle,
            Err(first) => {
                tracing::warn!(sequence = sequence, error = %first, "Batch write failed, retrying once");
                self.store.write_batch(sequence, &self.buffer).await?
            }
        };

        self.event_tx
            .send(Event::BatchFlushed {
                sequence,
                records: self.buffer.len(),
            })
            .ok();

        self.next_sequence += 1;
        self.written.push(handle);
        self.buffer.clear();
        Ok(())
    }

    /// Records currently buffered (for the memory-bound property).
    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Merge all spooled batches and write the final artifact.
    ///
    /// Returns the artifact produced, or [`Error::Finalization`] when
    /// neither the merge nor the fallback path could produce one.
    pub(crate) async fn finalize(mut self, writer: &dyn ArtifactWriter) -> Result<FinalizeResult> {
        // Whatever is still buffered forms the last batch. If the flush
        // fails the remnants stay in memory for the fallback path.
        if let Err(e) = self.flush().await {
            tracing::warn!(
                error = %e,
                remnants = self.buffer.len(),
                "Final batch flush failed, keeping remnants in memory"
            );
        }

        // Best-effort merge in sequence-number order: a batch that cannot
        // be read back is skipped, not fatal.
        let mut merged: Vec<Record> = Vec::new();
        let mut merged_handles: Vec<BatchHandle> = Vec::new();
        let mut skipped = 0usize;
        for handle in &self.written {
            match self.store.read_batch(handle).await {
                Ok(mut records) => {
                    merged.append(&mut records);
                    merged_handles.push(handle.clone());
                }
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(
                        sequence = handle.sequence,
                        error = %e,
                        "Skipping unreadable batch during merge"
                    );
                }
            }
        }

        let remnants = std::mem::take(&mut self.buffer);

        if !merged.is_empty() || (self.appended == 0 && remnants.is_empty()) {
            // Normal path. Remnants whose final flush failed are appended so
            // they are not lost; an empty run still gets an explicit empty
            // artifact rather than silence.
            if !remnants.is_empty() {
                tracing::warn!(
                    remnants = remnants.len(),
                    "Appending unflushed remnants to the merged export"
                );
                merged.extend(remnants);
            }
            if skipped > 0 {
                tracing::warn!(
                    skipped = skipped,
                    merged = merged.len(),
                    "Export is missing the contents of unreadable batches"
                );
            }

            let summary = summarize(&merged);
            let path = match writer.write_artifact(&merged, &summary).await {
                Ok(path) => path,
                Err(e) => {
                    tracing::error!(error = %e, "Artifact write failed, attempting fallback dump");
                    return self.fall_back(writer, merged).await;
                }
            };

            self.event_tx
                .send(Event::ExportWritten {
                    path: path.clone(),
                    records: summary.records,
                })
                .ok();

            // Merged batches are no longer needed; deletion failures are
            // logged, not escalated.
            for handle in &merged_handles {
                if let Err(e) = self.store.delete_batch(handle).await {
                    tracing::warn!(sequence = handle.sequence, error = %e, "Failed to delete merged batch");
                }
            }

            return Ok(FinalizeResult::Exported { path, summary });
        }

        if !remnants.is_empty() {
            return self.fall_back(writer, remnants).await;
        }

        Err(Error::Finalization(format!(
            "{} records were appended but every batch was lost and nothing remains in memory",
            self.appended
        )))
    }

    /// Degraded path: dump `records` unsorted, without a summary.
    ///
    /// Spooled batches are deliberately left on disk for post-mortem
    /// recovery.
    async fn fall_back(
        &self,
        writer: &dyn ArtifactWriter,
        records: Vec<Record>,
    ) -> Result<FinalizeResult> {
        match writer.write_fallback(&records).await {
            Ok(path) => {
                tracing::warn!(
                    path = %path.display(),
                    records = records.len(),
                    "Wrote fallback artifact"
                );
                self.event_tx
                    .send(Event::FallbackWritten {
                        path: path.clone(),
                        records: records.len() as u64,
                    })
                    .ok();
                Ok(FinalizeResult::FellBack {
                    path,
                    records: records.len() as u64,
                })
            }
            Err(e) => Err(Error::Finalization(format!(
                "fallback artifact write failed: {e}"
            ))),
        }
    }
}

/// Build the export summary from the merged record set.
fn summarize(records: &[Record]) -> ExportSummary {
    let categories: BTreeSet<String> = records.iter().map(|r| r.category.clone()).collect();
    let date_range = records
        .iter()
        .map(|r| r.window)
        .reduce(|acc, w| DateWindow::new(acc.from.min(w.from), acc.to.max(w.to)));

    ExportSummary {
        records: records.len() as u64,
        categories: categories.into_iter().collect(),
        date_range,
        generated_at: Utc::now(),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::types::DateWindow;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn record(case_no: &str) -> Record {
        Record {
            category: "CRM-M".to_string(),
            window: DateWindow::new(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 11).unwrap(),
            ),
            fields: BTreeMap::from([
                ("Case No".to_string(), case_no.to_string()),
                ("Decision Date".to_string(), "05-01-2024".to_string()),
            ]),
            related_links: BTreeSet::new(),
        }
    }

    fn sink_over(dir: &std::path::Path, threshold: usize) -> ExportSink {
        let (event_tx, _rx) = tokio::sync::broadcast::channel(64);
        ExportSink::new(threshold, Arc::new(JsonBatchStore::new(dir)), event_tx)
    }

    fn writer(dir: &std::path::Path) -> CsvArtifactWriter {
        CsvArtifactWriter::new(dir, "records", vec!["Case No".to_string()])
    }

    /// Store that fails every write a fixed number of times before
    /// delegating to a real spool.
    struct FlakyStore {
        inner: JsonBatchStore,
        failures_left: AtomicU32,
    }

    #[async_trait::async_trait]
    impl BatchStore for FlakyStore {
        async fn write_batch(&self, sequence: u64, records: &[Record]) -> Result<BatchHandle> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StorageError::WriteFailed {
                    sequence,
                    reason: "injected failure".to_string(),
                }
                .into());
            }
            self.inner.write_batch(sequence, records).await
        }

        async fn read_batch(&self, handle: &BatchHandle) -> Result<Vec<Record>> {
            self.inner.read_batch(handle).await
        }

        async fn delete_batch(&self, handle: &BatchHandle) -> Result<()> {
            self.inner.delete_batch(handle).await
        }
    }

    #[tokio::test]
    async fn buffer_never_exceeds_flush_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = sink_over(dir.path(), 3);

        for i in 0..10 {
            sink.append(record(&format!("CRM-M-{i}"))).await;
            assert!(
                sink.buffered() < 3,
                "buffer must be cleared whenever it reaches the threshold"
            );
        }
    }

    #[tokio::test]
    async fn merge_concatenates_batches_in_sequence_order_and_deletes_them() {
        let dir = tempfile::tempdir().unwrap();
        let spool = dir.path().join("spool");
        std::fs::create_dir_all(&spool).unwrap();
        let mut sink = sink_over(&spool, 2);

        // 6 records with threshold 2 -> batches of {2, 2, 2}; appending a
        // 7th before finalize exercises the last-batch path: {2,2,2} + {1}
        for i in 0..7 {
            sink.append(record(&format!("CRM-M-{i:02}"))).await;
        }

        let result = sink.finalize(&writer(dir.path())).await.unwrap();
        let FinalizeResult::Exported { path, summary } = result else {
            panic!("expected the normal export path");
        };

        assert_eq!(summary.records, 7);
        let content = std::fs::read_to_string(&path).unwrap();
        // Batch-then-insertion order survives the merge (the writer sorts by
        // Case No, which matches insertion order here)
        for i in 0..7 {
            assert!(content.contains(&format!("CRM-M-{i:02}")));
        }

        // All spooled batches deleted after a successful merge
        assert_eq!(std::fs::read_dir(&spool).unwrap().count(), 0);
    }

    /// Writer that records exactly what it was asked to write.
    struct CaptureWriter {
        captured: tokio::sync::Mutex<Vec<Record>>,
    }

    #[async_trait::async_trait]
    impl ArtifactWriter for CaptureWriter {
        async fn write_artifact(
            &self,
            records: &[Record],
            _summary: &ExportSummary,
        ) -> Result<PathBuf> {
            *self.captured.lock().await = records.to_vec();
            Ok(PathBuf::from("captured.csv"))
        }

        async fn write_fallback(&self, records: &[Record]) -> Result<PathBuf> {
            *self.captured.lock().await = records.to_vec();
            Ok(PathBuf::from("captured.fallback.csv"))
        }
    }

    #[tokio::test]
    async fn merge_preserves_batch_then_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = sink_over(dir.path(), 100);

        // Three batches of sizes {2, 3, 1}, flushed explicitly
        for name in ["a1", "a2"] {
            sink.append(record(name)).await;
        }
        sink.flush().await.unwrap();
        for name in ["b1", "b2", "b3"] {
            sink.append(record(name)).await;
        }
        sink.flush().await.unwrap();
        sink.append(record("c1")).await;

        let writer = CaptureWriter {
            captured: tokio::sync::Mutex::new(Vec::new()),
        };
        sink.finalize(&writer).await.unwrap();

        let captured = writer.captured.lock().await;
        let order: Vec<&str> = captured
            .iter()
            .map(|r| r.fields["Case No"].as_str())
            .collect();
        assert_eq!(order, vec!["a1", "a2", "b1", "b2", "b3", "c1"]);

        // All three spooled batches were deleted after the merge
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn write_failure_is_retried_once_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let (event_tx, _rx) = tokio::sync::broadcast::channel(64);
        let store = Arc::new(FlakyStore {
            inner: JsonBatchStore::new(dir.path()),
            failures_left: AtomicU32::new(1),
        });
        let mut sink = ExportSink::new(2, store, event_tx);

        sink.append(record("CRM-M-1")).await;
        sink.append(record("CRM-M-2")).await;

        assert_eq!(sink.buffered(), 0, "retry should have flushed the batch");
        assert_eq!(sink.written.len(), 1);
    }

    #[tokio::test]
    async fn unreadable_batch_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let spool = dir.path().join("spool");
        std::fs::create_dir_all(&spool).unwrap();
        let mut sink = sink_over(&spool, 2);

        for i in 0..4 {
            sink.append(record(&format!("CRM-M-{i}"))).await;
        }
        // Corrupt the first batch on disk
        std::fs::write(&sink.written[0].path, b"not json").unwrap();

        let result = sink.finalize(&writer(dir.path())).await.unwrap();
        let FinalizeResult::Exported { summary, .. } = result else {
            panic!("expected the normal export path");
        };

        assert_eq!(summary.records, 2, "only the readable batch contributes");
    }

    #[tokio::test]
    async fn all_batches_lost_falls_back_to_in_memory_remnants() {
        let dir = tempfile::tempdir().unwrap();
        let (event_tx, _rx) = tokio::sync::broadcast::channel(64);
        // Every write fails: nothing ever reaches the spool
        let store = Arc::new(FlakyStore {
            inner: JsonBatchStore::new(dir.path().join("missing-spool")),
            failures_left: AtomicU32::new(u32::MAX),
        });
        let mut sink = ExportSink::new(2, store, event_tx);

        for i in 0..5 {
            sink.append(record(&format!("CRM-M-{i}"))).await;
        }

        let result = sink.finalize(&writer(dir.path())).await.unwrap();
        let FinalizeResult::FellBack { path, records } = result else {
            panic!("expected the fallback path");
        };

        assert_eq!(records, 5, "all records stayed in memory and were dumped");
        assert!(path.ends_with("records.fallback.csv"));
    }

    #[tokio::test]
    async fn empty_run_finalizes_to_an_explicit_empty_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_over(dir.path(), 2);

        let result = sink.finalize(&writer(dir.path())).await.unwrap();
        let FinalizeResult::Exported { summary, .. } = result else {
            panic!("expected the normal export path");
        };

        assert_eq!(summary.records, 0);
        assert!(summary.categories.is_empty());
        assert_eq!(summary.date_range, None);
    }

    #[tokio::test]
    async fn summary_covers_categories_and_date_extremes() {
        let mut a = record("CRM-M-1");
        a.category = "CRM-M".to_string();
        let mut b = record("CWP-1");
        b.category = "CWP".to_string();
        b.window = DateWindow::new(
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 11).unwrap(),
        );

        let summary = summarize(&[a, b]);
        assert_eq!(summary.records, 2);
        assert_eq!(summary.categories, vec!["CRM-M", "CWP"]);
        let range = summary.date_range.unwrap();
        assert_eq!(range.from, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(range.to, NaiveDate::from_ymd_opt(2024, 2, 11).unwrap());
    }
}
