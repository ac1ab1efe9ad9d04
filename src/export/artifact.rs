//! Final artifact writing — CSV export with a JSON summary sidecar.
//!
//! The artifact writer is the single-shot end of the pipeline: called once
//! per run for the merged export, or once for the fallback dump when normal
//! finalization fails. Never both.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::types::{ExportSummary, Record};

/// Abstraction over final artifact encoding, enabling testability.
#[async_trait::async_trait]
pub trait ArtifactWriter: Send + Sync {
    /// Write the consolidated export and its summary. Returns the artifact
    /// location.
    async fn write_artifact(&self, records: &[Record], summary: &ExportSummary)
    -> Result<PathBuf>;

    /// Write the degraded fallback dump (unsorted, no summary). Returns the
    /// artifact location.
    async fn write_fallback(&self, records: &[Record]) -> Result<PathBuf>;
}

/// Production [`ArtifactWriter`] encoding records as CSV.
///
/// Columns are the fixed category/window columns, followed by the union of
/// record field keys in first-seen order, followed by a links column with
/// `; `-joined URLs. The export is sorted by (category, sort fields) before
/// writing; the fallback is dumped in buffer order.
pub struct CsvArtifactWriter {
    output_dir: PathBuf,
    artifact_stem: String,
    sort_fields: Vec<String>,
}

impl CsvArtifactWriter {
    /// Create a writer targeting `output_dir`.
    pub fn new(
        output_dir: impl Into<PathBuf>,
        artifact_stem: impl Into<String>,
        sort_fields: Vec<String>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            artifact_stem: artifact_stem.into(),
            sort_fields,
        }
    }

    /// Encode records to CSV bytes with the derived column set.
    fn encode(&self, records: &[Record]) -> Result<Vec<u8>> {
        let field_columns = field_column_union(records);

        let mut writer = csv::Writer::from_writer(Vec::new());

        let mut header: Vec<&str> = vec!["Category", "From Date", "To Date"];
        header.extend(field_columns.iter().map(String::as_str));
        header.push("Links");
        writer
            .write_record(&header)
            .map_err(|e| Error::Other(format!("CSV encoding failed: {e}")))?;

        for record in records {
            let mut row: Vec<String> = vec![
                record.category.clone(),
                record.window.from.to_string(),
                record.window.inclusive_to().to_string(),
            ];
            for column in &field_columns {
                row.push(record.fields.get(column).cloned().unwrap_or_default());
            }
            row.push(
                record
                    .related_links
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("; "),
            );
            writer
                .write_record(&row)
                .map_err(|e| Error::Other(format!("CSV encoding failed: {e}")))?;
        }

        writer
            .into_inner()
            .map_err(|e| Error::Other(format!("CSV encoding failed: {e}")))
    }

    fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.csv", self.artifact_stem))
    }

    fn summary_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.summary.json", self.artifact_stem))
    }

    fn fallback_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.fallback.csv", self.artifact_stem))
    }
}

#[async_trait::async_trait]
impl ArtifactWriter for CsvArtifactWriter {
    async fn write_artifact(
        &self,
        records: &[Record],
        summary: &ExportSummary,
    ) -> Result<PathBuf> {
        let mut sorted: Vec<Record> = records.to_vec();
        sorted.sort_by(|a, b| sort_key(a, &self.sort_fields).cmp(&sort_key(b, &self.sort_fields)));

        let bytes = self.encode(&sorted)?;
        let path = self.artifact_path();
        tokio::fs::write(&path, bytes).await?;

        let summary_bytes = serde_json::to_vec_pretty(summary)?;
        tokio::fs::write(self.summary_path(), summary_bytes).await?;

        Ok(path)
    }

    async fn write_fallback(&self, records: &[Record]) -> Result<PathBuf> {
        let bytes = self.encode(records)?;
        let path = self.fallback_path();
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

/// Union of field keys across all records, in first-seen order.
fn field_column_union(records: &[Record]) -> Vec<String> {
    let mut columns = Vec::new();
    for record in records {
        for key in record.fields.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

/// Sort key: category first, then the configured sort field values.
fn sort_key<'a>(record: &'a Record, sort_fields: &[String]) -> Vec<&'a str> {
    let mut key = vec![record.category.as_str()];
    for field in sort_fields {
        key.push(record.fields.get(field).map(String::as_str).unwrap_or(""));
    }
    key
}

/// Test helper: parse a written CSV artifact back into header + rows.
#[cfg(test)]
#[allow(clippy::unwrap_used)]
fn read_csv(path: &std::path::Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let header = reader
        .headers()
        .unwrap()
        .iter()
        .map(str::to_string)
        .collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();
    (header, rows)
}
