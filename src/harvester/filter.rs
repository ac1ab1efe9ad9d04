//! Deduplication and validation — per-run fingerprint set and accept/reject
//! accounting.
//!
//! The filter owns all cross-task mutable state of the record pipeline: the
//! seen-fingerprint set and the running counts. It is created per run and
//! passed in explicitly, never shared between runs.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::config::ValidationConfig;
use crate::types::{FilterStats, Record};

/// Outcome of admitting one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Record accepted for export
    Accepted,
    /// Record already seen this run
    Duplicate,
    /// Record missing a required field
    Invalid {
        /// The first required field found empty or absent
        missing_field: String,
    },
}

/// Per-run validation and deduplication filter.
pub(crate) struct ValidationFilter {
    required_fields: Vec<String>,
    dedup_fields: Vec<String>,
    seen: HashSet<String>,
    stats: FilterStats,
}

impl ValidationFilter {
    pub(crate) fn new(config: &ValidationConfig) -> Self {
        Self {
            required_fields: config.required_fields.clone(),
            dedup_fields: config.dedup_fields.clone(),
            seen: HashSet::new(),
            stats: FilterStats::default(),
        }
    }

    /// Stable fingerprint over (category, window, designated key fields).
    ///
    /// Field values are fed through the hasher with a separator byte so that
    /// adjacent values cannot run together and collide.
    pub(crate) fn fingerprint(&self, record: &Record) -> String {
        let mut hasher = Sha256::new();
        hasher.update(record.category.as_bytes());
        hasher.update([0xff]);
        hasher.update(record.window.from.to_string().as_bytes());
        hasher.update([0xff]);
        hasher.update(record.window.to.to_string().as_bytes());
        for field in &self.dedup_fields {
            hasher.update([0xff]);
            if let Some(value) = record.fields.get(field) {
                hasher.update(value.as_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }

    /// Inspect one record: duplicate check first, then required fields.
    ///
    /// A fingerprint enters the seen set the first time it is encountered,
    /// whether the record is accepted or invalid, so a re-encountered
    /// invalid record counts as a duplicate.
    pub(crate) fn admit(&mut self, record: &Record) -> Verdict {
        self.stats.total += 1;

        let fingerprint = self.fingerprint(record);
        if !self.seen.insert(fingerprint.clone()) {
            self.stats.duplicate += 1;
            tracing::debug!(
                fingerprint = %fingerprint,
                category = %record.category,
                "Rejecting duplicate record"
            );
            return Verdict::Duplicate;
        }

        for field in &self.required_fields {
            let empty = record
                .fields
                .get(field)
                .map(|v| v.trim().is_empty())
                .unwrap_or(true);
            if empty {
                self.stats.invalid += 1;
                tracing::debug!(
                    fingerprint = %fingerprint,
                    category = %record.category,
                    missing_field = %field,
                    "Rejecting invalid record"
                );
                return Verdict::Invalid {
                    missing_field: field.clone(),
                };
            }
        }

        self.stats.valid += 1;
        Verdict::Accepted
    }

    /// Running accept/reject counts.
    pub(crate) fn stats(&self) -> FilterStats {
        self.stats
    }
}
