//! Record extraction — normalizing parsed rows into keyed records.
//!
//! Extraction is total: every cell of every row is retained, and no row is
//! dropped here. Filtering is the validation filter's responsibility.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{ParsedPage, QueryTask, Record};

/// Convert one parsed page into candidate records, in row order.
///
/// Cells are zipped against the declared headers positionally; a cell whose
/// index has no usable header (headers absent, short, blank, or duplicated)
/// is keyed `col_<i>` so every cell stays addressable. Links from all cells
/// are collected into the record's de-duplicated link set.
pub(crate) fn records_from_page(task: &QueryTask, page: &ParsedPage) -> Vec<Record> {
    page.rows
        .iter()
        .map(|row| {
            let mut fields = BTreeMap::new();
            let mut related_links = BTreeSet::new();

            for (i, cell) in row.cells.iter().enumerate() {
                let header = page.headers.get(i).filter(|h| !h.is_empty());
                let key = match header {
                    Some(h) if !fields.contains_key(h.as_str()) => h.clone(),
                    _ => format!("col_{i}"),
                };
                fields.insert(key, cell.text.clone());
                related_links.extend(cell.links.iter().cloned());
            }

            Record {
                category: task.category.clone(),
                window: task.window,
                fields,
                related_links,
            }
        })
        .collect()
}
