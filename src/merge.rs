//! Merge export tabs into one deduplicated worklist.
//!
//! Literature exports are pasted into tabs whose names start with a digit
//! (`1 scopus`, `2 wos`, ...). Those tabs are projected onto the review
//! fields, concatenated in tab order and stripped of exact duplicate rows.

use crate::error::{ReviewError, Result};
use crate::sheet::{self, Table, Workbook};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Default name of the merged tab
pub const MERGED_SHEET_NAME: &str = "merged results no duplicates";

/// Columns kept in the merged tab
pub const MERGE_FIELDS: &[&str] = &[
    "Title",
    "Abstract",
    "Authors",
    "Publication Year",
    "Times Cited, All Databases",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    /// Tabs that were merged
    pub sheets: Vec<String>,
    pub rows_in: usize,
    pub rows_out: usize,
}

/// Whether a tab takes part in the merge
pub fn is_source_sheet(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// Merge every source tab of `workbook` into one table
pub fn merge_tables(workbook: &Workbook) -> (Table, MergeSummary) {
    let mut merged = Table::new(MERGE_FIELDS.iter().map(|f| f.to_string()).collect(), Vec::new());
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    let mut summary = MergeSummary::default();

    for (name, table) in workbook.sheets().filter(|(n, _)| is_source_sheet(n)) {
        let projected = table.project(MERGE_FIELDS);
        debug!(sheet = name, rows = projected.row_count(), "Merging sheet");
        summary.sheets.push(name.to_string());
        summary.rows_in += projected.row_count();

        for row in projected.rows() {
            if seen.insert(row.clone()) {
                merged.push_row(row.clone());
            }
        }
    }

    summary.rows_out = merged.row_count();
    (merged, summary)
}

/// Merge the source tabs of the workbook at `path` and write the result back
/// as `sheet_name`, replacing a previous merge. Other tabs keep their cell
/// types. Only `.xlsx` workbooks can be rewritten in place.
pub fn merge_workbook(path: &Path, sheet_name: &str) -> Result<MergeSummary> {
    sheet::ensure_writable(path)?;
    let mut workbook = Workbook::load(path)?;
    let (merged, summary) = merge_tables(&workbook);

    if summary.sheets.is_empty() {
        return Err(ReviewError::Validation(format!(
            "No sheets starting with a digit found in {}",
            path.display()
        )));
    }

    workbook.put_sheet(sheet_name, merged);
    workbook.save(path)?;

    info!(
        sheets = summary.sheets.len(),
        rows_in = summary.rows_in,
        rows_out = summary.rows_out,
        "Merging completed"
    );
    Ok(summary)
}
