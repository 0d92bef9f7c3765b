//! Spreadsheet store keyed by row index and column name.
//!
//! Excel workbooks are read with `calamine` and written with
//! `rust_xlsxwriter`; `.csv`/`.tsv`/`.txt` files go through `csv`.
//! Every cell of a [`Table`] is held as a trimmed string. Only `.xlsx` can be
//! written back; the other Excel formats are read-only.

use crate::error::{ReviewError, Result};
use calamine::{open_workbook_auto, DataType, Range, Reader, Sheets};
use rust_xlsxwriter::{Format, Workbook as XlsxWorkbook};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Longest string Excel accepts in one cell
const MAX_CELL_CHARS: usize = 32_767;

/// Suffix appended to the file stem of the output location
pub const REVIEWED_SUFFIX: &str = "_reviewed";

/// The only Excel format `rust_xlsxwriter` produces
const XLSX_EXTENSION: &str = "xlsx";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Excel,
    Delimited(u8),
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase()
}

fn file_kind(path: &Path) -> FileKind {
    match extension(path).as_str() {
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => FileKind::Excel,
        "tsv" | "txt" => FileKind::Delimited(b'\t'),
        _ => FileKind::Delimited(b','),
    }
}

/// Fail unless `path` names a file format this module can write
pub fn ensure_writable(path: &Path) -> Result<()> {
    if file_kind(path) == FileKind::Excel && extension(path) != XLSX_EXTENSION {
        return Err(ReviewError::Validation(format!(
            "Cannot write {}: only .xlsx workbooks can be written",
            path.display()
        )));
    }
    Ok(())
}

/// Output location for reviewed results: `<stem>_reviewed.<ext>`.
/// Excel inputs of any format map to `.xlsx`.
pub fn reviewed_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(_) if file_kind(path) == FileKind::Excel => {
            format!("{}{}.{}", stem, REVIEWED_SUFFIX, XLSX_EXTENSION)
        }
        Some(ext) => format!("{}{}.{}", stem, REVIEWED_SUFFIX, ext.to_string_lossy()),
        None => format!("{}{}", stem, REVIEWED_SUFFIX),
    };
    path.with_file_name(name)
}

/// A single sheet: header row plus data rows of equal width
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Build a table, trimming header names and aligning row widths
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let mut table = Self {
            headers: headers.into_iter().map(|h| h.trim().to_string()).collect(),
            rows,
        };
        table.align_row_lengths();
        table
    }

    /// Load one sheet. `sheet_name` is ignored for delimited files.
    pub fn load(path: &Path, sheet_name: &str) -> Result<Self> {
        if !path.exists() {
            return Err(ReviewError::Sheet(format!(
                "The file {} does not exist",
                path.display()
            )));
        }

        match file_kind(path) {
            FileKind::Excel => {
                let mut workbook = open_workbook_auto(path)
                    .map_err(|e| ReviewError::Sheet(format!("Unable to open the workbook: {}", e)))?;
                let range = read_excel_range(&mut workbook, sheet_name)?;
                Ok(table_from_range(&range))
            }
            FileKind::Delimited(delimiter) => read_delimited(path, delimiter),
        }
    }

    /// Write the table. Excel output gets a single sheet named `sheet_name`.
    pub fn save(&self, path: &Path, sheet_name: &str) -> Result<()> {
        ensure_writable(path)?;
        match file_kind(path) {
            FileKind::Excel => {
                let mut workbook = XlsxWorkbook::new();
                write_excel_sheet(&mut workbook, sheet_name, self)?;
                workbook.save(path)?;
            }
            FileKind::Delimited(delimiter) => write_delimited(path, delimiter, self)?,
        }
        debug!(path = %path.display(), rows = self.rows.len(), "Saved table");
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&[String]> {
        self.rows.get(index).map(|r| r.as_slice())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cell value, `None` if the row or column does not exist
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(col)).map(|v| v.as_str())
    }

    /// `(column, value)` pairs of one row in column order
    pub fn row_pairs(&self, row: usize) -> Option<Vec<(&str, &str)>> {
        let values = self.rows.get(row)?;
        Some(
            self.headers
                .iter()
                .map(|h| h.as_str())
                .zip(values.iter().map(|v| v.as_str()))
                .collect(),
        )
    }

    /// Add `name` with every cell set to `default`, unless it already exists.
    /// Returns the column index.
    pub fn ensure_column(&mut self, name: &str, default: &str) -> usize {
        if let Some(index) = self.column_index(name) {
            return index;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(default.to_string());
        }
        self.headers.len() - 1
    }

    /// Overwrite one cell; the column is added (empty elsewhere) if missing
    pub fn set(&mut self, row: usize, column: &str, value: impl Into<String>) -> Result<()> {
        if row >= self.rows.len() {
            return Err(ReviewError::Validation(format!(
                "Row {} out of range ({} rows)",
                row,
                self.rows.len()
            )));
        }
        let col = self.ensure_column(column, "");
        self.rows[row][col] = value.into();
        Ok(())
    }

    /// Append a row, padded or truncated to the header width
    pub fn push_row(&mut self, mut values: Vec<String>) {
        values.resize(self.headers.len(), String::new());
        self.rows.push(values);
    }

    /// New table holding only `columns`, in that order; missing columns are empty
    pub fn project(&self, columns: &[&str]) -> Table {
        let indices: Vec<Option<usize>> = columns.iter().map(|c| self.column_index(c)).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|i| i.and_then(|i| row.get(i).cloned()).unwrap_or_default())
                    .collect()
            })
            .collect();
        Table::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    fn align_row_lengths(&mut self) {
        let column_count = self
            .rows
            .iter()
            .map(|r| r.len())
            .max()
            .unwrap_or(0)
            .max(self.headers.len());

        if self.headers.len() < column_count {
            self.headers.resize(column_count, String::new());
        }
        for row in &mut self.rows {
            row.resize(column_count, String::new());
        }
    }
}

#[derive(Debug, Clone)]
struct Sheet {
    name: String,
    table: Table,
    /// Typed cells as loaded; `None` once the tab has been replaced
    cells: Option<Range<DataType>>,
}

/// Every sheet of a workbook, in tab order.
///
/// Tabs that are not replaced are written back from their typed cells, so
/// numbers and dates stay numbers and dates.
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ReviewError::Sheet(format!(
                "The file {} does not exist",
                path.display()
            )));
        }
        if file_kind(path) != FileKind::Excel {
            return Err(ReviewError::Sheet(format!(
                "{} is not an Excel workbook",
                path.display()
            )));
        }

        let mut workbook = open_workbook_auto(path)
            .map_err(|e| ReviewError::Sheet(format!("Unable to open the workbook: {}", e)))?;
        let names = workbook.sheet_names().to_vec();

        let mut sheets = Vec::with_capacity(names.len());
        for name in names {
            let range = read_excel_range(&mut workbook, &name)?;
            sheets.push(Sheet {
                table: table_from_range(&range),
                cells: Some(range),
                name,
            });
        }
        Ok(Self { sheets })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        ensure_writable(path)?;
        let mut workbook = XlsxWorkbook::new();
        for sheet in &self.sheets {
            match &sheet.cells {
                Some(range) => write_typed_sheet(&mut workbook, &sheet.name, range)?,
                None => write_excel_sheet(&mut workbook, &sheet.name, &sheet.table)?,
            }
        }
        workbook.save(path)?;
        Ok(())
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn sheets(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.sheets.iter().map(|s| (s.name.as_str(), &s.table))
    }

    pub fn sheet(&self, name: &str) -> Option<&Table> {
        self.sheets.iter().find(|s| s.name == name).map(|s| &s.table)
    }

    /// Replace the sheet called `name`, or append it as the last tab
    pub fn put_sheet(&mut self, name: &str, table: Table) {
        match self.sheets.iter_mut().find(|s| s.name == name) {
            Some(sheet) => {
                sheet.table = table;
                sheet.cells = None;
            }
            None => self.sheets.push(Sheet {
                name: name.to_string(),
                table,
                cells: None,
            }),
        }
    }
}

type ExcelSheets = Sheets<BufReader<File>>;

fn read_excel_range(workbook: &mut ExcelSheets, sheet_name: &str) -> Result<Range<DataType>> {
    workbook
        .worksheet_range(sheet_name)
        .ok_or_else(|| ReviewError::Sheet(format!("Sheet '{}' not found", sheet_name)))?
        .map_err(|e| ReviewError::Sheet(format!("Error reading sheet '{}': {}", sheet_name, e)))
}

fn table_from_range(range: &Range<DataType>) -> Table {
    let mut rows_iter = range.rows();
    let headers: Vec<String> = match rows_iter.next() {
        Some(row) => row.iter().map(cell_to_string).collect(),
        None => return Table::default(),
    };

    let rows = rows_iter
        .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>())
        .filter(|values| values.iter().any(|v| !v.is_empty()))
        .collect();

    Table::new(headers, rows)
}

fn cell_to_string(cell: &DataType) -> String {
    match cell {
        DataType::Empty => String::new(),
        _ => cell.to_string().trim().to_string(),
    }
}

fn read_delimited(path: &Path, delimiter: u8) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let values: Vec<String> = record?.iter().map(|v| v.trim().to_string()).collect();
        if values.iter().all(|v| v.is_empty()) {
            continue;
        }
        rows.push(values);
    }

    Ok(Table::new(headers, rows))
}

fn write_delimited(path: &Path, delimiter: u8, table: &Table) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(path)?;

    wtr.write_record(&table.headers)?;
    for row in &table.rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_excel_sheet(workbook: &mut XlsxWorkbook, name: &str, table: &Table) -> Result<()> {
    let header_format = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(name)?;

    for (col, header) in table.headers.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, header, &header_format)?;
    }

    for (row_index, row) in table.rows.iter().enumerate() {
        let row_num = (row_index + 1) as u32;
        for (col, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            worksheet.write_string(row_num, col as u16, fit_cell(value, row_num, col))?;
        }
    }
    Ok(())
}

/// Write loaded cells back at their original positions with their types.
/// Formulas come back as their cached values.
fn write_typed_sheet(workbook: &mut XlsxWorkbook, name: &str, range: &Range<DataType>) -> Result<()> {
    let date_format = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(name)?;

    let (first_row, first_col) = range.start().unwrap_or((0, 0));
    for (r, c, cell) in range.cells() {
        let row = first_row + r as u32;
        let col = (first_col as usize + c) as u16;
        match cell {
            DataType::Empty => {}
            DataType::Int(i) => {
                worksheet.write_number(row, col, *i as f64)?;
            }
            DataType::Float(f) => {
                worksheet.write_number(row, col, *f)?;
            }
            DataType::Bool(b) => {
                worksheet.write_boolean(row, col, *b)?;
            }
            DataType::DateTime(serial) => {
                worksheet.write_number_with_format(row, col, *serial, &date_format)?;
            }
            DataType::String(text) => {
                worksheet.write_string(row, col, fit_cell(text, row, col as usize))?;
            }
            other => {
                worksheet.write_string(row, col, other.to_string())?;
            }
        }
    }
    Ok(())
}

fn fit_cell(value: &str, row: u32, col: usize) -> String {
    if value.chars().count() <= MAX_CELL_CHARS {
        return value.to_string();
    }
    warn!(row, col, "Cell exceeds Excel's length limit, truncating");
    value.chars().take(MAX_CELL_CHARS).collect()
}
