//! Sequential review of every row in a table.
//!
//! One row is fully evaluated (retries included) before the next starts, and
//! the whole table is written to the output file after each evaluated row so
//! partial progress survives a crash.

use crate::evaluator::{EvaluationResult, Evaluator, Outcome};
use crate::llm::CompletionService;
use crate::paper::{PaperRecord, NOT_AVAILABLE};
use crate::sheet::Table;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info};

pub const SCORE_COLUMN: &str = "Relevance Score";
pub const REASON_COLUMN: &str = "Reason";
pub const NOTES_COLUMN: &str = "Notes";
pub const ADDED_VALUE_COLUMN: &str = "Added Value";

/// Result columns, in the order they are appended
pub const RESULT_COLUMNS: &[&str] = &[SCORE_COLUMN, REASON_COLUMN, NOTES_COLUMN, ADDED_VALUE_COLUMN];

/// Initial value of result cells for rows not yet evaluated
pub const NOT_PROCESSED: &str = "not processed yet";

/// Where and how to write results
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub required_fields: Vec<String>,
    pub output_path: PathBuf,
    /// Sheet name used when the output is an Excel workbook
    pub output_sheet: String,
    /// Stop after this many evaluated rows
    pub limit: Option<usize>,
    /// Skip rows whose score cell already holds a result
    pub skip_processed: bool,
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub evaluated: usize,
    pub skipped: usize,
    pub api_errors: usize,
    pub parse_errors: usize,
    pub saved_ok: usize,
    pub save_failures: usize,
    pub cancelled: bool,
}

/// Table to review. When resuming and the output file already exists, the
/// output is loaded so rows scored by an earlier run are recognised.
pub fn load_worklist(
    input: &Path,
    output: &Path,
    sheet_name: &str,
    resume: bool,
) -> crate::Result<Table> {
    if resume && output.exists() {
        info!(path = %output.display(), "Resuming from previous output");
        return Table::load(output, sheet_name);
    }
    Table::load(input, sheet_name)
}

/// Whether every required field is a column with a non-blank value in `row`
pub fn has_required_fields(table: &Table, row: usize, required: &[String]) -> bool {
    required
        .iter()
        .all(|field| table.get(row, field).is_some_and(|v| !v.trim().is_empty()))
}

/// Paper record built from every column of `row`
pub fn paper_record(table: &Table, row: usize) -> PaperRecord {
    PaperRecord::from_pairs(table.row_pairs(row).unwrap_or_default())
}

fn already_processed(table: &Table, row: usize) -> bool {
    table
        .get(row, SCORE_COLUMN)
        .is_some_and(|v| !v.trim().is_empty() && v != NOT_PROCESSED)
}

fn write_result(table: &mut Table, row: usize, result: &EvaluationResult) -> crate::Result<()> {
    let cell = |v: &str| {
        if v.is_empty() {
            NOT_AVAILABLE.to_string()
        } else {
            v.to_string()
        }
    };
    table.set(row, SCORE_COLUMN, cell(&result.score))?;
    table.set(row, REASON_COLUMN, cell(&result.reason))?;
    table.set(row, NOTES_COLUMN, cell(&result.notes))?;
    table.set(row, ADDED_VALUE_COLUMN, cell(&result.added_value))?;
    Ok(())
}

/// Evaluate every eligible row of `table` in order.
///
/// `stop` is checked before each row; a row that has started always
/// finishes. Save failures are logged and counted, never fatal.
pub async fn run_batch<C: CompletionService>(
    table: &mut Table,
    evaluator: &Evaluator<C>,
    options: &BatchOptions,
    stop: &AtomicBool,
) -> BatchSummary {
    let mut summary = BatchSummary::default();

    for column in RESULT_COLUMNS {
        table.ensure_column(column, NOT_PROCESSED);
    }

    info!(
        rows = table.row_count(),
        output = %options.output_path.display(),
        "Starting review"
    );

    for row in 0..table.row_count() {
        if stop.load(Ordering::SeqCst) {
            info!(row, "Stop requested, not starting further rows");
            summary.cancelled = true;
            break;
        }
        if options.limit.is_some_and(|limit| summary.evaluated >= limit) {
            info!(limit = summary.evaluated, "Row limit reached");
            break;
        }

        if !has_required_fields(table, row, &options.required_fields) {
            info!(row, "Skipping row due to missing required fields");
            summary.skipped += 1;
            continue;
        }
        if options.skip_processed && already_processed(table, row) {
            debug!(row, "Skipping row that already has a score");
            summary.skipped += 1;
            continue;
        }

        let paper = paper_record(table, row);
        info!(row, paper = row + 1, title = %paper.title(), "Reviewing paper");
        match serde_json::to_string(&paper) {
            Ok(payload) => debug!(row, payload = %payload, "Paper payload"),
            Err(e) => debug!(row, error = %e, "Could not serialize paper payload"),
        }

        let evaluation = evaluator.evaluate_detailed(&paper).await;
        match evaluation.outcome {
            Outcome::ApiError => summary.api_errors += 1,
            Outcome::ParseError { .. } => summary.parse_errors += 1,
            Outcome::Parsed { .. } => {}
        }
        summary.evaluated += 1;

        if let Err(e) = write_result(table, row, &evaluation.result) {
            error!(row, error = %e, "Failed to store evaluation in table");
        }

        match table.save(&options.output_path, &options.output_sheet) {
            Ok(()) => {
                summary.saved_ok += 1;
                info!(row, path = %options.output_path.display(), "Review saved");
            }
            Err(e) => {
                summary.save_failures += 1;
                error!(row, error = %e, "Failed to save the updated table");
            }
        }
    }

    info!(
        evaluated = summary.evaluated,
        skipped = summary.skipped,
        api_errors = summary.api_errors,
        parse_errors = summary.parse_errors,
        save_failures = summary.save_failures,
        cancelled = summary.cancelled,
        "Review finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ReviewError, Result};
    use crate::evaluator::EvaluatorConfig;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records prompts; answers from a fixed reply or fails
    struct Recorder {
        reply: Option<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn answering(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<'a> CompletionService for &'a Recorder {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone().ok_or_else(|| ReviewError::Api {
                code: 500,
                message: "boom".to_string(),
            })
        }
    }

    const REPLY: &str = "{\n\"score\": \"85%\",\n\"reason\": \"Good fit.\",\n\"notes\": \"- a\n- b\",\n\"added value\": \"Useful.\"\n}";

    fn evaluator(service: &Recorder) -> Evaluator<&Recorder> {
        Evaluator::new(
            EvaluatorConfig {
                research_topic: "gamification".to_string(),
                research_topic_note: "Stay on topic.".to_string(),
                max_attempts: 2,
            },
            service,
        )
    }

    fn table() -> Table {
        Table::new(
            vec!["Title".to_string(), "Abstract".to_string()],
            vec![
                vec!["Badges".to_string(), "About badges".to_string()],
                vec!["No abstract".to_string(), "  ".to_string()],
                vec!["Points".to_string(), "About points".to_string()],
            ],
        )
    }

    fn options(dir: &TempDir) -> BatchOptions {
        BatchOptions {
            required_fields: vec!["Title".to_string(), "Abstract".to_string()],
            output_path: dir.path().join("papers_reviewed.csv"),
            output_sheet: "Sheet1".to_string(),
            limit: None,
            skip_processed: false,
        }
    }

    #[tokio::test]
    async fn test_batch_evaluates_and_skips() -> Result<()> {
        let dir = TempDir::new()?;
        let service = Recorder::answering(REPLY);
        let mut table = table();
        let opts = options(&dir);

        let summary = run_batch(&mut table, &evaluator(&service), &opts, &AtomicBool::new(false)).await;

        assert_eq!(summary.evaluated, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.saved_ok, 2);
        assert!(!summary.cancelled);

        let prompts = service.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts.iter().all(|p| !p.contains("No abstract")));

        assert_eq!(table.get(0, SCORE_COLUMN), Some("85%"));
        assert_eq!(table.get(0, NOTES_COLUMN), Some("- a\n- b"));
        assert_eq!(table.get(1, SCORE_COLUMN), Some(NOT_PROCESSED));
        assert_eq!(table.get(2, ADDED_VALUE_COLUMN), Some("Useful."));

        let saved = Table::load(&opts.output_path, "Sheet1")?;
        assert_eq!(saved.headers(), table.headers());
        assert_eq!(saved.get(0, NOTES_COLUMN), Some("- a\n- b"));
        assert_eq!(saved.get(1, SCORE_COLUMN), Some(NOT_PROCESSED));
        Ok(())
    }

    #[tokio::test]
    async fn test_skipped_row_keeps_prior_values() -> Result<()> {
        let dir = TempDir::new()?;
        let service = Recorder::answering(REPLY);
        let mut table = table();
        table.set(1, SCORE_COLUMN, "40%")?;

        run_batch(&mut table, &evaluator(&service), &options(&dir), &AtomicBool::new(false)).await;
        assert_eq!(table.get(1, SCORE_COLUMN), Some("40%"));
        assert_eq!(table.get(1, REASON_COLUMN), Some(NOT_PROCESSED));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_required_column_skips_all() -> Result<()> {
        let dir = TempDir::new()?;
        let service = Recorder::answering(REPLY);
        let mut table = table();
        let mut opts = options(&dir);
        opts.required_fields.push("Keywords".to_string());

        let summary = run_batch(&mut table, &evaluator(&service), &opts, &AtomicBool::new(false)).await;
        assert_eq!(summary.evaluated, 0);
        assert_eq!(summary.skipped, 3);
        assert!(service.prompts().is_empty());
        assert!(!opts.output_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_api_errors_become_sentinels() -> Result<()> {
        let dir = TempDir::new()?;
        let service = Recorder::failing();
        let mut table = table();

        let summary =
            run_batch(&mut table, &evaluator(&service), &options(&dir), &AtomicBool::new(false)).await;
        assert_eq!(summary.api_errors, 2);
        assert_eq!(service.prompts().len(), 2);
        assert_eq!(table.get(0, SCORE_COLUMN), Some("-"));
        assert_eq!(table.get(0, REASON_COLUMN), Some("API error"));
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_flag_and_limit() -> Result<()> {
        let dir = TempDir::new()?;
        let service = Recorder::answering(REPLY);

        let mut stopped = table();
        let summary =
            run_batch(&mut stopped, &evaluator(&service), &options(&dir), &AtomicBool::new(true)).await;
        assert!(summary.cancelled);
        assert_eq!(summary.evaluated, 0);

        let mut limited = table();
        let mut opts = options(&dir);
        opts.limit = Some(1);
        let summary = run_batch(&mut limited, &evaluator(&service), &opts, &AtomicBool::new(false)).await;
        assert_eq!(summary.evaluated, 1);
        assert_eq!(limited.get(2, SCORE_COLUMN), Some(NOT_PROCESSED));
        Ok(())
    }

    #[tokio::test]
    async fn test_skip_processed_resumes() -> Result<()> {
        let dir = TempDir::new()?;
        let service = Recorder::answering(REPLY);
        let mut table = table();
        table.ensure_column(SCORE_COLUMN, NOT_PROCESSED);
        table.set(0, SCORE_COLUMN, "10%")?;
        let mut opts = options(&dir);
        opts.skip_processed = true;

        let summary = run_batch(&mut table, &evaluator(&service), &opts, &AtomicBool::new(false)).await;
        assert_eq!(summary.evaluated, 1);
        assert_eq!(table.get(0, SCORE_COLUMN), Some("10%"));
        assert_eq!(table.get(2, SCORE_COLUMN), Some("85%"));
        Ok(())
    }

    #[tokio::test]
    async fn test_save_failure_is_not_fatal() -> Result<()> {
        let dir = TempDir::new()?;
        let service = Recorder::answering(REPLY);
        let mut table = table();
        let mut opts = options(&dir);
        opts.output_path = dir.path().join("missing-dir").join("out.csv");

        let summary = run_batch(&mut table, &evaluator(&service), &opts, &AtomicBool::new(false)).await;
        assert_eq!(summary.evaluated, 2);
        assert_eq!(summary.save_failures, 2);
        assert_eq!(table.get(2, SCORE_COLUMN), Some("85%"));
        Ok(())
    }

    #[test]
    fn test_load_worklist_prefers_output_when_resuming() -> Result<()> {
        let dir = TempDir::new()?;
        let input = dir.path().join("papers.csv");
        let output = dir.path().join("papers_reviewed.csv");
        table().save(&input, "Sheet1")?;

        // nothing written yet: resume falls back to the input
        let fresh = load_worklist(&input, &output, "Sheet1", true)?;
        assert_eq!(fresh.get(0, SCORE_COLUMN), None);

        let mut reviewed = table();
        reviewed.set(0, SCORE_COLUMN, "10%")?;
        reviewed.save(&output, "Sheet1")?;

        let resumed = load_worklist(&input, &output, "Sheet1", true)?;
        assert_eq!(resumed.get(0, SCORE_COLUMN), Some("10%"));
        let restarted = load_worklist(&input, &output, "Sheet1", false)?;
        assert_eq!(restarted.get(0, SCORE_COLUMN), None);
        Ok(())
    }

    #[test]
    fn test_paper_record_from_row() {
        let record = paper_record(&table(), 1);
        assert_eq!(record.title(), "No abstract");
        assert_eq!(record.abstract_text(), "N/A");
        assert_eq!(paper_record(&table(), 10), PaperRecord::default());
    }
}
