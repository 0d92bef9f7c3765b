//! # rustreview
//!
//! LLM-assisted literature review: scores the papers in a spreadsheet against
//! a research topic and writes the verdicts back next to them.
//!
//! ## Modules
//!
//! - [`sanitize`] - Quote-aware cleanup of model replies
//! - [`evaluator`] - Prompt, completion, parse and bounded retry per paper
//! - [`batch`] - Sequential row loop with per-row persistence
//! - [`llm`] - Completion service trait and OpenAI-compatible client
//! - [`sheet`] - Spreadsheet store (xlsx/csv)
//! - [`merge`] - Merge export tabs into a deduplicated worklist
//! - [`config`] - Configuration file and credential resolution
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustreview::config::Config;
//! use rustreview::evaluator::{Evaluator, EvaluatorConfig};
//! use rustreview::llm::{LlmConfig, OpenAiClient};
//! use rustreview::paper::PaperRecord;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.json".as_ref())?;
//!     let client = OpenAiClient::new(LlmConfig::from(&config))?;
//!     let evaluator = Evaluator::new(EvaluatorConfig::from(&config), client);
//!     let paper = PaperRecord::from_pairs(vec![("Title", "Points and badges"), ("Abstract", "...")]);
//!     let result = evaluator.evaluate(&paper).await;
//!     println!("{} - {}", result.score, result.reason);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod llm;
pub mod merge;
pub mod paper;
pub mod prompts;
pub mod sanitize;
pub mod sheet;

pub use error::{ReviewError, Result};
pub use evaluator::{EvaluationResult, Evaluator};
pub use sanitize::sanitize;
