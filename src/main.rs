//! rustreview - LLM-assisted literature review
//!
//! Scores every paper in a spreadsheet against a research topic and writes
//! the score, reason, notes and added value back to a `_reviewed` copy.
//!
//! ## Usage
//!
//! ### Review
//! ```bash
//! rustreview review --config config.json
//! ```
//!
//! ### Merge export tabs first
//! ```bash
//! rustreview merge --input literature.xlsx
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! rustreview serve --port 3000
//! ```

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use clap::{Parser, Subcommand};
use rustreview::{
    batch::{self, BatchOptions},
    config::Config,
    evaluator::{EvaluationResult, Evaluator, EvaluatorConfig},
    llm::{LlmConfig, OpenAiClient},
    merge,
    paper::PaperRecord,
    sanitize,
    sheet,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// LLM-assisted literature review
#[derive(Parser)]
#[command(name = "rustreview")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging (raw and sanitized model replies)
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Review every paper in the configured sheet
    Review {
        /// Configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Output file (default: input name with a _reviewed suffix)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after reviewing this many papers
        #[arg(long)]
        limit: Option<usize>,

        /// Resume a run: continue from the output file if it exists and skip
        /// rows that already have a relevance score
        #[arg(long)]
        skip_processed: bool,
    },

    /// Merge tabs starting with a digit into one deduplicated tab
    Merge {
        /// Workbook to merge (rewritten in place)
        #[arg(short, long)]
        input: PathBuf,

        /// Name of the merged tab
        #[arg(long, default_value = merge::MERGED_SHEET_NAME)]
        sheet: String,
    },

    /// Sanitize a model reply (file or stdin) and print the result
    Sanitize {
        /// File holding the raw reply; reads stdin when omitted
        file: Option<PathBuf>,
    },

    /// Run as HTTP server
    Serve {
        /// Configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.log_json {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    match cli.command {
        Commands::Review {
            config,
            output,
            limit,
            skip_processed,
        } => run_review(config, output, limit, skip_processed).await,
        Commands::Merge { input, sheet } => run_merge(input, sheet),
        Commands::Sanitize { file } => run_sanitize(file),
        Commands::Serve { config, port, host } => run_server(config, host, port).await,
    }
}

// ============================================================================
// Review
// ============================================================================

async fn run_review(
    config_path: PathBuf,
    output: Option<PathBuf>,
    limit: Option<usize>,
    skip_processed: bool,
) -> Result<()> {
    let config = Config::load(&config_path).context("Failed to load configuration")?;
    info!(config = ?config, "Configuration loaded");

    let input_path = config.excel_file_path.clone();
    let output_path = output.unwrap_or_else(|| sheet::reviewed_path(&input_path));
    sheet::ensure_writable(&output_path)?;

    let mut table =
        batch::load_worklist(&input_path, &output_path, &config.sheet_name, skip_processed)
            .with_context(|| {
                format!(
                    "Failed to read sheet '{}' from {}",
                    config.sheet_name,
                    input_path.display()
                )
            })?;

    println!("Reviewing {} rows from {}", table.row_count(), input_path.display());
    println!("Results are saved to {} after every row", output_path.display());

    let client = OpenAiClient::new(LlmConfig::from(&config))?;
    let evaluator = Evaluator::new(EvaluatorConfig::from(&config), client);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing the current row before stopping");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let options = BatchOptions {
        required_fields: config.required_fields.clone(),
        output_path: output_path.clone(),
        output_sheet: config.sheet_name.clone(),
        limit,
        skip_processed,
    };

    let summary = batch::run_batch(&mut table, &evaluator, &options, &stop).await;

    println!(
        "\n✓ Review {}: {} evaluated, {} skipped, {} API errors, {} parse errors",
        if summary.cancelled { "interrupted" } else { "complete" },
        summary.evaluated,
        summary.skipped,
        summary.api_errors,
        summary.parse_errors,
    );
    if summary.save_failures > 0 {
        println!(
            "⚠ {} of {} saves to {} failed",
            summary.save_failures,
            summary.evaluated,
            output_path.display()
        );
    } else if summary.evaluated > 0 {
        println!("Results saved to {}", output_path.display());
    }

    Ok(())
}

// ============================================================================
// Merge / Sanitize
// ============================================================================

fn run_merge(input: PathBuf, sheet_name: String) -> Result<()> {
    let summary = merge::merge_workbook(&input, &sheet_name)
        .with_context(|| format!("Failed to merge {}", input.display()))?;

    println!("Merged sheets: {}", summary.sheets.join(", "));
    println!(
        "{} rows in, {} rows after removing duplicates",
        summary.rows_in, summary.rows_out
    );
    println!("Merging completed successfully! Written to tab '{}'", sheet_name);
    Ok(())
}

fn run_sanitize(file: Option<PathBuf>) -> Result<()> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?,
    };

    if !sanitize::is_balanced(&raw) {
        warn!(
            quotes = sanitize::quote_count(&raw),
            "Odd number of quotes, quoted and unquoted text may be misaligned"
        );
    }
    println!("{}", sanitize::sanitize(&raw));
    Ok(())
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(config_path: PathBuf, host: String, port: u16) -> Result<()> {
    let config = Config::load(&config_path).context("Failed to load configuration")?;
    let client = OpenAiClient::new(LlmConfig::from(&config))?;

    info!(host = %host, port = port, "Starting HTTP server");
    println!("Starting server at http://{}:{}", host, port);

    let app_state = Arc::new(AppState {
        evaluator: Mutex::new(Evaluator::new(EvaluatorConfig::from(&config), client)),
        required_fields: config.required_fields.clone(),
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/sanitize", post(sanitize_handler))
        .route("/evaluate", post(evaluate_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}

struct AppState {
    // Locked per request so papers are evaluated one at a time
    evaluator: Mutex<Evaluator<OpenAiClient>>,
    required_fields: Vec<String>,
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct SanitizeRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct SanitizeResponse {
    sanitized: String,
    balanced: bool,
}

async fn sanitize_handler(Json(req): Json<SanitizeRequest>) -> Json<SanitizeResponse> {
    Json(SanitizeResponse {
        sanitized: sanitize::sanitize(&req.text),
        balanced: sanitize::is_balanced(&req.text),
    })
}

/// Evaluate one paper given as a field map
async fn evaluate_handler(
    State(state): State<Arc<AppState>>,
    Json(fields): Json<BTreeMap<String, String>>,
) -> Result<Json<EvaluationResult>, (StatusCode, String)> {
    let paper = PaperRecord::from_pairs(fields);
    let missing: Vec<&str> = state
        .required_fields
        .iter()
        .map(|f| f.as_str())
        .filter(|f| !paper.has(f))
        .collect();
    if !missing.is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Missing required fields: {}", missing.join(", ")),
        ));
    }

    info!(title = %paper.title(), "Evaluate request");
    let evaluator = state.evaluator.lock().await;
    Ok(Json(evaluator.evaluate(&paper).await))
}
