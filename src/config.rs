//! Review configuration.
//!
//! Loaded from a JSON file (default `config.json`). The completion-service
//! credential is taken from `OPENAI_API_KEY` first and falls back to the
//! file's `api_key`; a missing or placeholder credential is fatal.

use crate::error::{ReviewError, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Environment variable checked before the config file credential
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Value shipped in the sample config; treated as unset
pub const API_KEY_PLACEHOLDER: &str = "YOUR_API_KEY_HERE";

/// Keys that must be present in the config file
pub const REQUIRED_KEYS: &[&str] = &["api_key", "excel_file_path", "sheet_name", "research_topic"];

pub const DEFAULT_TOPIC_NOTE: &str = "Keep the focus on this specific topic.";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_MAX_TOKENS: u32 = 300;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

fn default_required_fields() -> Vec<String> {
    vec!["Title".to_string(), "Abstract".to_string()]
}

/// Raw file shape; `api_key` may be overridden by the environment
#[derive(Debug, Deserialize)]
struct ConfigFile {
    api_key: Option<String>,
    excel_file_path: PathBuf,
    sheet_name: String,
    research_topic: String,
    research_topic_note: Option<String>,
    #[serde(default = "default_required_fields")]
    required_fields: Vec<String>,
    base_url: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    max_attempts: Option<u32>,
}

/// Validated configuration
#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    pub excel_file_path: PathBuf,
    pub sheet_name: String,
    pub research_topic: String,
    pub research_topic_note: String,
    pub required_fields: Vec<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_attempts: u32,
}

// Hand-written so the credential never reaches a log line
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"[REDACTED]")
            .field("excel_file_path", &self.excel_file_path)
            .field("sheet_name", &self.sheet_name)
            .field("research_topic", &self.research_topic)
            .field("research_topic_note", &self.research_topic_note)
            .field("required_fields", &self.required_fields)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl Config {
    /// Load and validate a config file, resolving the credential from the
    /// process environment.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ReviewError::Config(format!(
                "Configuration file {} does not exist",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content, |name| std::env::var(name).ok())
    }

    /// Parse and validate config JSON. `env` looks up environment variables.
    pub fn from_json_str<F>(content: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value: serde_json::Value = serde_json::from_str(content)?;
        let object = value
            .as_object()
            .ok_or_else(|| ReviewError::Config("Configuration must be a JSON object".to_string()))?;

        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|k| !object.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            return Err(ReviewError::Config(format!(
                "Missing required config keys: {}",
                missing.join(", ")
            )));
        }

        let file: ConfigFile = serde_json::from_value(value)?;

        let api_key = env(API_KEY_ENV)
            .filter(|k| !k.trim().is_empty())
            .or(file.api_key)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && k != API_KEY_PLACEHOLDER)
            .ok_or_else(|| {
                ReviewError::Config(format!(
                    "API key is not set. Please set {} or api_key in the config file",
                    API_KEY_ENV
                ))
            })?;

        let base_url = file
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Url::parse(&base_url)
            .map_err(|e| ReviewError::Config(format!("Invalid base_url {}: {}", base_url, e)))?;

        if file.required_fields.is_empty() {
            return Err(ReviewError::Config(
                "required_fields must name at least one column".to_string(),
            ));
        }

        Ok(Self {
            api_key,
            excel_file_path: file.excel_file_path,
            sheet_name: file.sheet_name,
            research_topic: file.research_topic,
            research_topic_note: file
                .research_topic_note
                .unwrap_or_else(|| DEFAULT_TOPIC_NOTE.to_string()),
            required_fields: file
                .required_fields
                .into_iter()
                .map(|f| f.trim().to_string())
                .collect(),
            base_url,
            model: file.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: file.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: file.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_attempts: file.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1),
        })
    }
}
