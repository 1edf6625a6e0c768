use serde::Deserialize;
use std::env;

use crate::timed::TimeoutBudget;

pub const OPERATION_TIMEOUT_ENV: &str = "OPERATION_TIMEOUT_MS";
pub const DEFAULT_OPERATION_TIMEOUT_MS: i64 = 120_000;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_non_empty(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

/// Read the shared operation budget straight from the environment.
///
/// Called once per operation, so a changed `OPERATION_TIMEOUT_MS` applies to
/// the next call without a restart.
pub fn operation_timeout_from_env() -> TimeoutBudget {
    TimeoutBudget::from_millis(parse_env_or(
        OPERATION_TIMEOUT_ENV,
        DEFAULT_OPERATION_TIMEOUT_MS,
    ))
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub operation: OperationConfig,
    pub fetch: FetchConfig,
    pub analysis: Option<AnalysisConfig>,
    pub ocr: Option<OcrConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationConfig {
    pub timeout_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    pub max_bytes: u64,
    pub user_agent: String,
}

/// Text analysis backend, selected by a `provider/model` string.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub prompt: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_bytes: 20 * 1024 * 1024,
            user_agent: format!("botsense/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let fetch_defaults = FetchConfig::default();

        Self {
            operation: OperationConfig {
                timeout_ms: parse_env_or(OPERATION_TIMEOUT_ENV, DEFAULT_OPERATION_TIMEOUT_MS),
            },
            fetch: FetchConfig {
                max_bytes: parse_env_or("FETCH_MAX_BYTES", fetch_defaults.max_bytes),
                user_agent: env_non_empty("FETCH_USER_AGENT")
                    .unwrap_or(fetch_defaults.user_agent),
            },
            analysis: env_non_empty("ANALYSIS_MODEL").map(|model| AnalysisConfig {
                model,
                api_key: env_non_empty("ANALYSIS_API_KEY"),
                base_url: env_non_empty("ANALYSIS_BASE_URL"),
            }),
            ocr: env_non_empty("OCR_MODEL").map(|model| OcrConfig {
                model,
                api_key: env_non_empty("OCR_API_KEY"),
                base_url: env_non_empty("OCR_BASE_URL"),
                prompt: env_non_empty("OCR_PROMPT"),
            }),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// Providers that speak the OpenAI chat completions protocol.
pub const KNOWN_CHAT_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio"];

/// OCR providers: the chat providers (vision models) plus a plain JSON endpoint.
pub const KNOWN_OCR_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio", "http"];

/// Split a `provider/model` string into its parts.
///
/// Strings without a known provider prefix are returned as `("local", model)`.
pub fn parse_provider_model<'a>(model: &'a str, known: &[&str]) -> (&'a str, &'a str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if known.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    ("local", model)
}
