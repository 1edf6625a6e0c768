use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("{operation} timed out after {budget_ms} ms")]
    TimeoutExceeded { operation: String, budget_ms: i64 },

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Malformed service result: {0}")]
    MalformedServiceResult(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl BotError {
    /// Generic expiry failure used when a bounded operation has no custom one.
    pub fn timed_out(operation: &str, budget_ms: i64) -> Self {
        BotError::TimeoutExceeded {
            operation: operation.to_string(),
            budget_ms,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BotError::TimeoutExceeded { .. })
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
