//! External service seams.
//!
//! The adapter only talks to text analysis and OCR through the two traits in
//! this module. Concrete backends are resolved once at startup into a
//! [`ServiceRegistry`]; a backend that cannot be built is kept as
//! `Unavailable { reason }` so the process still starts and the failure
//! surfaces on first use.
//!
//! Backends are selected by `provider/model` strings:
//! - analysis: `openai/...`, `openrouter/...`, `ollama/...`, `lmstudio/...`,
//!   or any model with an explicit base URL
//! - OCR: the same chat providers (vision models), or `http/...` for a plain
//!   JSON endpoint answering `{ "success": bool, "text": string }`

mod analysis;
mod ocr;

pub use analysis::LlmAnalysisService;
pub use ocr::{JsonOcrService, VisionOcrService};

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{parse_provider_model, Config, KNOWN_OCR_PROVIDERS};
use crate::error::{BotError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Text => "text",
        }
    }
}

/// Binary payload handed to an OCR service. Always fully in memory.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub data: Bytes,
    pub content_type: Option<String>,
}

impl ImagePayload {
    pub fn content_type_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.content_type.as_deref().unwrap_or(fallback)
    }
}

/// What an OCR service reported, without runtime field probing downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrOutcome {
    Recognized(String),
    Failed { reason: String },
    Malformed { detail: String },
}

impl OcrOutcome {
    /// Classify a loosely shaped `{ success, text }` body.
    pub fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return OcrOutcome::Malformed {
                detail: "response is not a JSON object".to_string(),
            };
        };

        match object.get("success").and_then(Value::as_bool) {
            Some(true) => match object.get("text") {
                Some(Value::String(text)) => OcrOutcome::Recognized(text.clone()),
                Some(_) => OcrOutcome::Malformed {
                    detail: "`text` is not a string".to_string(),
                },
                None => OcrOutcome::Malformed {
                    detail: "`text` is missing".to_string(),
                },
            },
            Some(false) => OcrOutcome::Failed {
                reason: object
                    .get("error")
                    .or_else(|| object.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("service reported failure")
                    .to_string(),
            },
            None => OcrOutcome::Malformed {
                detail: "`success` is missing or not a boolean".to_string(),
            },
        }
    }
}

#[async_trait]
pub trait TextAnalysisService: Send + Sync {
    /// Analyze `text`. The result shape belongs to the service.
    async fn analyze_content(
        &self,
        text: &str,
        kind: ContentKind,
        cancel: CancellationToken,
    ) -> Result<Value>;
}

#[async_trait]
pub trait OcrService: Send + Sync {
    async fn extract_text_from_image(
        &self,
        image: ImagePayload,
        cancel: CancellationToken,
    ) -> Result<OcrOutcome>;
}

pub enum ServiceHandle<S: ?Sized> {
    Available(Arc<S>),
    Unavailable { reason: String },
}

impl<S: ?Sized> ServiceHandle<S> {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        ServiceHandle::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ServiceHandle::Available(_))
    }

    /// Hand out the service, or `ServiceUnavailable` with the startup reason.
    pub fn get(&self) -> Result<Arc<S>> {
        match self {
            ServiceHandle::Available(service) => Ok(Arc::clone(service)),
            ServiceHandle::Unavailable { reason } => {
                Err(BotError::ServiceUnavailable(reason.clone()))
            }
        }
    }
}

impl<S: ?Sized> Clone for ServiceHandle<S> {
    fn clone(&self) -> Self {
        match self {
            ServiceHandle::Available(service) => ServiceHandle::Available(Arc::clone(service)),
            ServiceHandle::Unavailable { reason } => ServiceHandle::Unavailable {
                reason: reason.clone(),
            },
        }
    }
}

impl<S: ?Sized> std::fmt::Debug for ServiceHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceHandle::Available(_) => f.write_str("Available"),
            ServiceHandle::Unavailable { reason } => {
                f.debug_struct("Unavailable").field("reason", reason).finish()
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServiceRegistry {
    pub analysis: ServiceHandle<dyn TextAnalysisService>,
    pub ocr: ServiceHandle<dyn OcrService>,
}

impl ServiceRegistry {
    pub fn new(
        analysis: ServiceHandle<dyn TextAnalysisService>,
        ocr: ServiceHandle<dyn OcrService>,
    ) -> Self {
        Self { analysis, ocr }
    }

    /// Resolve every backend once. Never fails: problems become
    /// `Unavailable` handles.
    pub fn from_config(config: &Config) -> Self {
        let analysis = match &config.analysis {
            None => ServiceHandle::unavailable("No text analysis model configured"),
            Some(analysis_config) => match LlmAnalysisService::new(analysis_config) {
                Ok(service) => {
                    info!(model = %analysis_config.model, "Text analysis backend initialized");
                    ServiceHandle::Available(Arc::new(service) as Arc<dyn TextAnalysisService>)
                }
                Err(e) => {
                    let reason = format!("Text analysis backend unavailable: {e}");
                    warn!("{}", reason);
                    ServiceHandle::unavailable(reason)
                }
            },
        };

        let ocr = match &config.ocr {
            None => ServiceHandle::unavailable("No OCR model configured"),
            Some(ocr_config) => {
                let (provider, _) = parse_provider_model(&ocr_config.model, KNOWN_OCR_PROVIDERS);
                let built: Result<Arc<dyn OcrService>> = if provider.eq_ignore_ascii_case("http")
                {
                    JsonOcrService::new(ocr_config)
                        .map(|service| Arc::new(service) as Arc<dyn OcrService>)
                } else {
                    VisionOcrService::new(ocr_config)
                        .map(|service| Arc::new(service) as Arc<dyn OcrService>)
                };

                match built {
                    Ok(service) => {
                        info!(model = %ocr_config.model, "OCR backend initialized");
                        ServiceHandle::Available(service)
                    }
                    Err(e) => {
                        let reason = format!("OCR backend unavailable: {e}");
                        warn!("{}", reason);
                        ServiceHandle::unavailable(reason)
                    }
                }
            }
        };

        Self { analysis, ocr }
    }
}
