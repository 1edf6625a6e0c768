//! The two operations a bot calls: text analysis and image OCR.
//!
//! Each call is a one-shot pipeline with no state carried between calls:
//! resolve the service handle, fetch the image if there is one, run the
//! service call with whatever the fetch left of the budget, then normalize
//! the result. One call never runs longer than one budget.
//!
//! Analysis failures are returned to the caller. OCR is soft-failing: any
//! failure reported by the OCR service itself (including running out of
//! budget) becomes an empty string, while fetch failures stay errors.

use std::path::PathBuf;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{operation_timeout_from_env, Config};
use crate::error::{BotError, Result};
use crate::fetch::ResourceFetcher;
use crate::models::{
    FetchedResource, ImageRequest, ImageSource, OperationOptions, OperationOutcome,
    OperationRequest, TextRequest,
};
use crate::providers::{ContentKind, ImagePayload, OcrOutcome, OcrService, ServiceRegistry};
use crate::timed::{TimeoutBudget, TimedOperation};

/// Where each call reads its budget from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetSource {
    /// `OPERATION_TIMEOUT_MS`, re-read on every call.
    Env,
    Fixed(TimeoutBudget),
}

impl BudgetSource {
    pub fn current(self) -> TimeoutBudget {
        match self {
            BudgetSource::Env => operation_timeout_from_env(),
            BudgetSource::Fixed(budget) => budget,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BotMediaAdapter {
    services: ServiceRegistry,
    fetcher: ResourceFetcher,
    budget: BudgetSource,
    shutdown: CancellationToken,
}

impl BotMediaAdapter {
    pub fn new(services: ServiceRegistry, fetcher: ResourceFetcher, budget: BudgetSource) -> Self {
        Self {
            services,
            fetcher,
            budget,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            ServiceRegistry::from_config(config),
            ResourceFetcher::new(&config.fetch)?,
            BudgetSource::Env,
        ))
    }

    /// Cancel in-flight operations when `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    /// Run the analysis service on `text` (missing text is sent as `""`) and
    /// return whatever it produced.
    pub async fn analyze_text_normalized(
        &self,
        text: Option<&str>,
        _options: &OperationOptions,
    ) -> Result<Value> {
        let service = self.services.analysis.get()?;
        let text = text.unwrap_or_default();
        let budget = self.budget.current();

        debug!(chars = text.chars().count(), budget_ms = budget.as_millis(), "Analyzing text");

        TimedOperation::new("text analysis", budget)
            .with_parent(&self.shutdown)
            .run(|token| async move {
                service
                    .analyze_content(text, ContentKind::Text, token)
                    .await
            })
            .await
    }

    /// OCR an image given by URL or bytes.
    ///
    /// Returns `""` when the service finds nothing or fails; returns an error
    /// when the service is not configured or the image cannot be fetched.
    pub async fn ocr_from_image_url_or_buffer(
        &self,
        source: ImageSource,
        options: &OperationOptions,
    ) -> Result<String> {
        let service = self.services.ocr.get()?;
        let budget = self.budget.current();
        // Fetch and recognition share one deadline.
        let deadline = budget.deadline_from(Instant::now());

        let resource = self
            .fetcher
            .fetch_until(source, options.mode, budget, deadline, &self.shutdown)
            .await?;
        let temp_file: Option<PathBuf> = resource.path().map(|path| path.to_path_buf());

        let result = self
            .recognize(service.as_ref(), resource, budget, deadline)
            .await;

        if let Some(path) = temp_file {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove fetched temp file");
            }
        }

        result
    }

    /// Dispatch a request of either kind.
    pub async fn execute(&self, request: OperationRequest) -> Result<OperationOutcome> {
        match request {
            OperationRequest::Text(TextRequest { text }) => self
                .analyze_text_normalized(Some(&text), &OperationOptions::default())
                .await
                .map(OperationOutcome::Analysis),
            OperationRequest::Image(ImageRequest { source, mode }) => self
                .ocr_from_image_url_or_buffer(source, &OperationOptions { mode })
                .await
                .map(OperationOutcome::Ocr),
        }
    }

    async fn recognize(
        &self,
        service: &dyn OcrService,
        resource: FetchedResource,
        budget: TimeoutBudget,
        deadline: Instant,
    ) -> Result<String> {
        let (data, content_type) = resource
            .into_bytes()
            .await
            .map_err(|e| BotError::Fetch(format!("Failed to read fetched image: {e}")))?;

        let payload = ImagePayload { data, content_type };

        let outcome = TimedOperation::new("ocr", budget)
            .with_parent(&self.shutdown)
            .until(deadline)
            .run(|token| service.extract_text_from_image(payload, token))
            .await;

        normalize_ocr(outcome)
    }
}

fn normalize_ocr(outcome: Result<OcrOutcome>) -> Result<String> {
    match outcome {
        Ok(OcrOutcome::Recognized(text)) => Ok(text),
        Ok(OcrOutcome::Failed { reason }) => {
            warn!(%reason, "OCR service reported failure, returning empty text");
            Ok(String::new())
        }
        Ok(OcrOutcome::Malformed { detail }) => {
            warn!(%detail, "OCR service returned a malformed result, returning empty text");
            Ok(String::new())
        }
        Err(e @ BotError::Cancelled(_)) => Err(e),
        Err(e) => {
            warn!(error = %e, timed_out = e.is_timeout(), "OCR call failed, returning empty text");
            Ok(String::new())
        }
    }
}
