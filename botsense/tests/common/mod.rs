#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use botsense::config::FetchConfig;
use botsense::error::{BotError, Result};
use botsense::fetch::ResourceFetcher;
use botsense::providers::{
    ContentKind, ImagePayload, OcrOutcome, OcrService, ServiceHandle, ServiceRegistry,
    TextAnalysisService,
};
use botsense::{BotMediaAdapter, BudgetSource, TimeoutBudget};

/// Deterministic analyzer that echoes its input and records every call.
#[derive(Default)]
pub struct EchoAnalyzer {
    pub calls: Mutex<Vec<(String, ContentKind)>>,
}

#[async_trait]
impl TextAnalysisService for EchoAnalyzer {
    async fn analyze_content(
        &self,
        text: &str,
        kind: ContentKind,
        _cancel: CancellationToken,
    ) -> Result<Value> {
        self.calls.lock().unwrap().push((text.to_string(), kind));
        Ok(json!({ "kind": kind.as_str(), "length": text.len(), "text": text }))
    }
}

/// Analyzer that never answers.
pub struct StuckAnalyzer;

#[async_trait]
impl TextAnalysisService for StuckAnalyzer {
    async fn analyze_content(
        &self,
        _text: &str,
        _kind: ContentKind,
        _cancel: CancellationToken,
    ) -> Result<Value> {
        std::future::pending().await
    }
}

pub struct FailingAnalyzer;

#[async_trait]
impl TextAnalysisService for FailingAnalyzer {
    async fn analyze_content(
        &self,
        _text: &str,
        _kind: ContentKind,
        _cancel: CancellationToken,
    ) -> Result<Value> {
        Err(BotError::Analysis("model overloaded".to_string()))
    }
}

/// OCR stub answering with a raw JSON body, classified like a real backend.
pub struct ScriptedOcr {
    pub body: Value,
    pub seen: Mutex<Vec<ImagePayload>>,
}

impl ScriptedOcr {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl OcrService for ScriptedOcr {
    async fn extract_text_from_image(
        &self,
        image: ImagePayload,
        _cancel: CancellationToken,
    ) -> Result<OcrOutcome> {
        self.seen.lock().unwrap().push(image);
        Ok(OcrOutcome::from_value(&self.body))
    }
}

pub struct StuckOcr;

#[async_trait]
impl OcrService for StuckOcr {
    async fn extract_text_from_image(
        &self,
        _image: ImagePayload,
        _cancel: CancellationToken,
    ) -> Result<OcrOutcome> {
        std::future::pending().await
    }
}

/// OCR stub that takes `delay` before recognizing `text`.
pub struct SlowOcr {
    pub delay: Duration,
    pub text: String,
}

#[async_trait]
impl OcrService for SlowOcr {
    async fn extract_text_from_image(
        &self,
        _image: ImagePayload,
        _cancel: CancellationToken,
    ) -> Result<OcrOutcome> {
        tokio::time::sleep(self.delay).await;
        Ok(OcrOutcome::Recognized(self.text.clone()))
    }
}

pub struct BrokenOcr;

#[async_trait]
impl OcrService for BrokenOcr {
    async fn extract_text_from_image(
        &self,
        _image: ImagePayload,
        _cancel: CancellationToken,
    ) -> Result<OcrOutcome> {
        Err(BotError::Ocr("connection reset".to_string()))
    }
}

pub fn analysis_handle(
    service: Option<Arc<dyn TextAnalysisService>>,
) -> ServiceHandle<dyn TextAnalysisService> {
    match service {
        Some(service) => ServiceHandle::Available(service),
        None => ServiceHandle::unavailable("analysis not configured"),
    }
}

pub fn ocr_handle(service: Option<Arc<dyn OcrService>>) -> ServiceHandle<dyn OcrService> {
    match service {
        Some(service) => ServiceHandle::Available(service),
        None => ServiceHandle::unavailable("ocr not configured"),
    }
}

pub fn adapter_with_budget(
    analysis: Option<Arc<dyn TextAnalysisService>>,
    ocr: Option<Arc<dyn OcrService>>,
    budget: BudgetSource,
) -> BotMediaAdapter {
    let fetcher = ResourceFetcher::new(&FetchConfig::default()).expect("fetcher");
    BotMediaAdapter::new(
        ServiceRegistry::new(analysis_handle(analysis), ocr_handle(ocr)),
        fetcher,
        budget,
    )
}

pub fn adapter(
    analysis: Option<Arc<dyn TextAnalysisService>>,
    ocr: Option<Arc<dyn OcrService>>,
) -> BotMediaAdapter {
    adapter_with_budget(
        analysis,
        ocr,
        BudgetSource::Fixed(TimeoutBudget::from_millis(2_000)),
    )
}

pub const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
