use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{multipart, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ImagePayload, OcrOutcome, OcrService};
use crate::config::{parse_provider_model, OcrConfig, KNOWN_OCR_PROVIDERS};
use crate::error::{BotError, Result};

const DEFAULT_OCR_PROMPT: &str = "Extract all text from this image. Return only the extracted text without any explanations or formatting.";

/// OCR through a vision model on an OpenAI-compatible chat endpoint.
#[derive(Clone, Debug)]
pub struct VisionOcrService {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    prompt: String,
}

/// OCR through an HTTP endpoint that takes a multipart `image` field and
/// answers `{ "success": bool, "text": string }`.
#[derive(Clone, Debug)]
pub struct JsonOcrService {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

fn default_base_url(provider: &str) -> &'static str {
    match provider {
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        "lmstudio" => "http://localhost:1234/v1",
        _ => "https://api.openai.com/v1",
    }
}

fn build_client() -> Result<Client> {
    Client::builder()
        .build()
        .map_err(|e| BotError::Ocr(format!("Failed to create HTTP client: {e}")))
}

impl VisionOcrService {
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let (provider, model) = parse_provider_model(&config.model, KNOWN_OCR_PROVIDERS);
        let provider = provider.to_lowercase();

        if provider == "local" && config.base_url.is_none() {
            return Err(BotError::Ocr(format!(
                "Unknown provider in model: {}",
                config.model
            )));
        }

        let needs_api_key = matches!(provider.as_str(), "openai" | "openrouter");
        if needs_api_key && config.api_key.is_none() {
            return Err(BotError::Ocr(format!(
                "API key required for {provider} vision OCR"
            )));
        }

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(&provider).to_string());

        Ok(Self {
            client: build_client()?,
            api_key: config.api_key.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: if provider == "local" {
                config.model.clone()
            } else {
                model.to_string()
            },
            prompt: config
                .prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_OCR_PROMPT.to_string()),
        })
    }

    fn build_request(&self, image: &ImagePayload) -> ChatRequest {
        let data_url = format!(
            "data:{};base64,{}",
            image.content_type_or("image/png"),
            STANDARD.encode(&image.data)
        );

        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: self.prompt.clone(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: 4096,
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<OcrOutcome> {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(request);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| BotError::Ocr(format!("Vision OCR request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Ok(OcrOutcome::Failed {
                reason: format!("{status} - {body}"),
            });
        }

        let chat_response: ChatResponse = match resp.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                return Ok(OcrOutcome::Malformed {
                    detail: format!("Failed to parse response: {e}"),
                })
            }
        };

        Ok(chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| OcrOutcome::Recognized(text.trim().to_string()))
            .unwrap_or_else(|| OcrOutcome::Malformed {
                detail: "No content in vision response".to_string(),
            }))
    }
}

#[async_trait]
impl OcrService for VisionOcrService {
    async fn extract_text_from_image(
        &self,
        image: ImagePayload,
        cancel: CancellationToken,
    ) -> Result<OcrOutcome> {
        debug!(size = image.data.len(), model = %self.model, "Sending image to vision OCR");
        let request = self.build_request(&image);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BotError::Cancelled("vision OCR".to_string())),
            outcome = self.send(&request) => outcome,
        }
    }
}

impl JsonOcrService {
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let endpoint = config
            .base_url
            .clone()
            .ok_or_else(|| BotError::Ocr("OCR_BASE_URL required for http OCR".to_string()))?;

        Ok(Self {
            client: build_client()?,
            api_key: config.api_key.clone(),
            endpoint,
        })
    }

    async fn send(&self, image: ImagePayload) -> Result<OcrOutcome> {
        let content_type = image.content_type_or("application/octet-stream").to_string();
        let extension = mime_guess::get_mime_extensions_str(&content_type)
            .and_then(|extensions| extensions.first())
            .copied()
            .unwrap_or("bin");

        let part = multipart::Part::bytes(image.data.to_vec())
            .file_name(format!("image.{extension}"))
            .mime_str(&content_type)
            .map_err(|e| BotError::Ocr(format!("Invalid image content type: {e}")))?;
        let form = multipart::Form::new().part("image", part);

        let mut builder = self.client.post(&self.endpoint).multipart(form);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| BotError::Ocr(format!("OCR request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Ok(OcrOutcome::Failed {
                reason: format!("{status} - {body}"),
            });
        }

        match resp.json::<Value>().await {
            Ok(body) => Ok(OcrOutcome::from_value(&body)),
            Err(e) => Ok(OcrOutcome::Malformed {
                detail: format!("Response is not JSON: {e}"),
            }),
        }
    }
}

#[async_trait]
impl OcrService for JsonOcrService {
    async fn extract_text_from_image(
        &self,
        image: ImagePayload,
        cancel: CancellationToken,
    ) -> Result<OcrOutcome> {
        debug!(size = image.data.len(), endpoint = %self.endpoint, "Sending image to OCR endpoint");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BotError::Cancelled("OCR".to_string())),
            outcome = self.send(image) => outcome,
        }
    }
}
