use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{BotError, Result};

/// How a fetched resource is handed back: in memory or as a temp file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    #[default]
    Buffer,
    File,
}

/// Per-call options. Only the fetch mode is honoured; the budget always comes
/// from process configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOptions {
    #[serde(default)]
    pub mode: FetchMode,
}

impl OperationOptions {
    pub fn file_mode() -> Self {
        Self {
            mode: FetchMode::File,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(Url),
    Bytes {
        data: Bytes,
        content_type: Option<String>,
    },
}

impl ImageSource {
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        ImageSource::Bytes {
            data: data.into(),
            content_type: None,
        }
    }

    /// Parse an `http(s)` URL or a base64 `data:` URI.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if let Some(rest) = input.strip_prefix("data:") {
            return Self::parse_data_uri(rest);
        }

        let url = Url::parse(input)?;
        match url.scheme() {
            "http" | "https" => Ok(ImageSource::Url(url)),
            other => Err(BotError::Validation(format!(
                "Unsupported image source scheme: {other}"
            ))),
        }
    }

    fn parse_data_uri(rest: &str) -> Result<Self> {
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| BotError::Validation("Data URI is missing its payload".to_string()))?;

        let Some(mime) = header.strip_suffix(";base64") else {
            return Err(BotError::Validation(
                "Only base64 data URIs are supported".to_string(),
            ));
        };

        let data = STANDARD
            .decode(payload.trim())
            .map_err(|e| BotError::Validation(format!("Invalid base64 in data URI: {e}")))?;

        Ok(ImageSource::Bytes {
            data: Bytes::from(data),
            content_type: Some(mime.to_string()).filter(|m| !m.is_empty()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRequest {
    pub text: String,
}

impl TextRequest {
    pub fn new(text: Option<&str>) -> Self {
        Self {
            text: text.unwrap_or_default().to_string(),
        }
    }

    /// Anything that is not a JSON string becomes the empty string.
    pub fn from_value(value: &Value) -> Self {
        Self::new(value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub source: ImageSource,
    pub mode: FetchMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationRequest {
    Text(TextRequest),
    Image(ImageRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Analysis(Value),
    Ocr(String),
}

#[derive(Debug)]
pub enum FetchedPayload {
    Buffer(Bytes),
    File(PathBuf),
}

/// Result of one fetch. Not `Clone`: it is moved into exactly one consumer.
#[derive(Debug)]
pub struct FetchedResource {
    pub payload: FetchedPayload,
    pub content_type: Option<String>,
}

impl FetchedResource {
    pub fn len_hint(&self) -> Option<usize> {
        match &self.payload {
            FetchedPayload::Buffer(bytes) => Some(bytes.len()),
            FetchedPayload::File(_) => None,
        }
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        match &self.payload {
            FetchedPayload::File(path) => Some(path),
            FetchedPayload::Buffer(_) => None,
        }
    }

    /// Materialize the payload in memory, reading the temp file if needed.
    /// The file itself is left in place.
    pub async fn into_bytes(self) -> Result<(Bytes, Option<String>)> {
        let bytes = match self.payload {
            FetchedPayload::Buffer(bytes) => bytes,
            FetchedPayload::File(path) => Bytes::from(tokio::fs::read(&path).await?),
        };
        Ok((bytes, self.content_type))
    }
}
