use std::io::Write;
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use reqwest::header::CONTENT_TYPE;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::config::FetchConfig;
use crate::error::{BotError, Result};
use crate::models::{FetchMode, FetchedPayload, FetchedResource, ImageSource};
use crate::timed::{TimeoutBudget, TimedOperation};

const OCTET_STREAM: &str = "application/octet-stream";

/// Turns an image reference into bytes that are ready to hand to a service.
#[derive(Clone, Debug)]
pub struct ResourceFetcher {
    http_client: reqwest::Client,
    max_bytes: u64,
}

impl ResourceFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| BotError::Fetch(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            max_bytes: config.max_bytes,
        })
    }

    /// Fetch `source` fully, bounded by `budget`.
    ///
    /// In `File` mode the bytes are written to a persisted temp file and the
    /// caller is responsible for removing it.
    pub async fn fetch(
        &self,
        source: ImageSource,
        mode: FetchMode,
        budget: TimeoutBudget,
        cancel: &CancellationToken,
    ) -> Result<FetchedResource> {
        let deadline = budget.deadline_from(Instant::now());
        self.fetch_until(source, mode, budget, deadline, cancel)
            .await
    }

    /// Like [`fetch`](Self::fetch), but the download must also finish before
    /// `deadline`, which the caller shares with later steps.
    pub async fn fetch_until(
        &self,
        source: ImageSource,
        mode: FetchMode,
        budget: TimeoutBudget,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<FetchedResource> {
        let (bytes, content_type) = match source {
            ImageSource::Bytes { data, content_type } => {
                let content_type = content_type.or_else(|| sniff_content_type(&data));
                (data, content_type)
            }
            ImageSource::Url(url) => {
                let expiry = BotError::Fetch(format!(
                    "{url} could not be fully read within {} ms",
                    budget.as_millis()
                ));
                TimedOperation::new("fetch", budget)
                    .on_expiry(expiry)
                    .with_parent(cancel)
                    .until(deadline)
                    .run(|_| self.download(&url))
                    .await?
            }
        };

        debug!(
            size = bytes.len(),
            content_type = content_type.as_deref().unwrap_or("unknown"),
            ?mode,
            "Resource fetched"
        );

        let payload = match mode {
            FetchMode::Buffer => FetchedPayload::Buffer(bytes),
            FetchMode::File => {
                FetchedPayload::File(write_temp_file(bytes, content_type.as_deref()).await?)
            }
        };

        Ok(FetchedResource {
            payload,
            content_type,
        })
    }

    async fn download(&self, url: &Url) -> Result<(Bytes, Option<String>)> {
        let mut response = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| BotError::Fetch(format!("Request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::Fetch(format!("{url} returned {status}")));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(self.too_large(url));
            }
        }

        let header_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(normalize_content_type);

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| BotError::Fetch(format!("Failed to read body of {url}: {e}")))?
        {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }
        let bytes = body.freeze();

        let content_type = header_type
            .filter(|ct| ct != OCTET_STREAM)
            .or_else(|| sniff_content_type(&bytes))
            .or_else(|| {
                mime_guess::from_path(url.path())
                    .first()
                    .map(|mime| mime.essence_str().to_string())
            });

        Ok((bytes, content_type))
    }

    fn too_large(&self, url: &Url) -> BotError {
        BotError::Fetch(format!(
            "{url} is larger than the {} byte limit",
            self.max_bytes
        ))
    }
}

/// Drop header parameters (`; charset=...`) and lowercase the essence.
fn normalize_content_type(raw: &str) -> Option<String> {
    let essence = raw.split(';').next().unwrap_or_default().trim();
    if essence.is_empty() {
        None
    } else {
        Some(essence.to_ascii_lowercase())
    }
}

fn sniff_content_type(bytes: &[u8]) -> Option<String> {
    infer::get(bytes).map(|kind| kind.mime_type().to_string())
}

async fn write_temp_file(bytes: Bytes, content_type: Option<&str>) -> Result<PathBuf> {
    let suffix = content_type
        .and_then(mime_guess::get_mime_extensions_str)
        .and_then(|extensions| extensions.first())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();

    tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix("botsense-")
            .suffix(&suffix)
            .tempfile()?;
        file.write_all(&bytes)?;
        file.flush()?;
        let (_, path) = file.keep().map_err(|e| BotError::Io(e.error))?;
        Ok(path)
    })
    .await
    .map_err(|e| BotError::Fetch(format!("Temp file task panicked: {e}")))?
}
