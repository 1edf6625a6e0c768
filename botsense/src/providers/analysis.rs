use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ContentKind, TextAnalysisService};
use crate::config::{parse_provider_model, AnalysisConfig, KNOWN_CHAT_PROVIDERS};
use crate::error::{BotError, Result};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const LMSTUDIO_BASE_URL: &str = "http://localhost:1234/v1";

const ANALYSIS_SYSTEM_PROMPT: &str = "You analyze messages received by a chat bot. \
Reply with a single JSON object with the keys \"summary\" (string), \"language\" \
(ISO 639-1 code), \"sentiment\" (\"positive\", \"neutral\" or \"negative\") and \
\"topics\" (array of strings). Do not add any text outside the JSON object.";

/// Text analysis over an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct LlmAnalysisService {
    client: Client<OpenAIConfig>,
    model: String,
}

impl std::fmt::Debug for LlmAnalysisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmAnalysisService")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl LlmAnalysisService {
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        let (provider, model) = parse_provider_model(&config.model, KNOWN_CHAT_PROVIDERS);
        let provider = provider.to_lowercase();

        if provider == "local" && config.base_url.is_none() {
            return Err(BotError::Analysis(format!(
                "Unknown provider in model: {}",
                config.model
            )));
        }

        let needs_api_key = !matches!(provider.as_str(), "ollama" | "local" | "lmstudio");
        if needs_api_key && config.api_key.is_none() {
            return Err(BotError::Analysis(
                "API key required for this provider".to_string(),
            ));
        }

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(&provider).to_string());

        let model = if provider == "local" {
            config.model.clone()
        } else {
            model.to_string()
        };

        let openai_config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key(config.api_key.clone().unwrap_or_default());

        // The caller's budget is the only deadline; the HTTP client has none.
        let http_client = reqwest::Client::builder().build().map_err(|error| {
            BotError::Analysis(format!("Failed to create analysis HTTP client: {error}"))
        })?;

        // Zero window: async-openai must not retry behind our back.
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: Some(Duration::ZERO),
            ..Default::default()
        };

        let client = Client::with_config(openai_config)
            .with_http_client(http_client)
            .with_backoff(backoff);

        Ok(Self { client, model })
    }

    fn build_request(&self, text: &str, kind: ContentKind) -> Result<CreateChatCompletionRequest> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(ANALYSIS_SYSTEM_PROMPT)
            .build()
            .map_err(|error| BotError::Validation(format!("Invalid system prompt: {error}")))?;

        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(format!("Content kind: {}\n\n{}", kind.as_str(), text))
            .build()
            .map_err(|error| BotError::Validation(format!("Invalid user prompt: {error}")))?;

        CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(vec![system.into(), user.into()])
            .build()
            .map_err(|error| {
                BotError::Validation(format!("Invalid analysis request: {error}"))
            })
    }

    fn extract_content(response: CreateChatCompletionResponse) -> Result<String> {
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                BotError::MalformedServiceResult(
                    "Analysis response contained no content".to_string(),
                )
            })
    }

    fn map_openai_error(error: OpenAIError) -> BotError {
        match error {
            OpenAIError::Reqwest(reqwest_error) => {
                BotError::Analysis(format!("Analysis request failed: {reqwest_error}"))
            }
            OpenAIError::ApiError(api_error) => {
                BotError::Analysis(format!("Analysis API error: {api_error}"))
            }
            OpenAIError::JSONDeserialize(err) => BotError::MalformedServiceResult(format!(
                "Failed to parse analysis response: {err}"
            )),
            OpenAIError::InvalidArgument(message) => BotError::Validation(message),
            other => BotError::Analysis(other.to_string()),
        }
    }
}

#[async_trait]
impl TextAnalysisService for LlmAnalysisService {
    async fn analyze_content(
        &self,
        text: &str,
        kind: ContentKind,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let request = self.build_request(text, kind)?;
        let chat = self.client.chat();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(BotError::Cancelled("text analysis".to_string()));
            }
            response = chat.create(request) => {
                response.map_err(Self::map_openai_error)?
            }
        };

        let content = Self::extract_content(response)?;
        debug!(response_len = content.len(), "Analysis response received");
        Ok(parse_analysis(&content))
    }
}

fn default_base_url(provider: &str) -> &'static str {
    match provider {
        "openrouter" => OPENROUTER_BASE_URL,
        "ollama" => OLLAMA_BASE_URL,
        "lmstudio" => LMSTUDIO_BASE_URL,
        _ => OPENAI_BASE_URL,
    }
}

/// Models often wrap JSON in a markdown fence or answer in prose. Fenced or
/// bare JSON objects are returned as-is, anything else under `content`.
fn parse_analysis(content: &str) -> Value {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    match serde_json::from_str::<Value>(unfenced) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({ "content": trimmed }),
    }
}
