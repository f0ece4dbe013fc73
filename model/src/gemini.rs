use crate::config::GeminiConfig;
use crate::provider::{ModelError, ModelProvider, ModelResult};
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, Choice, FinishReason, MessageRole, ModelInfo, Usage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// `generateContent` request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    thought: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl GeminiPart {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            thought: false,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<GeminiModel>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiModel {
    name: String,
    display_name: Option<String>,
    input_token_limit: Option<u32>,
    output_token_limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

pub struct GeminiProvider {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> ModelResult<Self> {
        config
            .validate()
            .map_err(|msg| ModelError::InvalidConfig { message: msg })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ModelError::Unknown {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    pub fn from_env() -> ModelResult<Self> {
        let config =
            GeminiConfig::from_env().map_err(|message| ModelError::InvalidConfig { message })?;
        Self::new(config)
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn api_root(&self) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_version
        )
    }

    /// Model id placed in the request path. Only `[A-Za-z0-9._-]` is
    /// accepted so a caller cannot steer the request to another endpoint.
    fn resolve_model<'a>(&'a self, requested: &'a str) -> ModelResult<&'a str> {
        let model = if requested.trim().is_empty() {
            self.config.default_model.as_str()
        } else {
            requested.trim()
        };
        let model = model.strip_prefix("models/").unwrap_or(model);

        let valid = !model.is_empty()
            && model
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(ModelError::InvalidRequest {
                message: format!("Invalid model name: {:?}", model),
            });
        }
        Ok(model)
    }

    fn convert_role(role: MessageRole) -> &'static str {
        match role {
            MessageRole::Assistant => "model",
            MessageRole::User | MessageRole::System => "user",
        }
    }

    fn build_request_body(request: &ChatRequest) -> GenerateContentRequest {
        let system_messages: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();

        let system_instruction = if system_messages.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart::text(system_messages.join("\n"))],
            })
        };

        let contents = request
            .messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| GeminiContent {
                role: Some(Self::convert_role(m.role).to_string()),
                parts: vec![GeminiPart::text(m.content.clone())],
            })
            .collect();

        let generation_config = if request.temperature.is_some() || request.max_tokens.is_some() {
            Some(GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            })
        } else {
            None
        };

        GenerateContentRequest {
            contents,
            system_instruction,
            generation_config,
        }
    }

    fn convert_finish_reason(reason: Option<&str>) -> Option<FinishReason> {
        reason.map(|r| match r {
            "STOP" => FinishReason::Stop,
            "MAX_TOKENS" => FinishReason::Length,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
                FinishReason::ContentFilter
            }
            _ => FinishReason::Other,
        })
    }

    fn parse_response(response: GenerateContentResponse) -> ChatResponse {
        if response.candidates.is_empty() {
            if let Some(reason) = response
                .prompt_feedback
                .as_ref()
                .and_then(|f| f.block_reason.as_deref())
            {
                warn!("Prompt was blocked by Gemini: {}", reason);
            }
        }

        let choices = response
            .candidates
            .into_iter()
            .map(|candidate| {
                let text: String = candidate
                    .content
                    .map(|content| {
                        content
                            .parts
                            .into_iter()
                            .filter(|part| !part.thought)
                            .filter_map(|part| part.text)
                            .collect()
                    })
                    .unwrap_or_default();

                Choice {
                    message: ChatMessage::assistant(text),
                    finish_reason: Self::convert_finish_reason(candidate.finish_reason.as_deref()),
                }
            })
            .collect();

        let usage = response.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        ChatResponse { choices, usage }
    }

    fn handle_http_error(err: reqwest::Error) -> ModelError {
        if err.is_timeout() {
            ModelError::ServiceUnavailable {
                message: "Request timeout".to_string(),
            }
        } else if err.is_connect() {
            ModelError::ServiceUnavailable {
                message: "Cannot connect to Gemini API".to_string(),
            }
        } else {
            ModelError::Network(err)
        }
    }

    fn error_from_status(status: u16, body: &str, model: &str) -> ModelError {
        let message = serde_json::from_str::<ApiErrorEnvelope>(body)
            .map(|envelope| envelope.error.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.trim().to_string());

        match status {
            400 => ModelError::InvalidRequest { message },
            401 | 403 => ModelError::Authentication { message },
            404 => ModelError::ModelNotFound {
                model: model.to_string(),
                message,
            },
            429 => ModelError::RateLimit { message },
            500 | 503 => ModelError::ServiceUnavailable { message },
            _ => ModelError::Api { status, message },
        }
    }

    async fn check_status(response: reqwest::Response, model: &str) -> ModelResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = Self::error_from_status(status.as_u16(), &body, model);
        error!("Gemini API returned {}: {}", status, err);
        Err(err)
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    async fn chat(&self, request: ChatRequest) -> ModelResult<ChatResponse> {
        let model = self.resolve_model(&request.model)?.to_string();
        debug!(
            "Starting chat request with model: {} ({} messages)",
            model,
            request.messages.len()
        );

        let body = Self::build_request_body(&request);
        let url = format!("{}/models/{}:generateContent", self.api_root(), model);

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::handle_http_error)?;

        let response = Self::check_status(response, &model).await?;

        let api_response: GenerateContentResponse =
            response.json().await.map_err(Self::handle_http_error)?;

        let chat_response = Self::parse_response(api_response);

        info!("Chat request completed successfully");

        Ok(chat_response)
    }

    async fn list_models(&self) -> ModelResult<Vec<ModelInfo>> {
        debug!("Listing available models");

        let url = format!("{}/models", self.api_root());
        let mut model_infos = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("pageSize", "1000".to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response = self
                .client
                .get(&url)
                .header(API_KEY_HEADER, &self.config.api_key)
                .query(&query)
                .send()
                .await
                .map_err(Self::handle_http_error)?;

            let response = Self::check_status(response, "").await?;
            let page: ListModelsResponse =
                response.json().await.map_err(Self::handle_http_error)?;

            model_infos.extend(page.models.into_iter().map(|m| ModelInfo {
                name: m
                    .name
                    .strip_prefix("models/")
                    .map(str::to_string)
                    .unwrap_or(m.name),
                display_name: m.display_name,
                input_token_limit: m.input_token_limit,
                output_token_limit: m.output_token_limit,
            }));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!("Retrieved {} models", model_infos.len());
        Ok(model_infos)
    }

    async fn health_check(&self) -> ModelResult<()> {
        debug!("Performing health check");

        match self.list_models().await {
            Ok(_) => {
                info!("Health check passed");
                Ok(())
            }
            Err(e) => {
                error!("Health check failed: {}", e);
                Err(e)
            }
        }
    }

    fn provider_name(&self) -> &'static str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }
}
