use crate::types::{ChatRequest, ChatResponse, ModelInfo};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Model not found: {model}: {message}")]
    ModelNotFound { model: String, message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimit { message: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

pub type ModelResult<T> = Result<T, ModelError>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> ModelResult<ChatResponse>;

    async fn list_models(&self) -> ModelResult<Vec<ModelInfo>>;

    async fn health_check(&self) -> ModelResult<()>;

    fn provider_name(&self) -> &'static str;

    /// Model used when a request leaves `model` empty.
    fn default_model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, Choice, FinishReason, MessageRole};

    struct MockProvider;

    #[async_trait]
    impl ModelProvider for MockProvider {
        async fn chat(&self, request: ChatRequest) -> ModelResult<ChatResponse> {
            let last = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ChatResponse {
                choices: vec![Choice {
                    message: ChatMessage::assistant(format!("echo: {}", last)),
                    finish_reason: Some(FinishReason::Stop),
                }],
                usage: None,
            })
        }

        async fn list_models(&self) -> ModelResult<Vec<ModelInfo>> {
            Ok(vec![ModelInfo {
                name: "mock-model".to_string(),
                display_name: Some("Mock".to_string()),
                input_token_limit: None,
                output_token_limit: None,
            }])
        }

        async fn health_check(&self) -> ModelResult<()> {
            Ok(())
        }

        fn provider_name(&self) -> &'static str {
            "mock"
        }

        fn default_model(&self) -> &str {
            "mock-model"
        }
    }

    #[tokio::test]
    async fn test_mock_provider() {
        let provider = MockProvider;

        let request = ChatRequest::new("mock-model", vec![ChatMessage::user("Hello")]);

        let response = provider.chat(request).await.unwrap();
        assert_eq!(response.choices.len(), 1);
        assert_eq!(response.choices[0].message.role, MessageRole::Assistant);
        assert_eq!(response.text(), "echo: Hello");

        let models = provider.list_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "mock-model");

        provider.health_check().await.unwrap();
        assert_eq!(provider.provider_name(), "mock");
    }

    #[test]
    fn test_provider_as_trait_object() {
        let provider: Box<dyn ModelProvider> = Box::new(MockProvider);
        let request = ChatRequest::new("", vec![ChatMessage::user("ping")]);

        let response = tokio_test::block_on(provider.chat(request)).unwrap();
        assert_eq!(response.text(), "echo: ping");
        assert_eq!(provider.default_model(), "mock-model");
    }

    #[test]
    fn test_error_display() {
        let err = ModelError::Api {
            status: 418,
            message: "teapot".to_string(),
        };
        assert_eq!(err.to_string(), "API error (418): teapot");
        let err = ModelError::RateLimit {
            message: "Resource has been exhausted".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded: Resource has been exhausted"
        );
    }
}
