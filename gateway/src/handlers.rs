//! HTTP handlers

use crate::error::{GatewayError, GatewayResult};
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use model::{ChatMessage, ChatRequest, MessageRole};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
}

/// One chat turn as sent by the frontend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// `system`, `user` or `assistant`; anything else is treated as `user`
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatBody {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub model: Option<String>,
}

impl ChatBody {
    pub fn into_chat_request(self) -> ChatRequest {
        let messages = self
            .messages
            .into_iter()
            .map(|m| ChatMessage::new(MessageRole::from_wire(&m.role), m.content))
            .collect();
        ChatRequest::new(self.model.unwrap_or_default(), messages)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatReply {
    pub reply: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelSummary>,
}

/// `GET /health`. Liveness only; the upstream is not contacted.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// `POST /chat`
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatBody>, JsonRejection>,
) -> GatewayResult<Json<ChatReply>> {
    // Syntax errors and a missing content type are reported like shape errors
    let Json(body) =
        payload.map_err(|rejection| GatewayError::unprocessable(rejection.body_text()))?;

    if body.messages.is_empty() {
        return Err(GatewayError::unprocessable("messages must not be empty"));
    }

    let request = body.into_chat_request();
    debug!(
        "Relaying {} messages to {}",
        request.messages.len(),
        state.provider.provider_name()
    );

    let response = state.provider.chat(request).await.map_err(|e| {
        error!("Chat request failed: {}", e);
        GatewayError::from(e)
    })?;

    Ok(Json(ChatReply {
        reply: response.text().to_string(),
    }))
}

/// `GET /models`
pub async fn models(State(state): State<AppState>) -> GatewayResult<Json<ModelsResponse>> {
    let models = state.provider.list_models().await?;
    Ok(Json(ModelsResponse {
        models: models
            .into_iter()
            .map(|m| ModelSummary {
                name: m.name,
                display_name: m.display_name,
            })
            .collect(),
    }))
}
