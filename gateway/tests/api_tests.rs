use async_trait::async_trait;
use gateway::config::{GatewayConfig, DEFAULT_CORS_ORIGIN};
use gateway::{build_router, serve, AppState};
use model::{
    ChatMessage, ChatRequest, ChatResponse, Choice, FinishReason, ModelError, ModelInfo,
    ModelProvider, ModelResult,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// Provider that records requests and answers from a fixed script
struct ScriptedProvider {
    requests: Mutex<Vec<ChatRequest>>,
    outcome: fn() -> ModelResult<ChatResponse>,
}

impl ScriptedProvider {
    fn new(outcome: fn() -> ModelResult<ChatResponse>) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            outcome,
        })
    }
}

fn reply(text: &str) -> ModelResult<ChatResponse> {
    Ok(ChatResponse {
        choices: vec![Choice {
            message: ChatMessage::assistant(text),
            finish_reason: Some(FinishReason::Stop),
        }],
        usage: None,
    })
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn chat(&self, request: ChatRequest) -> ModelResult<ChatResponse> {
        self.requests.lock().unwrap().push(request);
        (self.outcome)()
    }

    async fn list_models(&self) -> ModelResult<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            name: "gemini-2.5-flash".to_string(),
            display_name: Some("Gemini 2.5 Flash".to_string()),
            input_token_limit: None,
            output_token_limit: None,
        }])
    }

    async fn health_check(&self) -> ModelResult<()> {
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "gemini-2.5-flash"
    }
}

async fn spawn_gateway(provider: Arc<ScriptedProvider>) -> SocketAddr {
    let config = GatewayConfig::default();
    let app = build_router(AppState::new(provider), &config);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        serve(listener, app, std::future::pending())
            .await
            .expect("gateway");
    });
    addr
}

#[tokio::test]
async fn test_health() {
    let addr = spawn_gateway(ScriptedProvider::new(|| reply("unused"))).await;

    let response = reqwest::get(format!("http://{}/health", addr))
        .await
        .expect("request");
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_chat_relays_conversation() {
    let provider = ScriptedProvider::new(|| reply("Use S3 for objects."));
    let addr = spawn_gateway(provider.clone()).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/chat", addr))
        .json(&json!({
            "messages": [
                {"role": "system", "content": "You are a cloud tutor."},
                {"role": "user", "content": "Where do I store files?"}
            ],
            "model": "gemini-2.5-pro"
        }))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"reply": "Use S3 for objects."}));

    let requests = provider.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model, "gemini-2.5-pro");
    assert_eq!(requests[0].messages.len(), 2);
    assert_eq!(requests[0].messages[0], ChatMessage::system("You are a cloud tutor."));
}

#[tokio::test]
async fn test_blocked_prompt_yields_empty_reply() {
    let addr = spawn_gateway(ScriptedProvider::new(|| {
        Ok(ChatResponse {
            choices: vec![],
            usage: None,
        })
    }))
    .await;

    let body: Value = reqwest::Client::new()
        .post(format!("http://{}/chat", addr))
        .json(&json!({"messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"reply": ""}));
}

#[tokio::test]
async fn test_invalid_bodies_are_rejected() {
    let provider = ScriptedProvider::new(|| reply("unused"));
    let addr = spawn_gateway(provider.clone()).await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/chat", addr);

    let empty = client
        .post(&url)
        .json(&json!({"messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 422);
    let body: Value = empty.json().await.unwrap();
    assert_eq!(body, json!({"detail": "messages must not be empty"}));

    let wrong_shape = client
        .post(&url)
        .json(&json!({"messages": [{"role": "user"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_shape.status(), 422);
    let body: Value = wrong_shape.json().await.unwrap();
    assert!(body["detail"].is_string());

    let not_json = client
        .post(&url)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(not_json.status(), 422);
    let body: Value = not_json.json().await.unwrap();
    assert!(body["detail"].is_string());

    let no_content_type = client
        .post(&url)
        .body(r#"{"messages": [{"role": "user", "content": "hi"}]}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(no_content_type.status(), 422);
    let body: Value = no_content_type.json().await.unwrap();
    assert!(body["detail"].is_string());

    assert!(provider.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_upstream_failures_map_to_detail() {
    let cases: [(fn() -> ModelResult<ChatResponse>, u16); 3] = [
        (
            || {
                Err(ModelError::Authentication {
                    message: "API key not valid".to_string(),
                })
            },
            500,
        ),
        (
            || {
                Err(ModelError::RateLimit {
                    message: "quota".to_string(),
                })
            },
            429,
        ),
        (
            || {
                Err(ModelError::ServiceUnavailable {
                    message: "Cannot connect to Gemini API".to_string(),
                })
            },
            503,
        ),
    ];

    for (outcome, status) in cases {
        let addr = spawn_gateway(ScriptedProvider::new(outcome)).await;
        let response = reqwest::Client::new()
            .post(format!("http://{}/chat", addr))
            .json(&json!({"messages": [{"role": "user", "content": "hi"}]}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), status);
        let body: Value = response.json().await.unwrap();
        assert!(
            !body["detail"].as_str().unwrap_or_default().is_empty(),
            "detail must describe the failure"
        );
    }
}

#[tokio::test]
async fn test_models_listing() {
    let addr = spawn_gateway(ScriptedProvider::new(|| reply("unused"))).await;

    let body: Value = reqwest::get(format!("http://{}/models", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        body,
        json!({"models": [{"name": "gemini-2.5-flash", "display_name": "Gemini 2.5 Flash"}]})
    );
}

#[tokio::test]
async fn test_cors_preflight_for_frontend_origin() {
    let addr = spawn_gateway(ScriptedProvider::new(|| reply("unused"))).await;
    let client = reqwest::Client::new();

    let allowed = client
        .request(reqwest::Method::OPTIONS, format!("http://{}/chat", addr))
        .header("origin", DEFAULT_CORS_ORIGIN)
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type")
        .send()
        .await
        .unwrap();

    assert_eq!(allowed.status(), 200);
    let headers = allowed.headers();
    assert_eq!(
        headers["access-control-allow-origin"],
        DEFAULT_CORS_ORIGIN
    );
    assert_eq!(headers["access-control-allow-credentials"], "true");
    assert_eq!(headers["access-control-allow-methods"], "POST");

    let other = client
        .get(format!("http://{}/health", addr))
        .header("origin", "http://evil.example.com")
        .send()
        .await
        .unwrap();
    assert!(other
        .headers()
        .get("access-control-allow-origin")
        .is_none());
}
