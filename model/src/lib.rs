pub mod config;
#[cfg(feature = "gemini")]
pub mod gemini;
pub mod provider;
pub mod types;

pub use config::{GeminiConfig, DEFAULT_GEMINI_MODEL};
pub use provider::{ModelError, ModelProvider, ModelResult};
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, Choice, FinishReason, MessageRole, ModelInfo, Usage,
};

#[cfg(feature = "gemini")]
pub use gemini::GeminiProvider;

pub mod prelude {
    pub use crate::config::*;
    pub use crate::provider::*;
    pub use crate::types::*;

    #[cfg(feature = "gemini")]
    pub use crate::gemini::*;
}
