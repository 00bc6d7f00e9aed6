//! OpenAI to Gemini request conversion

use super::models::{
    ChatRequest, Content, EmbedContentRequest, EmbeddingRequest, GenerateContentRequest,
    GenerationConfig,
};
use crate::proxy::common::error::ProxyError;

/// Sent when the client leaves `temperature` unset, so the upstream default never applies
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Convert an OpenAI chat request to a Gemini generation request.
///
/// Only the last `user` message becomes the prompt; earlier turns are not forwarded.
pub fn convert_chat_request(request: &ChatRequest) -> Result<GenerateContentRequest, ProxyError> {
    validate_model(&request.model)?;
    if request.messages.is_empty() {
        return Err(ProxyError::BadRequest("messages must not be empty".to_string()));
    }

    let prompt = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.as_str())
        .ok_or_else(|| ProxyError::BadRequest("no message with role \"user\"".to_string()))?;

    if prompt.is_empty() {
        return Err(ProxyError::BadRequest("prompt must not be empty".to_string()));
    }

    Ok(GenerateContentRequest {
        contents: vec![Content::text(prompt)],
        generation_config: GenerationConfig {
            temperature: request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        },
    })
}

/// Convert an OpenAI embedding request to a single-content Gemini embed request
pub fn convert_embedding_request(request: &EmbeddingRequest) -> Result<EmbedContentRequest, ProxyError> {
    validate_model(&request.model)?;
    if request.input.is_empty() {
        return Err(ProxyError::BadRequest("input must not be empty".to_string()));
    }

    Ok(EmbedContentRequest {
        content: Content::text(request.input.clone()),
    })
}

/// Gemini model ids are addressed without the `models/` resource prefix
pub fn normalize_model(model: &str) -> &str {
    model.trim().trim_start_matches("models/")
}

/// The model id becomes one path segment of the upstream URL, so it may not
/// carry separators, escapes or dot segments.
pub fn validate_model(model: &str) -> Result<(), ProxyError> {
    let name = normalize_model(model);
    if name.is_empty() {
        return Err(ProxyError::BadRequest("model must not be empty".to_string()));
    }

    let forbidden = |c: char| matches!(c, '/' | '\\' | '?' | '#' | '%') || c.is_whitespace() || c.is_control();
    if name.contains(forbidden) || name.contains("..") {
        return Err(ProxyError::BadRequest(format!("invalid model id: {:?}", model)));
    }
    Ok(())
}
