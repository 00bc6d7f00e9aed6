//! Gemini to OpenAI response conversion

use super::models::{
    ChatMessage, ChunkChoice, ChunkEvent, CompletionChoice, CompletionChunk, CompletionResponse,
    EmbedContentResponse, EmbeddingData, EmbeddingResponse, GenerateContentResponse, Usage,
};

/// The upstream finish reason is not inspected
pub const FINISH_REASON: &str = "stop";

/// Decode one stream record payload and pull out its text.
///
/// Uses the first text part of the first candidate. Never fails: undecodable
/// payloads come back as [`ChunkEvent::Malformed`].
pub fn convert_stream_chunk(data: &str) -> ChunkEvent {
    match serde_json::from_str::<GenerateContentResponse>(data) {
        Ok(GenerateContentResponse { error: Some(error), .. }) => ChunkEvent::UpstreamError(error.to_string()),
        Ok(chunk) => match first_text(&chunk) {
            Some(text) if !text.is_empty() => ChunkEvent::Text(text.to_string()),
            _ => ChunkEvent::Empty,
        },
        Err(e) => ChunkEvent::Malformed(e.to_string()),
    }
}

fn first_text(response: &GenerateContentResponse) -> Option<&str> {
    response
        .candidates
        .first()?
        .content
        .as_ref()?
        .parts
        .iter()
        .find_map(|p| p.text.as_deref())
}

/// Convert a complete Gemini response to an OpenAI chat completion.
///
/// Zero candidates is a valid (empty) answer, not an error.
pub fn convert_chat_response(response: &GenerateContentResponse, original_model: &str) -> CompletionResponse {
    let content = response
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|c| {
            c.parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let usage = response
        .usage_metadata
        .as_ref()
        .map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        })
        .unwrap_or_default();

    CompletionResponse {
        id: completion_id(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: original_model.to_string(),
        choices: vec![CompletionChoice {
            index: 0,
            message: ChatMessage::new("assistant", content),
            finish_reason: FINISH_REASON.to_string(),
        }],
        usage,
    }
}

/// Convert a Gemini embedding to the OpenAI list shape (single entry, index 0)
pub fn convert_embedding_response(response: EmbedContentResponse, original_model: &str) -> EmbeddingResponse {
    EmbeddingResponse {
        object: "list".to_string(),
        model: original_model.to_string(),
        data: vec![EmbeddingData {
            object: "embedding".to_string(),
            embedding: response.embedding.values,
            index: 0,
        }],
    }
}

fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

/// Identity shared by every chunk of one streamed completion
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub id: String,
    pub model: String,
    pub created: i64,
}

impl StreamContext {
    pub fn new(original_model: &str) -> Self {
        Self {
            id: completion_id(),
            model: original_model.to_string(),
            created: chrono::Utc::now().timestamp(),
        }
    }

    /// Wrap a text fragment in a `chat.completion.chunk` envelope
    pub fn delta(&self, content: &str) -> CompletionChunk {
        CompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChatMessage::new("assistant", content),
                finish_reason: None,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::mappers::models::{ContentEmbedding, EmbedContentResponse};
    use serde_json::json;

    #[test]
    fn test_stream_chunk_text() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}],"role":"model"}}]}"#;
        assert_eq!(convert_stream_chunk(data), ChunkEvent::Text("Hel".to_string()));
    }

    #[test]
    fn test_stream_chunk_skips_non_text_parts() {
        let data = r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"f"}},{"text":"after"}]}}]}"#;
        assert_eq!(convert_stream_chunk(data), ChunkEvent::Text("after".to_string()));
    }

    #[test]
    fn test_stream_chunk_without_text_is_empty() {
        assert_eq!(convert_stream_chunk(r#"{"candidates":[]}"#), ChunkEvent::Empty);
        assert_eq!(
            convert_stream_chunk(r#"{"usageMetadata":{"totalTokenCount":3}}"#),
            ChunkEvent::Empty
        );
        assert_eq!(
            convert_stream_chunk(r#"{"candidates":[{"content":{"parts":[{"text":""}]},"finishReason":"STOP"}]}"#),
            ChunkEvent::Empty
        );
    }

    #[test]
    fn test_stream_chunk_error_record() {
        let data = r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#;
        assert_eq!(
            convert_stream_chunk(data),
            ChunkEvent::UpstreamError("503 UNAVAILABLE The model is overloaded.".to_string())
        );
    }

    #[test]
    fn test_stream_chunk_malformed() {
        assert!(matches!(convert_stream_chunk("{\"candidates\": [tru"), ChunkEvent::Malformed(_)));
        assert!(matches!(convert_stream_chunk("[DONE]"), ChunkEvent::Malformed(_)));
    }

    #[test]
    fn test_convert_chat_response() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [{"text": "hel"}, {"text": "lo"}]},
                "finishReason": "MAX_TOKENS"
            }],
            "usageMetadata": {"promptTokenCount": 2, "candidatesTokenCount": 1, "totalTokenCount": 3}
        }))
        .unwrap();

        let out = convert_chat_response(&resp, "m");
        assert_eq!(out.model, "m");
        assert_eq!(out.object, "chat.completion");
        assert!(out.id.starts_with("chatcmpl-"));
        assert_eq!(out.choices[0].message, ChatMessage::new("assistant", "hello"));
        assert_eq!(out.choices[0].finish_reason, "stop");
        assert_eq!(out.usage.total_tokens, 3);
    }

    #[test]
    fn test_zero_candidates_is_empty_completion() {
        let resp: GenerateContentResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        let out = convert_chat_response(&resp, "m");
        assert_eq!(out.choices.len(), 1);
        assert_eq!(out.choices[0].message.content, "");
        assert_eq!(out.choices[0].finish_reason, "stop");
        assert_eq!(out.usage, Usage::default());
    }

    #[test]
    fn test_delta_envelope() {
        let ctx = StreamContext::new("gemini-pro");
        let value = serde_json::to_value(ctx.delta("chunk")).unwrap();
        assert_eq!(value["object"], "chat.completion.chunk");
        assert_eq!(value["model"], "gemini-pro");
        assert_eq!(value["choices"][0]["delta"], json!({"role": "assistant", "content": "chunk"}));
        assert!(value["choices"][0]["finish_reason"].is_null());
    }

    #[test]
    fn test_embedding_response() {
        let out = convert_embedding_response(
            EmbedContentResponse {
                embedding: ContentEmbedding { values: vec![0.1, -0.2] },
            },
            "text-embedding-004",
        );
        let value = serde_json::to_value(out).unwrap();
        assert_eq!(
            value,
            json!({
                "object": "list",
                "model": "text-embedding-004",
                "data": [{"object": "embedding", "embedding": [0.1, -0.2], "index": 0}]
            })
        );
    }
}
