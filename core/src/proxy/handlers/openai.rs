//! OpenAI-compatible handler
//! Handles /v1/chat/completions and /v1/embeddings

use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::proxy::common::error::ProxyError;
use crate::proxy::completion::assemble_completion;
use crate::proxy::mappers::gemini_to_openai::{convert_embedding_response, StreamContext};
use crate::proxy::mappers::models::{ChatRequest, EmbeddingRequest, EmbeddingResponse};
use crate::proxy::mappers::openai_to_gemini::{convert_chat_request, convert_embedding_request};
use crate::proxy::relay::spawn_relay;
use crate::proxy::server::AppState;

/// Handle POST /v1/chat/completions
pub async fn handle_chat_completions(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let trace_id = trace_id();
    let request: ChatRequest = decode_body(&body)?;
    let gemini_request = convert_chat_request(&request)?;

    info!(
        "[{}] Chat request | Model: {} | Stream: {} | Messages: {}",
        trace_id,
        request.model,
        request.stream,
        request.messages.len()
    );
    tracing::debug!(
        "[{}] Upstream body: {}",
        trace_id,
        serde_json::to_string(&gemini_request).unwrap_or_default()
    );

    let response = state
        .upstream
        .generate(&request.model, &gemini_request, request.stream)
        .await?;

    if !request.stream {
        let completion = assemble_completion(response, &request.model).await?;
        info!(
            "[{}] Completed | Out: {} chars",
            trace_id,
            completion.choices[0].message.content.len()
        );
        return Ok(Json(completion).into_response());
    }

    // Response headers are set here; upstream headers are never copied through
    let relay = spawn_relay(
        response.into_byte_stream(),
        StreamContext::new(&request.model),
        &state.relay,
        CancellationToken::new(),
        trace_id,
    );
    let body = Body::from_stream(relay.events.map(Ok::<_, Infallible>));

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

/// Handle POST /v1/embeddings
pub async fn handle_embeddings(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<EmbeddingResponse>, ProxyError> {
    let trace_id = trace_id();
    let request: EmbeddingRequest = decode_body(&body)?;
    let gemini_request = convert_embedding_request(&request)?;

    info!("[{}] Embedding request | Model: {}", trace_id, request.model);

    let embedding = state.upstream.embed(&request.model, &gemini_request).await?;
    Ok(Json(convert_embedding_response(embedding, &request.model)))
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProxyError> {
    serde_json::from_slice(body)
        .map_err(|e| ProxyError::BadRequest(format!("Invalid request body: {}", e)))
}

/// Short random id to correlate the log lines of one request
fn trace_id() -> String {
    use rand::Rng;
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}
