//! Non-streaming path: read the whole upstream body, translate it once

use crate::proxy::common::error::ProxyError;
use crate::proxy::mappers::gemini_to_openai::convert_chat_response;
use crate::proxy::mappers::models::{CompletionResponse, GenerateContentResponse};
use crate::proxy::upstream::UpstreamResponse;

pub async fn assemble_completion(
    response: UpstreamResponse,
    original_model: &str,
) -> Result<CompletionResponse, ProxyError> {
    let body = response.bytes().await?;
    let parsed = parse_completion_body(&body)?;
    Ok(convert_chat_response(&parsed, original_model))
}

/// No partial result: anything that is not a generation response fails the request
pub fn parse_completion_body(body: &[u8]) -> Result<GenerateContentResponse, ProxyError> {
    let parsed: GenerateContentResponse = serde_json::from_slice(body).map_err(|e| {
        ProxyError::UpstreamMalformedResponse(format!(
            "{} (body: {})",
            e,
            String::from_utf8_lossy(&body[..body.len().min(200)])
        ))
    })?;

    // An error object under a 2xx status is still a rejection
    if let Some(error) = &parsed.error {
        return Err(ProxyError::UpstreamRejected {
            status: error.code.unwrap_or(502),
            body: String::from_utf8_lossy(body).into_owned(),
        });
    }
    Ok(parsed)
}
