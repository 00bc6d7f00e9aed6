// Error taxonomy shared by the mappers, upstream client and handlers
use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Malformed or incomplete inbound request
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// DNS, connect, TLS or timeout failure talking to the upstream
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Upstream answered with a non-success status; body kept verbatim
    #[error("Upstream returned HTTP {status}: {body}")]
    UpstreamRejected { status: u16, body: String },

    #[error("Malformed upstream response: {0}")]
    UpstreamMalformedResponse(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamUnreachable(_)
            | ProxyError::UpstreamRejected { .. }
            | ProxyError::UpstreamMalformedResponse(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ProxyError::BadRequest(_) => "invalid_request_error",
            ProxyError::UpstreamUnreachable(_) => "upstream_unreachable",
            ProxyError::UpstreamRejected { .. } => "upstream_error",
            ProxyError::UpstreamMalformedResponse(_) => "upstream_malformed_response",
        }
    }

    pub fn is_client_fault(&self) -> bool {
        matches!(self, ProxyError::BadRequest(_))
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();

        // Client mistakes are not server faults
        if self.is_client_fault() {
            tracing::debug!("Rejected request: {}", self);
        } else {
            tracing::error!("{}", self);
        }

        let code = match &self {
            ProxyError::UpstreamRejected { status, .. } => serde_json::json!(status),
            _ => serde_json::Value::Null,
        };

        // The upstream body is relayed as a plain string, it may not be JSON
        let message = match &self {
            ProxyError::UpstreamRejected { body, .. } => body.clone(),
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": {
                "message": message,
                "type": self.error_type(),
                "code": code
            }
        });

        (status, Json(body)).into_response()
    }
}
