//! Upstream client for calling the Gemini generative language API

use bytes::Bytes;
use futures::Stream;
use reqwest::{header, Client, RequestBuilder, Response};
use serde::Serialize;
use tokio::time::Duration;

use crate::config::{AuthScheme, UpstreamConfig};
use crate::proxy::common::error::ProxyError;
use crate::proxy::mappers::models::{EmbedContentRequest, EmbedContentResponse, GenerateContentRequest};
use crate::proxy::mappers::openai_to_gemini::{normalize_model, validate_model};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Shared across requests; `reqwest::Client` pools connections internally
#[derive(Clone)]
pub struct UpstreamClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    auth_scheme: AuthScheme,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(config.request_timeout))
            .user_agent(concat!("gemini-relay/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = config.proxy_url.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
            tracing::info!("Using upstream proxy: {}", proxy);
        }

        Ok(Self {
            http_client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            auth_scheme: config.auth_scheme,
        })
    }

    fn build_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, normalize_model(model), method)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth_scheme {
            AuthScheme::Query => request.query(&[("key", self.api_key.as_str())]),
            AuthScheme::Header => request.header(API_KEY_HEADER, self.api_key.as_str()),
        }
    }

    /// Call `generateContent`, or `streamGenerateContent?alt=sse` when `stream` is set.
    ///
    /// On success the body is still unread; dropping the handle closes the connection.
    pub async fn generate(
        &self,
        model: &str,
        body: &GenerateContentRequest,
        stream: bool,
    ) -> Result<UpstreamResponse, ProxyError> {
        let (method, query): (&str, &[(&str, &str)]) = if stream {
            ("streamGenerateContent", &[("alt", "sse")])
        } else {
            ("generateContent", &[])
        };

        let response = self.post(model, method, query, body).await?;
        Ok(UpstreamResponse { inner: response })
    }

    /// Call `embedContent` and decode the single embedding
    pub async fn embed(
        &self,
        model: &str,
        body: &EmbedContentRequest,
    ) -> Result<EmbedContentResponse, ProxyError> {
        let response = self.post(model, "embedContent", &[], body).await?;
        let bytes = UpstreamResponse { inner: response }.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ProxyError::UpstreamMalformedResponse(e.to_string()))
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        model: &str,
        method: &str,
        query: &[(&str, &str)],
        body: &T,
    ) -> Result<Response, ProxyError> {
        validate_model(model)?;
        let url = self.build_url(model, method);

        let request = self
            .http_client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .query(query)
            .json(body);

        let response = self
            .authorize(request)
            .send()
            .await
            // The URL may carry the credential
            .map_err(|e| ProxyError::UpstreamUnreachable(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP {}", status));
            tracing::debug!("Upstream {} returned {}: {}", url, status, body);
            return Err(ProxyError::UpstreamRejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

/// Open upstream response whose body has not been consumed yet
pub struct UpstreamResponse {
    inner: Response,
}

impl UpstreamResponse {
    /// Read the whole body
    pub async fn bytes(self) -> Result<Bytes, ProxyError> {
        self.inner
            .bytes()
            .await
            .map_err(|e| ProxyError::UpstreamUnreachable(e.without_url().to_string()))
    }

    /// Hand the body over as an incremental byte stream
    pub fn into_byte_stream(self) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static {
        self.inner.bytes_stream()
    }
}
