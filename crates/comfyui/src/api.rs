//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission, history retrieval and endpoint discovery
//! using [`reqwest`].

use std::collections::BTreeMap;

use serde::Serialize;

/// Route documents requested by [`ComfyUIApi::discover`].
pub const DISCOVERY_CANDIDATES: &[&str] = &[
    "/openapi.json",
    "/swagger.json",
    "/api/docs/openapi.json",
    "/routes",
    "/v1/openapi.json",
];

/// HTTP client for a single ComfyUI instance.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Clone)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue, when reported.
    pub number: Option<i64>,
}

/// Result of probing a ComfyUI server for its HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub base_url: String,
    /// `GET /` as JSON, or `{status_code, text}` when the body is not JSON.
    pub root: serde_json::Value,
    /// Candidate route documents that answered `200`, keyed by path.
    pub candidates: BTreeMap<String, serde_json::Value>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The body could not be parsed as the expected JSON.
    #[error("Malformed ComfyUI response: {0}")]
    Protocol(String),

    /// `/prompt` answered with JSON that carries no `prompt_id`.
    #[error("ComfyUI response has no prompt_id: {0}")]
    MissingPromptId(String),
}

impl ComfyUIApiError {
    /// True when the failure happened below HTTP (connection, timeout).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Request(_))
    }
}

impl ComfyUIApi {
    /// Create an API client for a ComfyUI instance reusing an existing
    /// [`reqwest::Client`] (carries timeouts and connection pooling).
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with the workflow and the session's client ID
    /// so that stream events for this prompt are addressed to that session.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        let payload = Self::parse_json(response).await?;
        let prompt_id = payload
            .get("prompt_id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ComfyUIApiError::MissingPromptId(payload.to_string()))?
            .to_string();

        Ok(SubmitResponse {
            prompt_id,
            number: payload.get("number").and_then(|v| v.as_i64()),
        })
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends `GET /history/{prompt_id}`. The server answers `{}` until it
    /// knows about the prompt, then `{prompt_id: record}`.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_json(response).await
    }

    /// Fetch `GET /`.
    ///
    /// Returns the JSON body, or `{status_code, text}` when the server
    /// answers with something else (ComfyUI serves its HTML front-end here).
    pub async fn fetch_root(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/", self.api_url))
            .send()
            .await?;
        Ok(Self::json_or_text(response).await?)
    }

    /// Fetch every candidate route document that answers `200`.
    ///
    /// Network errors on individual candidates are skipped.
    pub async fn list_routes(&self) -> BTreeMap<String, serde_json::Value> {
        let mut found = BTreeMap::new();
        for path in DISCOVERY_CANDIDATES {
            let response = match self
                .client
                .get(format!("{}{}", self.api_url, path))
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(path, error = %e, "Discovery candidate unreachable");
                    continue;
                }
            };
            if response.status() != reqwest::StatusCode::OK {
                continue;
            }
            match Self::json_or_text(response).await {
                Ok(value) => {
                    found.insert((*path).to_string(), value);
                }
                Err(e) => {
                    tracing::debug!(path, error = %e, "Discovery candidate body unreadable");
                }
            }
        }
        found
    }

    /// Fetch the root and all candidate route documents.
    pub async fn discover(&self) -> Result<DiscoveryReport, ComfyUIApiError> {
        let root = self.fetch_root().await?;
        let candidates = self.list_routes().await;
        tracing::info!(
            base_url = %self.api_url,
            found = candidates.len(),
            "Endpoint discovery finished",
        );
        Ok(DiscoveryReport {
            base_url: self.api_url.clone(),
            root,
            candidates,
        })
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful response body as JSON, reporting non-JSON bodies
    /// as [`ComfyUIApiError::Protocol`] rather than transport failures.
    async fn parse_json(response: reqwest::Response) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ComfyUIApiError::Protocol(e.to_string()))
    }

    async fn json_or_text(response: reqwest::Response) -> Result<serde_json::Value, reqwest::Error> {
        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| {
            serde_json::json!({
                "status_code": status,
                "text": text,
            })
        }))
    }
}
