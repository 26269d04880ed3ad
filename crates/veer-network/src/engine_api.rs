//! HTTP client for the engine's external controller.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

pub const DEFAULT_ENGINE_API_TIMEOUT_MS: u64 = 5_000;
const ENGINE_API_ERROR_PREVIEW_CHARS: usize = 400;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EngineVersion {
    pub version: String,
    #[serde(default)]
    pub meta: bool,
}

#[derive(Clone)]
pub struct EngineApiClient {
    http: reqwest::Client,
    base_url: String,
    secret: Option<String>,
}

impl EngineApiClient {
    pub fn new(base_url: &str, secret: Option<String>, request_timeout_ms: u64) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("veer"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create engine api client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret
                .map(|secret| secret.trim().to_string())
                .filter(|secret| !secret.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{path}", self.base_url));
        match &self.secret {
            Some(secret) => builder.bearer_auth(secret),
            None => builder,
        }
    }

    /// `PATCH /configs`: applies a partial config to the running engine.
    pub async fn patch_configs(&self, partial: &Value) -> Result<()> {
        let response = self
            .request(reqwest::Method::PATCH, "/configs")
            .json(partial)
            .send()
            .await
            .context("engine api PATCH /configs request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "engine api PATCH /configs failed with status {}: {}",
                status.as_u16(),
                body.chars()
                    .take(ENGINE_API_ERROR_PREVIEW_CHARS)
                    .collect::<String>()
            );
        }
        Ok(())
    }

    /// `GET /version`; succeeds once the controller is accepting requests.
    pub async fn version(&self) -> Result<EngineVersion> {
        let response = self
            .request(reqwest::Method::GET, "/version")
            .send()
            .await
            .context("engine api GET /version request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("engine api GET /version failed with status {}", status.as_u16());
        }
        response
            .json::<EngineVersion>()
            .await
            .context("failed to decode engine version")
    }
}
