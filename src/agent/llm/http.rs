//! HTTP plumbing shared by the providers

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ProviderError, ProviderErrorKind};

/// Connection establishment limit; the request as a whole is bounded by the
/// caller.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub fn build_client(provider: &str) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("codeagent/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::new(ProviderErrorKind::Network, provider, e.to_string()))
}

/// Send and turn a non-2xx status into a classified error.
pub async fn send(provider: &str, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, &e))?;
    let status = response.status();
    debug!(provider, status = status.as_u16(), "provider responded");
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(provider, status.as_u16(), &body).with_retry_after(retry_after))
}

/// Read and decode a JSON body.
pub async fn read_json<T: DeserializeOwned>(provider: &str, response: reqwest::Response) -> Result<T, ProviderError> {
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, &e))?;
    serde_json::from_str(&body).map_err(|e| {
        let snippet: String = body.chars().take(200).collect();
        ProviderError::decode(provider, format!("{e} (body: {snippet})"))
    })
}
