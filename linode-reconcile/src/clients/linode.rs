//! Client for the Linode REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::ResourceClient;
use crate::error::ClientError;
use crate::filter::FilterPredicate;
use crate::kind::ResourceKind;
use crate::state::{attributes_to_json, Attributes, RemoteResource};

pub const DEFAULT_BASE_URL: &str = "https://api.linode.com";

const PAGE_SIZE: u32 = 100;

/// Connection settings for [`LinodeClient`].
#[derive(Debug, Clone)]
pub struct LinodeConfig {
    pub api_token: String,
    pub api_version: String,
    /// Overrides `https://api.linode.com/{api_version}` when set.
    pub base_url: Option<String>,
    pub user_agent: String,
    /// Delay before retrying a rate-limited (429) request.
    pub rate_limit_retry: Duration,
    pub max_rate_limit_retries: u32,
}

impl LinodeConfig {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            api_version: "v4".to_string(),
            base_url: None,
            user_agent: concat!("linode-reconcile/", env!("CARGO_PKG_VERSION")).to_string(),
            rate_limit_retry: Duration::from_secs(10),
            max_rate_limit_retries: 5,
        }
    }

    fn resolved_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{}/{}", DEFAULT_BASE_URL, self.api_version),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Page {
    data: Vec<serde_json::Value>,
    #[serde(default = "first_page")]
    page: u32,
    #[serde(default = "first_page")]
    pages: u32,
}

fn first_page() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    reason: String,
    field: Option<String>,
}

/// Build the message of a rejected request from the API's error body.
fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed
            .errors
            .iter()
            .map(|e| match &e.field {
                Some(field) => format!("[{}] {}", field, e.reason),
                None => e.reason.clone(),
            })
            .collect::<Vec<_>>()
            .join("; "),
        _ if !body.trim().is_empty() => body.trim().to_string(),
        _ => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
    }
}

/// Client for the Linode API.
#[derive(Clone)]
pub struct LinodeClient {
    http: reqwest::Client,
    base_url: String,
    config: LinodeConfig,
}

impl LinodeClient {
    pub fn new(config: LinodeConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.resolved_base_url(),
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send an authenticated request, retrying while the API rate-limits us.
    async fn send<F>(&self, build: F) -> Result<Response, ClientError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            let response = build()
                .bearer_auth(&self.config.api_token)
                .send()
                .await
                .map_err(|e| ClientError::Transport(e.to_string()))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS
                && attempt < self.config.max_rate_limit_retries
            {
                attempt += 1;
                warn!(
                    url = %response.url(),
                    attempt,
                    "Rate limited, retrying in {:?}",
                    self.config.rate_limit_retry
                );
                tokio::time::sleep(self.config.rate_limit_retry).await;
                continue;
            }

            return check(response).await;
        }
    }

    async fn json<F>(&self, build: F) -> Result<serde_json::Value, ClientError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        self.send(build)
            .await?
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn paginate(
        &self,
        path: &str,
        filter: Option<String>,
    ) -> Result<Vec<serde_json::Value>, ClientError> {
        let url = self.url(path);
        let mut items = Vec::new();
        let page_size = PAGE_SIZE.to_string();
        let mut page = 1;

        loop {
            let page_str = page.to_string();
            let response = self
                .send(|| {
                    let request = self
                        .http
                        .get(&url)
                        .query(&[("page", page_str.as_str()), ("page_size", page_size.as_str())]);
                    match &filter {
                        Some(filter) => request.header("X-Filter", filter),
                        None => request,
                    }
                })
                .await?;

            let body: Page = response
                .json()
                .await
                .map_err(|e| ClientError::Decode(e.to_string()))?;
            items.extend(body.data);

            if body.page >= body.pages {
                break;
            }
            page = body.page + 1;
        }

        Ok(items)
    }
}

async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(response.url().path().to_string()));
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Remote {
        status: status.as_u16(),
        message: error_message(status, &body),
    })
}

#[async_trait]
impl ResourceClient for LinodeClient {
    async fn find(
        &self,
        kind: &ResourceKind,
        filter: &FilterPredicate,
    ) -> Result<Vec<RemoteResource>, ClientError> {
        debug!("Listing {} where {}", kind.endpoint, filter);
        let x_filter = filter.to_x_filter().map(|f| f.to_string());
        self.paginate(kind.endpoint, x_filter)
            .await?
            .into_iter()
            .map(|raw| RemoteResource::from_json(kind.name, raw))
            .collect()
    }

    async fn get(&self, kind: &ResourceKind, id: &str) -> Result<RemoteResource, ClientError> {
        debug!("Getting {} {}", kind.name, id);
        let url = self.url(&kind.resource_path(id));
        let raw = self.json(|| self.http.get(&url)).await?;
        RemoteResource::from_json(kind.name, raw)
    }

    async fn create(
        &self,
        kind: &ResourceKind,
        attributes: &Attributes,
    ) -> Result<RemoteResource, ClientError> {
        debug!("Creating {}", kind.name);
        let url = self.url(kind.endpoint);
        let body = attributes_to_json(attributes);
        let raw = self.json(|| self.http.post(&url).json(&body)).await?;
        RemoteResource::from_json(kind.name, raw)
    }

    async fn update(
        &self,
        kind: &ResourceKind,
        id: &str,
        changes: &Attributes,
    ) -> Result<(), ClientError> {
        debug!("Updating {} {}", kind.name, id);
        let url = self.url(&kind.resource_path(id));
        let body = attributes_to_json(changes);
        self.send(|| self.http.put(&url).json(&body)).await?;
        Ok(())
    }

    async fn delete(&self, kind: &ResourceKind, id: &str) -> Result<(), ClientError> {
        debug!("Deleting {} {}", kind.name, id);
        let url = self.url(&kind.resource_path(id));
        self.send(|| self.http.request(Method::DELETE, &url)).await?;
        Ok(())
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        let url = self.url(path);
        self.json(|| self.http.post(&url).json(body)).await
    }

    async fn list(&self, path: &str) -> Result<Vec<serde_json::Value>, ClientError> {
        self.paginate(path, None).await
    }

    async fn raw_upload(
        &self,
        url: &str,
        file: tokio::fs::File,
        len: u64,
    ) -> Result<(), ClientError> {
        debug!("Uploading {} bytes", len);
        // Pre-signed URL: no API credentials, no rate-limit retry.
        let response = self
            .http
            .put(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, len)
            .body(reqwest::Body::from(file))
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_from_api_errors() {
        let body = r#"{"errors": [{"reason": "Label must be unique", "field": "label"}, {"reason": "Bad region"}]}"#;
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, body),
            "[label] Label must be unique; Bad region"
        );
    }

    #[test]
    fn test_error_message_fallbacks() {
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down"
        );
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, ""), "Bad Gateway");
    }

    #[test]
    fn test_base_url_resolution() {
        let mut config = LinodeConfig::new("token");
        assert_eq!(config.resolved_base_url(), "https://api.linode.com/v4");

        config.api_version = "v4beta".to_string();
        assert_eq!(config.resolved_base_url(), "https://api.linode.com/v4beta");

        config.base_url = Some("http://127.0.0.1:8080/v4/".to_string());
        assert_eq!(config.resolved_base_url(), "http://127.0.0.1:8080/v4");
    }
}
