//! Client for Caddy's admin API.
//!
//! Every operation is a single HTTP round trip.  Retries are the caller's
//! business; see [`crate::retry`].

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, Method, Response, Url};

use super::{CaddyConfig, RoutingPayload, DEFAULT_SERVER};
use crate::error::SyncError;

/// The three admin operations reconciliation relies on.
#[async_trait]
pub trait ProxyAdmin: Send + Sync {
    /// Current configuration, or `None` when the proxy has none yet.
    async fn fetch_config(&self) -> Result<Option<CaddyConfig>, SyncError>;

    /// Install the minimal configuration route pushes need.
    async fn bootstrap(&self) -> Result<(), SyncError>;

    /// Replace the whole routing set in one request.
    async fn replace(&self, payload: &RoutingPayload) -> Result<(), SyncError>;
}

pub struct CaddyAdmin {
    client: Client,
    base: Url,
    listen: Vec<String>,
}

impl CaddyAdmin {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        listen: Vec<String>,
    ) -> Result<Self, SyncError> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| SyncError::Configuration(format!("invalid admin url {base_url}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base,
            listen,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base.as_str().trim_end_matches('/'), path)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Response, SyncError> {
        let url = self.endpoint(path);
        debug!("{} {}", method, url);

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::transport(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SyncError::transport(
                &url,
                format!("unexpected status {}: {}", status, text.trim()),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProxyAdmin for CaddyAdmin {
    async fn fetch_config(&self) -> Result<Option<CaddyConfig>, SyncError> {
        let url = self.endpoint("/config/");
        let response = self.send(Method::GET, "/config/", None).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::transport(&url, e))?;

        parse_config(&body).map_err(|source| SyncError::Decode {
            endpoint: url,
            source,
        })
    }

    async fn bootstrap(&self) -> Result<(), SyncError> {
        let body = serde_json::to_vec(&CaddyConfig::bootstrap(&self.listen))?;
        self.send(Method::POST, "/load", Some(body)).await?;
        info!("Installed bootstrap configuration listening on {:?}", self.listen);
        Ok(())
    }

    async fn replace(&self, payload: &RoutingPayload) -> Result<(), SyncError> {
        let body = serde_json::to_vec(payload)?;
        match payload {
            RoutingPayload::Servers(_) => {
                self.send(Method::POST, "/config/apps/http/servers", Some(body))
                    .await?;
            }
            RoutingPayload::Routes(_) => {
                let path = format!("/config/apps/http/servers/{DEFAULT_SERVER}/routes");
                self.send(Method::PATCH, &path, Some(body)).await?;
            }
        }
        Ok(())
    }
}

/// An empty body or a bare JSON `null` means the proxy is unconfigured.
fn parse_config(body: &[u8]) -> Result<Option<CaddyConfig>, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
}
