//! HTTP client for remote warmer servers
//!
//! Each server receives `POST {domain, key, urls, headers}` and answers with a
//! JSON array of per-URL visit records. Transport failures are captured in the
//! returned [`ServerResponse`] rather than raised, so one unreachable server
//! never hides the results of the others.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use url::Url;

use super::error::WarmerResult;
use super::headers::HeaderList;
use crate::metrics;

/// Timeout applied to every remote warmer request
pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of a remote warm-up request
#[derive(Debug, Serialize)]
pub struct WarmRequest<'a> {
    pub domain: &'a str,
    pub key: &'a str,
    pub urls: &'a [String],
    pub headers: &'a HeaderList,
}

/// What one server answered
#[derive(Debug, Clone)]
pub struct ServerResponse {
    /// Full server URL as configured
    pub server: String,
    /// Short identifier used as log subject prefix
    pub server_code: String,
    /// HTTP status, `None` when the request never completed
    pub status: Option<u16>,
    pub body: String,
    /// Transport error text when `status` is `None`
    pub error: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Client for the remote warmer protocol
pub struct RemoteWarmerClient {
    client: Client,
}

impl RemoteWarmerClient {
    pub fn new() -> WarmerResult<Self> {
        Self::with_timeout(REMOTE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> WarmerResult<Self> {
        let client = Client::builder().timeout(timeout).gzip(true).build()?;
        Ok(Self { client })
    }

    /// Send one request to one server
    pub async fn send(&self, server: &str, request: &WarmRequest<'_>) -> ServerResponse {
        let server_code = server_code(server);
        let requested_at = Utc::now();
        let started = Instant::now();

        tracing::debug!(
            server = %server_code,
            domain = request.domain,
            urls = request.urls.len(),
            "Sending chunk to remote warmer"
        );

        let outcome: Result<(u16, String), reqwest::Error> = async {
            let response = self.client.post(server).json(request).send().await?;
            let status = response.status().as_u16();
            Ok((status, response.text().await?))
        }
        .await;
        let elapsed = started.elapsed();

        let response = match outcome {
            Ok((status, body)) => ServerResponse {
                server: server.to_string(),
                server_code,
                status: Some(status),
                body,
                error: None,
                requested_at,
                elapsed,
            },
            Err(e) => {
                tracing::warn!(server = %server_code, error = %e, "Remote warmer request failed");
                ServerResponse {
                    server: server.to_string(),
                    server_code,
                    status: None,
                    body: String::new(),
                    error: Some(e.to_string()),
                    requested_at,
                    elapsed,
                }
            }
        };

        metrics::record_remote_request(
            &response.server_code,
            response.status,
            elapsed.as_secs_f64(),
        );
        response
    }

    /// Send the same request to every server, one at a time, in order
    pub async fn send_all(
        &self,
        servers: &[String],
        request: &WarmRequest<'_>,
    ) -> Vec<ServerResponse> {
        let mut responses = Vec::with_capacity(servers.len());
        for server in servers {
            responses.push(self.send(server, request).await);
        }
        responses
    }
}

/// First label of the server host: `https://us2.cachewarmer.example/` is `us2`.
/// Falls back to the raw string when it does not parse as a URL with a host.
pub fn server_code(server: &str) -> String {
    Url::parse(server)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .and_then(|host| host.split('.').next().map(str::to_string))
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| server.to_string())
}
