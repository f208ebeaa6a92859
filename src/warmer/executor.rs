//! Remote warming of one chunk

use std::sync::Arc;

use super::chunks::Chunk;
use super::client::{RemoteWarmerClient, WarmRequest};
use super::error::{WarmerError, WarmerResult};
use super::response::{results_for_response, WarmResult, WarmStatus};
use crate::config::DomainSettings;
use crate::metrics;
use crate::storage::{ConfigStore, FailureRecord, SuccessRecord, VisitLog};
use crate::utils::extract_domain;

/// Batch id every remote warm-up is logged under
pub const EXTERNAL_BATCH_ID: &str = "2000-01-01";

/// Counts for one `warm_chunk` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkSummary {
    pub servers: usize,
    pub success: usize,
    pub failed: usize,
}

/// Sends chunks to the remote warmers configured for their domain and logs
/// one record per URL per server
pub struct ChunkExecutor {
    client: RemoteWarmerClient,
    store: Arc<dyn ConfigStore>,
    log: Arc<dyn VisitLog>,
}

impl ChunkExecutor {
    pub fn new(
        client: RemoteWarmerClient,
        store: Arc<dyn ConfigStore>,
        log: Arc<dyn VisitLog>,
    ) -> Self {
        Self { client, store, log }
    }

    /// Warm every URL of `chunk` through every server in use for its domain.
    ///
    /// A domain without a license key, or without validated servers, is a
    /// silent no-op. Server failures are logged per URL, never returned.
    pub async fn warm_chunk(&self, chunk: &Chunk) -> WarmerResult<ChunkSummary> {
        let first = chunk.urls.first().ok_or(WarmerError::EmptyChunk)?;
        let domain =
            extract_domain(first).map_err(|_| WarmerError::MissingHost(first.clone()))?;

        let settings = DomainSettings::load(self.store.as_ref(), &domain)?;
        let Some(key) = settings.license_key.as_deref() else {
            tracing::debug!(domain = %domain, "No license key, skipping chunk");
            return Ok(ChunkSummary::default());
        };

        let servers = settings.servers_to_use();
        if servers.is_empty() {
            tracing::debug!(domain = %domain, "No remote warmer servers in use, skipping chunk");
            return Ok(ChunkSummary::default());
        }

        let request = WarmRequest {
            domain: &domain,
            key,
            urls: &chunk.urls,
            headers: &chunk.headers,
        };
        let responses = self.client.send_all(servers, &request).await;

        let user_agent = chunk.headers.get("user-agent").unwrap_or("");
        let mut summary = ChunkSummary {
            servers: responses.len(),
            ..Default::default()
        };

        for response in &responses {
            for result in results_for_response(response, &chunk.urls) {
                if result.is_processed() {
                    summary.success += 1;
                } else {
                    summary.failed += 1;
                }
                let url = result.url.clone();
                if let Err(e) = self.log_result(&response.server_code, user_agent, result) {
                    tracing::warn!(url = %url, error = %e, "Failed to log chunk result");
                }
            }
        }

        metrics::record_urls_warmed("external", summary.success as u64, summary.failed as u64);
        tracing::info!(
            domain = %domain,
            urls = chunk.urls.len(),
            servers = summary.servers,
            success = summary.success,
            failed = summary.failed,
            "Chunk warmed"
        );
        Ok(summary)
    }

    fn log_result(&self, server_code: &str, user_agent: &str, result: WarmResult) -> WarmerResult<()> {
        let subject = format!("{} {}", server_code, result.url);
        match result.status {
            WarmStatus::Processed => self.log.log_success(SuccessRecord {
                subject,
                batch_id: EXTERNAL_BATCH_ID.to_string(),
                depth: 0,
                elapsed_secs: result.elapsed_seconds.unwrap_or(0.0),
                extra: None,
                response_code: result.response_code,
                retry_count: 0,
                user_agent: user_agent.to_string(),
                context: Vec::new(),
                content_type: result.content_type,
                content_length: result.content_length,
                cache: result.cache,
            })?,
            WarmStatus::Failed(reason) => self.log.log_failure(FailureRecord {
                subject,
                batch_id: EXTERNAL_BATCH_ID.to_string(),
                depth: 0,
                elapsed_secs: result.elapsed_seconds,
                reason,
                retry_count: 0,
                user_agent: user_agent.to_string(),
            })?,
        }
        Ok(())
    }
}
