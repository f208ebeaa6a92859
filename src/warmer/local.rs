//! Local warm-up run
//!
//! Fetches every entry point directly, logs each visit, and records the
//! successful requests so the external warmer can replay them from its
//! servers.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::Client;

use super::chunks::{record_request_args, WarmRequestArgs};
use super::error::WarmerResult;
use super::headers::{build_request_headers, HeaderList};
use super::response::primary_content_type;
use crate::config::{HttpConfig, WarmerSettings};
use crate::metrics;
use crate::storage::{
    CacheStatus, ConfigStore, ConfigStoreExt, FailureRecord, StorageResult, SuccessRecord,
    VisitLog,
};
use crate::utils::{absolute_url, extract_domain, merge_unique, round2};

/// Option key of the cooperative stop flag
pub const STOP_FLAG_KEY: &str = "warm-up-stop-requested";

/// Batch id format of a local run (its start time)
pub const BATCH_ID_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Counts for one local run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalRunSummary {
    pub batch_id: String,
    pub visited: usize,
    pub success: usize,
    pub failed: usize,
    /// New request args recorded for the external warmer
    pub recorded: usize,
    /// Whether the run ended on a stop request
    pub stopped: bool,
}

/// Ask a running local warm-up to stop before its next URL
pub fn request_stop(store: &dyn ConfigStore) -> StorageResult<()> {
    store.set_as(STOP_FLAG_KEY, &true)
}

/// Absolute, de-duplicated entry point URLs
pub fn resolve_entry_points(settings: &WarmerSettings) -> Vec<String> {
    let mut urls = Vec::new();
    for link in settings.entry_point_urls() {
        match absolute_url(&settings.home_url, link) {
            Ok(url) => merge_unique(&mut urls, &[url]),
            Err(e) => tracing::warn!(link, error = %e, "Skipping entry point"),
        }
    }
    urls
}

/// Local warm-up runner
pub struct LocalWarmer {
    /// HTTP client with configured timeout and compression
    client: Client,

    /// Rate limiter to control request frequency
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,

    store: Arc<dyn ConfigStore>,
    log: Arc<dyn VisitLog>,

    /// User agent when the site sets none
    default_user_agent: String,
}

enum Visit {
    Success(SuccessRecord),
    Failure(FailureRecord),
}

impl LocalWarmer {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        log: Arc<dyn VisitLog>,
        config: &HttpConfig,
    ) -> WarmerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .build()?;

        let rate = NonZeroU32::new(config.local_rate_limit).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            store,
            log,
            default_user_agent: config.user_agent.clone(),
        })
    }

    pub fn stop_requested(&self) -> WarmerResult<bool> {
        Ok(self.store.get_or(STOP_FLAG_KEY, false)?)
    }

    fn clear_stop_flag(&self) -> WarmerResult<()> {
        self.store.delete(STOP_FLAG_KEY)?;
        Ok(())
    }

    /// Run a warm-up over every entry point, batch id = start time
    pub async fn run(&self) -> WarmerResult<LocalRunSummary> {
        let batch_id = Utc::now().format(BATCH_ID_FORMAT).to_string();
        self.run_batch(&batch_id).await
    }

    pub async fn run_batch(&self, batch_id: &str) -> WarmerResult<LocalRunSummary> {
        self.clear_stop_flag()?;

        let settings = WarmerSettings::load(self.store.as_ref())?;
        let urls = resolve_entry_points(&settings);
        let user_agent = settings
            .user_agent
            .clone()
            .unwrap_or_else(|| self.default_user_agent.clone());
        let headers =
            build_request_headers(&user_agent, &settings.cookies, &settings.header_pairs());

        let mut summary = LocalRunSummary {
            batch_id: batch_id.to_string(),
            ..Default::default()
        };

        tracing::info!(batch_id, urls = urls.len(), "Local warm-up started");

        for url in &urls {
            if self.stop_requested()? {
                tracing::info!(batch_id, visited = summary.visited, "Local warm-up stopped on request");
                self.clear_stop_flag()?;
                summary.stopped = true;
                break;
            }

            self.rate_limiter.until_ready().await;
            summary.visited += 1;

            match self.visit(url, &headers, batch_id).await {
                Visit::Success(record) => {
                    summary.success += 1;
                    self.log.log_success(record)?;

                    match extract_domain(url) {
                        Ok(domain) => {
                            let args = WarmRequestArgs {
                                urls: vec![url.clone()],
                                headers: headers.clone(),
                            };
                            if record_request_args(self.store.as_ref(), &domain, args)? {
                                summary.recorded += 1;
                            }
                        }
                        Err(e) => tracing::debug!(url = %url, error = %e, "No domain to record under"),
                    }
                }
                Visit::Failure(record) => {
                    summary.failed += 1;
                    self.log.log_failure(record)?;
                }
            }
        }

        metrics::record_urls_warmed("local", summary.success as u64, summary.failed as u64);
        tracing::info!(
            batch_id,
            visited = summary.visited,
            success = summary.success,
            failed = summary.failed,
            recorded = summary.recorded,
            "Local warm-up finished"
        );
        Ok(summary)
    }

    async fn visit(&self, url: &str, headers: &HeaderList, batch_id: &str) -> Visit {
        let user_agent = headers.get("user-agent").unwrap_or("").to_string();
        let started = Instant::now();

        let response = self
            .client
            .get(url)
            .headers(headers.to_header_map())
            .send()
            .await;
        let elapsed = round2(started.elapsed().as_secs_f64());

        match response {
            Ok(response) => {
                let status = response.status();
                if status.is_success() || status.is_redirection() {
                    let response_headers = response.headers();
                    Visit::Success(SuccessRecord {
                        subject: url.to_string(),
                        batch_id: batch_id.to_string(),
                        depth: 0,
                        elapsed_secs: elapsed,
                        extra: None,
                        response_code: status.as_u16().to_string(),
                        retry_count: 0,
                        user_agent,
                        context: Vec::new(),
                        content_type: primary_content_type(header_str(
                            response_headers,
                            CONTENT_TYPE.as_str(),
                        ))
                        .to_string(),
                        content_length: header_str(response_headers, CONTENT_LENGTH.as_str())
                            .to_string(),
                        cache: CacheStatus {
                            cloudflare: header_str(response_headers, "cf-cache-status").to_string(),
                            super_cache: header_str(response_headers, "x-wp-super-cache")
                                .to_string(),
                            x_cache: header_str(response_headers, "x-cache").to_string(),
                        },
                    })
                } else {
                    Visit::Failure(FailureRecord {
                        subject: url.to_string(),
                        batch_id: batch_id.to_string(),
                        depth: 0,
                        elapsed_secs: Some(elapsed),
                        reason: format!("Server response code: {}", status.as_u16()),
                        retry_count: 0,
                        user_agent,
                    })
                }
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Local warm-up request failed");
                Visit::Failure(FailureRecord {
                    subject: url.to_string(),
                    batch_id: batch_id.to_string(),
                    depth: 0,
                    elapsed_secs: None,
                    reason: format!("Request failed: {e}"),
                    retry_count: 0,
                    user_agent,
                })
            }
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}
