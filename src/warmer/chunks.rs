//! Chunked dispatch of recorded warm-up requests
//!
//! Successful local warm-up requests are recorded per domain. On every
//! external interval the recorded requests are grouped by header set, split
//! into chunks of at most [`CHUNK_SIZE`] URLs and enqueued as one job each.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::WarmerResult;
use super::headers::HeaderList;
use crate::metrics;
use crate::queue::{Job, JobQueue};
use crate::storage::{ConfigStore, ConfigStoreExt};
use crate::utils::merge_unique;

/// Maximum URLs per chunk
pub const CHUNK_SIZE: usize = 10;

/// Option key holding `{domain: [WarmRequestArgs]}`
pub const REQUEST_ARGS_KEY: &str = "last-success-warmup-request-args";

/// A successful warm-up request as replayed by the remote warmers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmRequestArgs {
    pub urls: Vec<String>,
    pub headers: HeaderList,
}

/// A unit of remote warm-up work: URLs of one domain sharing one header set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub headers: HeaderList,
    pub urls: Vec<String>,
}

type RecordedArgs = BTreeMap<String, Vec<WarmRequestArgs>>;

/// Recorded request args for `domain`
pub fn load_request_args(
    store: &dyn ConfigStore,
    domain: &str,
) -> WarmerResult<Vec<WarmRequestArgs>> {
    let mut recorded: RecordedArgs = store.get_or(REQUEST_ARGS_KEY, RecordedArgs::new())?;
    Ok(recorded.remove(domain).unwrap_or_default())
}

/// Merge a successful request into the recorded set. Returns `false` when an
/// identical request was already recorded.
pub fn record_request_args(
    store: &dyn ConfigStore,
    domain: &str,
    args: WarmRequestArgs,
) -> WarmerResult<bool> {
    let mut recorded: RecordedArgs = store.get_or(REQUEST_ARGS_KEY, RecordedArgs::new())?;
    let entries = recorded.entry(domain.to_string()).or_default();
    if entries.contains(&args) {
        return Ok(false);
    }
    entries.push(args);
    store.set_as(REQUEST_ARGS_KEY, &recorded)?;
    Ok(true)
}

/// Group recorded requests by header set, groups in first-seen order, URLs
/// de-duplicated within each group.
pub fn group_by_headers(args: &[WarmRequestArgs]) -> Vec<(HeaderList, Vec<String>)> {
    let mut groups: Vec<(HeaderList, Vec<String>)> = Vec::new();
    for request in args {
        match groups.iter_mut().find(|(h, _)| *h == request.headers) {
            Some((_, urls)) => merge_unique(urls, &request.urls),
            None => {
                let mut urls = Vec::new();
                merge_unique(&mut urls, &request.urls);
                groups.push((request.headers.clone(), urls));
            }
        }
    }
    groups
}

/// Turn recorded requests into chunks
pub fn plan_chunks(args: &[WarmRequestArgs]) -> Vec<Chunk> {
    group_by_headers(args)
        .into_iter()
        .flat_map(|(headers, urls)| {
            urls.chunks(CHUNK_SIZE)
                .map(|urls| Chunk {
                    headers: headers.clone(),
                    urls: urls.to_vec(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Enqueue one chunk job per chunk of the recorded requests for `domain`.
/// Returns the number of jobs enqueued.
pub fn create_chunks(
    store: &dyn ConfigStore,
    queue: &dyn JobQueue,
    domain: &str,
) -> WarmerResult<usize> {
    let args = load_request_args(store, domain)?;
    if args.is_empty() {
        tracing::debug!(domain, "No recorded warm-up requests, nothing to chunk");
        return Ok(0);
    }

    let chunks = plan_chunks(&args);
    let count = chunks.len();
    for chunk in chunks {
        let (hook, args) = Job::WarmChunk(chunk).into_parts()?;
        queue.enqueue_now(hook, &args)?;
    }

    metrics::record_chunks_created(count);
    tracing::info!(domain, chunks = count, "Warm chunks enqueued");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Hook, MemoryJobQueue};
    use crate::storage::MemoryConfigStore;

    fn request(url: &str, ua: &str) -> WarmRequestArgs {
        WarmRequestArgs {
            urls: vec![url.to_string()],
            headers: HeaderList::from_pairs([("User-Agent", ua)]),
        }
    }

    #[test]
    fn test_record_request_args_dedups() {
        let store = MemoryConfigStore::new();
        assert!(record_request_args(&store, "example.com", request("https://example.com/", "a")).unwrap());
        assert!(!record_request_args(&store, "example.com", request("https://example.com/", "a")).unwrap());
        assert!(record_request_args(&store, "example.com", request("https://example.com/", "b")).unwrap());

        assert_eq!(load_request_args(&store, "example.com").unwrap().len(), 2);
        assert!(load_request_args(&store, "other.com").unwrap().is_empty());
    }

    #[test]
    fn test_group_by_headers_first_seen_order() {
        let args = vec![
            request("https://example.com/1", "mobile"),
            request("https://example.com/2", "desktop"),
            request("https://example.com/3", "mobile"),
            request("https://example.com/1", "mobile"),
        ];
        let groups = group_by_headers(&args);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.get("user-agent"), Some("mobile"));
        assert_eq!(
            groups[0].1,
            vec!["https://example.com/1", "https://example.com/3"]
        );
        assert_eq!(groups[1].1, vec!["https://example.com/2"]);
    }

    #[test]
    fn test_create_chunks_without_records() {
        let store = MemoryConfigStore::new();
        let queue = MemoryJobQueue::new();
        assert_eq!(create_chunks(&store, &queue, "example.com").unwrap(), 0);
        assert!(queue.pending_for(Hook::WarmUrlsChunk).is_empty());
    }

    #[test]
    fn test_create_chunks_enqueues_jobs() {
        let store = MemoryConfigStore::new();
        let queue = MemoryJobQueue::new();
        for i in 0..12 {
            record_request_args(
                &store,
                "example.com",
                request(&format!("https://example.com/{i}"), "a"),
            )
            .unwrap();
        }

        assert_eq!(create_chunks(&store, &queue, "example.com").unwrap(), 2);
        let pending = queue.pending_for(Hook::WarmUrlsChunk);
        assert_eq!(pending.len(), 2);
        match pending[1].job().unwrap() {
            Job::WarmChunk(chunk) => assert_eq!(chunk.urls.len(), 2),
            other => panic!("unexpected job: {other:?}"),
        }
    }
}
