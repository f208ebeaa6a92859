//! Tests for chunk planning and chunk job creation

mod common;

use std::collections::BTreeSet;

use prewarm::queue::{Hook, Job, JobQueue, MemoryJobQueue};
use prewarm::storage::MemoryConfigStore;
use prewarm::warmer::chunks::plan_chunks;
use prewarm::warmer::{create_chunks, record_request_args, HeaderList, WarmRequestArgs, CHUNK_SIZE};
use proptest::prelude::*;

fn request(url: &str, user_agent: &str) -> WarmRequestArgs {
    WarmRequestArgs {
        urls: vec![url.to_string()],
        headers: HeaderList::from_pairs([("User-Agent", user_agent)]),
    }
}

#[test]
fn test_twenty_five_urls_make_three_chunks() {
    let store = MemoryConfigStore::new();
    let queue = MemoryJobQueue::new();
    for url in common::urls(25) {
        record_request_args(&store, "example.com", request(&url, "desktop")).unwrap();
    }

    assert_eq!(create_chunks(&store, &queue, "example.com").unwrap(), 3);

    let sizes: Vec<usize> = queue
        .pending_for(Hook::WarmUrlsChunk)
        .iter()
        .map(|job| match job.job().unwrap() {
            Job::WarmChunk(chunk) => chunk.urls.len(),
            other => panic!("unexpected job {other:?}"),
        })
        .collect();
    assert_eq!(sizes, vec![10, 10, 5]);
}

#[test]
fn test_chunks_split_by_header_set() {
    let args = vec![
        request("https://example.com/a", "desktop"),
        request("https://example.com/b", "mobile"),
        request("https://example.com/c", "desktop"),
        request("https://example.com/a", "mobile"),
    ];

    let chunks = plan_chunks(&args);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].headers.get("user-agent"), Some("desktop"));
    assert_eq!(chunks[0].urls, vec!["https://example.com/a", "https://example.com/c"]);
    assert_eq!(chunks[1].headers.get("user-agent"), Some("mobile"));
    assert_eq!(chunks[1].urls, vec!["https://example.com/b", "https://example.com/a"]);
}

#[test]
fn test_unknown_domain_creates_nothing() {
    let store = MemoryConfigStore::new();
    let queue = MemoryJobQueue::new();
    record_request_args(&store, "example.com", request("https://example.com/", "ua")).unwrap();

    assert_eq!(create_chunks(&store, &queue, "other.example").unwrap(), 0);
    assert!(queue.pending_jobs().unwrap().is_empty());
}

fn arb_requests() -> impl Strategy<Value = Vec<(usize, usize)>> {
    // (url index, user agent index) pairs with plenty of repeats
    prop::collection::vec((0usize..40, 0usize..3), 0..80)
}

proptest! {
    #[test]
    fn prop_chunks_cover_each_group_exactly(pairs in arb_requests()) {
        let args: Vec<WarmRequestArgs> = pairs
            .iter()
            .map(|(url, ua)| request(&format!("https://example.com/{url}"), &format!("ua-{ua}")))
            .collect();

        let chunks = plan_chunks(&args);

        for chunk in &chunks {
            prop_assert!(!chunk.urls.is_empty());
            prop_assert!(chunk.urls.len() <= CHUNK_SIZE);
        }

        for ua in 0..3 {
            let agent = format!("ua-{ua}");
            let expected: BTreeSet<String> = pairs
                .iter()
                .filter(|(_, u)| *u == ua)
                .map(|(url, _)| format!("https://example.com/{url}"))
                .collect();

            let produced: Vec<&String> = chunks
                .iter()
                .filter(|c| c.headers.get("user-agent") == Some(agent.as_str()))
                .flat_map(|c| c.urls.iter())
                .collect();
            let unique: BTreeSet<String> = produced.iter().map(|u| u.to_string()).collect();

            prop_assert_eq!(produced.len(), unique.len(), "duplicate URL in chunks");
            prop_assert_eq!(unique, expected);
        }
    }
}
