//! Common test utilities

use prewarm::config::{DomainSettings, EntryPoint, WarmerSettings};
use prewarm::storage::ConfigStore;
use prewarm::warmer::{Chunk, HeaderList};

/// Save site settings with the given entry points
#[allow(dead_code)]
pub fn configure_site(store: &dyn ConfigStore, home_url: &str, entry_points: &[&str], minutes: i64) {
    WarmerSettings {
        interval_minutes: minutes,
        home_url: home_url.to_string(),
        entry_points: entry_points
            .iter()
            .map(|url| EntryPoint { url: url.to_string() })
            .collect(),
        ..Default::default()
    }
    .save(store)
    .unwrap();
}

/// Save a validated license for `domain` using `servers`
#[allow(dead_code)]
pub fn license_domain(store: &dyn ConfigStore, domain: &str, servers: &[String], hours: i64) {
    DomainSettings {
        domain: domain.to_string(),
        license_key: Some("test-license".to_string()),
        last_validation_code: Some(200),
        servers: servers.to_vec(),
        interval_hours: hours,
    }
    .save(store)
    .unwrap();
}

/// Create a chunk with a fixed user agent
#[allow(dead_code)]
pub fn chunk(urls: &[String]) -> Chunk {
    Chunk {
        headers: HeaderList::from_pairs([("User-Agent", "prewarm-test")]),
        urls: urls.to_vec(),
    }
}

/// `n` URLs on example.com
#[allow(dead_code)]
pub fn urls(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("https://example.com/page-{i}")).collect()
}
