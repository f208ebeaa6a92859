//! Common utilities and helper functions
//!
//! URL/domain helpers shared by the scheduler and the warmers.

pub mod retry;

use anyhow::{Context, Result};
use url::Url;

/// Current wall-clock time as Unix seconds
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Extract domain (host) from URL
pub fn extract_domain(url: &str) -> Result<String> {
    let parsed = Url::parse(url).context("Invalid URL")?;

    parsed
        .host_str()
        .map(|s| s.to_string())
        .context("No host in URL")
}

/// Resolve a possibly relative link against a base URL
pub fn resolve_url(base: &str, link: &str) -> Result<String> {
    let base = Url::parse(base).with_context(|| format!("Invalid base URL: {base}"))?;
    let joined = base
        .join(link)
        .with_context(|| format!("Cannot resolve '{link}' against '{base}'"))?;
    Ok(joined.to_string())
}

/// Absolute form of an entry point: absolute links are kept as they are,
/// anything else is resolved against `home_url`
pub fn absolute_url(home_url: &str, link: &str) -> Result<String> {
    match Url::parse(link) {
        Ok(url) => Ok(url.to_string()),
        Err(_) => resolve_url(home_url, link),
    }
}

/// Unique hosts of the given entry points, in first-seen order.
///
/// Absolute entry points are used as they are and relative ones are resolved
/// against `home_url`; links that do not resolve to a URL with a host are
/// skipped.
pub fn unique_domains<'a>(home_url: &str, entry_points: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut domains: Vec<String> = Vec::new();

    for link in entry_points {
        let Ok(absolute) = absolute_url(home_url, link) else {
            tracing::debug!(link = %link, "Skipping unresolvable entry point");
            continue;
        };
        if let Ok(domain) = extract_domain(&absolute) {
            if !domains.contains(&domain) {
                domains.push(domain);
            }
        }
    }

    domains
}

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Append the items of `incoming` that `existing` does not already contain
pub fn merge_unique<T: PartialEq + Clone>(existing: &mut Vec<T>, incoming: &[T]) {
    for item in incoming {
        if !existing.contains(item) {
            existing.push(item.clone());
        }
    }
}
