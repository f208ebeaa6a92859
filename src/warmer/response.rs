//! Normalization of remote warmer responses
//!
//! A server answers with one record per requested URL:
//! `{"status": "processed", "time": 0.42, "headers": ["HTTP/1.1 200 OK", "Content-Type: text/html"]}`.
//! Records are aligned with the requested URLs by position. Every requested
//! URL ends up with exactly one [`WarmResult`], whatever the server did.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::client::ServerResponse;
use crate::storage::CacheStatus;
use crate::utils::round2;

static STATUS_LINE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^HTTP/\S*\s+(\S+)").unwrap());

pub const PROCESSED: &str = "processed";
pub const NO_RESULT_REASON: &str = "No result returned by server";
pub const MALFORMED_REASON: &str = "Malformed server response";

/// One per-URL record in a server response body
#[derive(Debug, Clone, Deserialize)]
pub struct VisitRecord {
    pub status: String,
    #[serde(default)]
    pub time: Option<f64>,
    #[serde(default)]
    pub headers: Vec<String>,
}

/// Outcome of one URL visit
#[derive(Debug, Clone, PartialEq)]
pub enum WarmStatus {
    Processed,
    Failed(String),
}

/// Normalized per-URL result
#[derive(Debug, Clone, PartialEq)]
pub struct WarmResult {
    pub url: String,
    pub status: WarmStatus,
    pub response_code: String,
    pub elapsed_seconds: Option<f64>,
    pub content_type: String,
    pub content_length: String,
    pub cache: CacheStatus,
}

impl WarmResult {
    fn failed(url: &str, reason: impl Into<String>, elapsed_seconds: Option<f64>) -> Self {
        Self {
            url: url.to_string(),
            status: WarmStatus::Failed(reason.into()),
            response_code: String::new(),
            elapsed_seconds,
            content_type: String::new(),
            content_length: String::new(),
            cache: CacheStatus::default(),
        }
    }

    pub fn is_processed(&self) -> bool {
        self.status == WarmStatus::Processed
    }
}

/// Response headers of the final hop of a visit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedHeaders {
    pub response_code: String,
    pub headers: HashMap<String, String>,
}

impl ParsedHeaders {
    pub fn get(&self, name: &str) -> &str {
        self.headers.get(name).map(String::as_str).unwrap_or("")
    }
}

/// Parse raw response header lines.
///
/// A line starting with `HTTP/` is a status line; its second token is the
/// response code, and after redirects the last status line gives the code.
/// Other lines are `Name: Value` pairs. The first occurrence of a name wins
/// across all hops. Names are lower-cased.
pub fn parse_header_lines<S: AsRef<str>>(lines: &[S]) -> ParsedHeaders {
    let mut parsed = ParsedHeaders::default();
    for line in lines {
        let line = line.as_ref();
        if let Some(caps) = STATUS_LINE_REGEX.captures(line) {
            parsed.response_code = caps[1].to_string();
        } else if let Some((name, value)) = line.split_once(": ") {
            parsed
                .headers
                .entry(name.trim().to_ascii_lowercase())
                .or_insert_with(|| value.trim().to_string());
        }
    }
    parsed
}

/// `text/html; charset=UTF-8` -> `text/html`
pub fn primary_content_type(value: &str) -> &str {
    value.split(';').next().unwrap_or("").trim()
}

fn result_from_record(url: &str, record: &VisitRecord) -> WarmResult {
    let elapsed = Some(round2(record.time.unwrap_or(0.0)));

    if record.status != PROCESSED {
        return WarmResult::failed(
            url,
            format!("External server status: {}", record.status),
            elapsed,
        );
    }

    let parsed = parse_header_lines(&record.headers);
    WarmResult {
        url: url.to_string(),
        status: WarmStatus::Processed,
        response_code: parsed.response_code.clone(),
        elapsed_seconds: elapsed,
        content_type: primary_content_type(parsed.get("content-type")).to_string(),
        content_length: parsed.get("content-length").to_string(),
        cache: CacheStatus {
            cloudflare: parsed.get("cf-cache-status").to_string(),
            super_cache: parsed.get("x-wp-super-cache").to_string(),
            x_cache: parsed.get("x-cache").to_string(),
        },
    }
}

/// Parse a 200 body into one result per URL
pub fn parse_visits(body: &str, urls: &[String]) -> Vec<WarmResult> {
    let records: Vec<VisitRecord> = match serde_json::from_str(body) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(error = %e, "Remote warmer returned a malformed body");
            return urls
                .iter()
                .map(|url| WarmResult::failed(url, MALFORMED_REASON, None))
                .collect();
        }
    };

    if records.len() > urls.len() {
        tracing::warn!(
            records = records.len(),
            urls = urls.len(),
            "Remote warmer returned more records than URLs, ignoring the surplus"
        );
    }

    urls.iter()
        .enumerate()
        .map(|(i, url)| match records.get(i) {
            Some(record) => result_from_record(url, record),
            None => WarmResult::failed(url, NO_RESULT_REASON, None),
        })
        .collect()
}

/// One result per URL for whatever a server answered
pub fn results_for_response(response: &ServerResponse, urls: &[String]) -> Vec<WarmResult> {
    match response.status {
        Some(200) => parse_visits(&response.body, urls),
        Some(code) => urls
            .iter()
            .map(|url| WarmResult::failed(url, format!("Server response code: {code}"), None))
            .collect(),
        None => {
            let error = response.error.as_deref().unwrap_or("unknown error");
            urls.iter()
                .map(|url| WarmResult::failed(url, format!("Request failed: {error}"), None))
                .collect()
        }
    }
}
