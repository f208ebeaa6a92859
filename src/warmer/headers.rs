//! Ordered request header lists
//!
//! Headers travel between the local warmer, the queue and the remote warmer
//! protocol as `"Name: Value"` strings. Inside the crate they are kept as
//! ordered `(name, value)` pairs and only turned into strings at those
//! boundaries. A `:` inside a value is escaped as `\:` on the wire so the
//! remote side can split on the first unescaped colon.

use std::collections::BTreeMap;
use std::fmt;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use super::error::{WarmerError, WarmerResult};

/// Ordered list of request headers
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct HeaderList(Vec<(String, String)>);

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        let mut list = Self::new();
        for (name, value) in pairs {
            list.set(name, value);
        }
        list
    }

    /// Set a header. An existing header with the same name keeps its
    /// position and gets the new value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Case-insensitive lookup
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Wire form: one `"Name: Value"` string per header, `:` in values escaped
    pub fn to_wire(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value.replace(':', "\\:")))
            .collect()
    }

    /// Parse the wire form produced by [`HeaderList::to_wire`]
    pub fn from_wire<S: AsRef<str>>(lines: &[S]) -> WarmerResult<Self> {
        let mut list = Self::new();
        for line in lines {
            let (name, value) = parse_wire_line(line.as_ref())?;
            list.set(name, value);
        }
        Ok(list)
    }

    /// Convert to a reqwest header map, skipping headers reqwest rejects
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.0 {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => tracing::warn!(header = %name, "Skipping header that is not valid HTTP"),
            }
        }
        map
    }
}

impl fmt::Display for HeaderList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire().join(", "))
    }
}

impl From<HeaderList> for Vec<String> {
    fn from(list: HeaderList) -> Self {
        list.to_wire()
    }
}

impl TryFrom<Vec<String>> for HeaderList {
    type Error = WarmerError;

    fn try_from(lines: Vec<String>) -> Result<Self, Self::Error> {
        Self::from_wire(&lines)
    }
}

fn parse_wire_line(line: &str) -> WarmerResult<(String, String)> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| WarmerError::InvalidHeader(line.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(WarmerError::InvalidHeader(line.to_string()));
    }
    Ok((name.to_string(), value.trim_start().replace("\\:", ":")))
}

/// Build the header list sent with every warm-up request
///
/// `User-Agent` first, then a `Cookie` header joining `cookies` with `"; "`,
/// then the custom request headers (which may override either).
pub fn build_request_headers(
    user_agent: &str,
    cookies: &BTreeMap<String, String>,
    request_headers: &[(String, String)],
) -> HeaderList {
    let mut list = HeaderList::new();
    list.set("User-Agent", user_agent);

    if !cookies.is_empty() {
        let cookie = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        list.set("Cookie", cookie);
    }

    for (name, value) in request_headers {
        list.set(name.as_str(), value.as_str());
    }

    list
}
