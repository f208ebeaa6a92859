//! Typed site settings backed by the option store
//!
//! Settings are loaded once per invocation and passed explicitly; nothing
//! else in the crate reads these keys directly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::{ConfigStore, ConfigStoreExt, StorageResult};

/// Local warm-up interval in minutes
pub const INTERVAL_KEY: &str = "setting-interval";
pub const HOME_URL_KEY: &str = "setting-home-url";
pub const ENTRY_POINTS_KEY: &str = "setting-entry-points";
pub const USER_AGENT_KEY: &str = "setting-user-agent";
pub const COOKIES_KEY: &str = "setting-cookies";
pub const REQUEST_HEADERS_KEY: &str = "setting-request-headers";

// Per-domain keys, suffixed with the domain
pub const LICENSE_KEY_PREFIX: &str = "setting-external-warmer-license-key";
pub const VALIDATION_CODE_PREFIX: &str =
    "setting-external-warmer-key-validation-endpoint-last-response-code";
pub const SERVERS_PREFIX: &str = "setting-external-warmer-servers-to-use";
pub const EXTERNAL_INTERVAL_PREFIX: &str = "setting-external-warmer-interval";

/// A configured entry point, absolute or relative to the home URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub url: String,
}

/// A custom request header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub name: String,
    pub value: String,
}

/// Site-wide warm-up settings
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WarmerSettings {
    /// Local warm-up cadence in minutes; 0 disables the interval
    pub interval_minutes: i64,
    pub home_url: String,
    pub entry_points: Vec<EntryPoint>,
    pub user_agent: Option<String>,
    pub cookies: BTreeMap<String, String>,
    pub request_headers: Vec<RequestHeader>,
}

impl WarmerSettings {
    pub fn load(store: &dyn ConfigStore) -> StorageResult<Self> {
        Ok(Self {
            interval_minutes: store.get_or(INTERVAL_KEY, 0)?,
            home_url: store.get_or(HOME_URL_KEY, String::new())?,
            entry_points: store.get_or(ENTRY_POINTS_KEY, Vec::new())?,
            user_agent: store
                .get_as::<String>(USER_AGENT_KEY)?
                .filter(|ua| !ua.is_empty()),
            cookies: store.get_or(COOKIES_KEY, BTreeMap::new())?,
            request_headers: store.get_or(REQUEST_HEADERS_KEY, Vec::new())?,
        })
    }

    pub fn save(&self, store: &dyn ConfigStore) -> StorageResult<()> {
        store.set_as(INTERVAL_KEY, &self.interval_minutes)?;
        store.set_as(HOME_URL_KEY, &self.home_url)?;
        store.set_as(ENTRY_POINTS_KEY, &self.entry_points)?;
        match &self.user_agent {
            Some(ua) => store.set_as(USER_AGENT_KEY, ua)?,
            None => {
                store.delete(USER_AGENT_KEY)?;
            }
        }
        store.set_as(COOKIES_KEY, &self.cookies)?;
        store.set_as(REQUEST_HEADERS_KEY, &self.request_headers)?;
        Ok(())
    }

    /// Entry point URLs as configured
    pub fn entry_point_urls(&self) -> impl Iterator<Item = &str> {
        self.entry_points.iter().map(|e| e.url.as_str())
    }

    pub fn header_pairs(&self) -> Vec<(String, String)> {
        self.request_headers
            .iter()
            .map(|h| (h.name.clone(), h.value.clone()))
            .collect()
    }
}

/// Remote warmer settings for one domain
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DomainSettings {
    pub domain: String,
    pub license_key: Option<String>,
    pub last_validation_code: Option<i64>,
    pub servers: Vec<String>,
    /// External interval in hours; 0 disables the interval
    pub interval_hours: i64,
}

impl DomainSettings {
    pub fn load(store: &dyn ConfigStore, domain: &str) -> StorageResult<Self> {
        Ok(Self {
            domain: domain.to_string(),
            license_key: store
                .get_as::<String>(&format!("{LICENSE_KEY_PREFIX}{domain}"))?
                .filter(|k| !k.is_empty()),
            last_validation_code: store.get_as(&format!("{VALIDATION_CODE_PREFIX}{domain}"))?,
            servers: store.get_or(&format!("{SERVERS_PREFIX}{domain}"), Vec::new())?,
            interval_hours: store.get_or(&format!("{EXTERNAL_INTERVAL_PREFIX}{domain}"), 0)?,
        })
    }

    pub fn save(&self, store: &dyn ConfigStore) -> StorageResult<()> {
        let domain = &self.domain;
        match &self.license_key {
            Some(key) => store.set_as(&format!("{LICENSE_KEY_PREFIX}{domain}"), key)?,
            None => {
                store.delete(&format!("{LICENSE_KEY_PREFIX}{domain}"))?;
            }
        }
        match self.last_validation_code {
            Some(code) => store.set_as(&format!("{VALIDATION_CODE_PREFIX}{domain}"), &code)?,
            None => {
                store.delete(&format!("{VALIDATION_CODE_PREFIX}{domain}"))?;
            }
        }
        store.set_as(&format!("{SERVERS_PREFIX}{domain}"), &self.servers)?;
        store.set_as(&format!("{EXTERNAL_INTERVAL_PREFIX}{domain}"), &self.interval_hours)?;
        Ok(())
    }

    /// Whether the license key validated against the remote endpoint
    pub fn is_licensed(&self) -> bool {
        self.license_key.is_some() && self.last_validation_code == Some(200)
    }

    /// Servers to send chunks to; empty unless the license validated
    pub fn servers_to_use(&self) -> &[String] {
        if self.is_licensed() {
            &self.servers
        } else {
            &[]
        }
    }

    /// External interval in seconds when every precondition holds. An interval
    /// too large to express in seconds counts as disabled.
    pub fn external_interval_secs(&self) -> Option<i64> {
        let secs = self.interval_hours.checked_mul(3600)?;
        (self.is_licensed() && !self.servers.is_empty() && secs > 0).then_some(secs)
    }
}
