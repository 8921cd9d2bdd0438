//! Per-transfer request context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Headers sent with every request of a transfer.
///
/// Carries the security context a resource may require (cookies, referer,
/// authorization) so that segment requests look identical to the request
/// that discovered the resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeaders {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,

    /// Any additional headers, keyed by header name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_agent(mut self, value: impl Into<String>) -> Self {
        self.user_agent = Some(value.into());
        self
    }

    pub fn with_referer(mut self, value: impl Into<String>) -> Self {
        self.referer = Some(value.into());
        self
    }

    pub fn with_cookie(mut self, value: impl Into<String>) -> Self {
        self.cookie = Some(value.into());
        self
    }

    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// Add an arbitrary header. A later value for the same name replaces the
    /// earlier one.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// Parse a `Name: value` header line.
    pub fn parse_line(line: &str) -> Option<(String, String)> {
        let (name, value) = line.split_once(':')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some((name.to_string(), value.trim().to_string()))
    }

    /// All headers as `(name, value)` pairs, well-known headers first.
    pub fn pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs = Vec::with_capacity(4 + self.extra.len());
        if let Some(v) = &self.user_agent {
            pairs.push(("User-Agent", v.as_str()));
        }
        if let Some(v) = &self.referer {
            pairs.push(("Referer", v.as_str()));
        }
        if let Some(v) = &self.cookie {
            pairs.push(("Cookie", v.as_str()));
        }
        if let Some(v) = &self.authorization {
            pairs.push(("Authorization", v.as_str()));
        }
        for (name, value) in &self.extra {
            pairs.push((name.as_str(), value.as_str()));
        }
        pairs
    }

    pub fn is_empty(&self) -> bool {
        self.user_agent.is_none()
            && self.referer.is_none()
            && self.cookie.is_none()
            && self.authorization.is_none()
            && self.extra.is_empty()
    }
}
