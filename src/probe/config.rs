use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;

use crate::error::{ProbeError, Result};

/// Route prefixes tried in order: the proxy's namespaced mount, then the
/// bare upstream path.
pub const DEFAULT_PREFIXES: [&str; 2] = ["/gemini", ""];

pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// Deadline for generation calls; for streams, the idle limit per chunk.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Immutable settings shared by every probe operation.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    base_url: String,
    api_key: Option<String>,
    prefixes: Vec<String>,
    alt_sse: bool,
    generation_timeout: Duration,
}

impl ProbeConfig {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            prefixes: DEFAULT_PREFIXES.iter().map(|p| p.to_string()).collect(),
            alt_sse: false,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }

    /// Replace the candidate route prefixes. An empty list keeps the defaults.
    pub fn with_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefixes: Vec<String> = prefixes
            .into_iter()
            .map(|p| normalize_prefix(p.as_ref()))
            .collect();
        if !prefixes.is_empty() {
            self.prefixes = prefixes;
        }
        self
    }

    /// Ask streaming endpoints for SSE framing via `?alt=sse`.
    pub fn with_alt_sse(mut self, alt_sse: bool) -> Self {
        self.alt_sse = alt_sse;
        self
    }

    pub fn with_generation_timeout(mut self, limit: Duration) -> Self {
        self.generation_timeout = limit;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn alt_sse(&self) -> bool {
        self.alt_sse
    }

    pub fn generation_timeout(&self) -> Duration {
        self.generation_timeout
    }

    /// Default headers for every request. The key, when present, is sent both
    /// as `x-goog-api-key` and as a bearer token.
    pub fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(key) = &self.api_key {
            let mut api_key = HeaderValue::from_str(key)
                .map_err(|e| ProbeError::ConfigError(format!("invalid API key: {}", e)))?;
            api_key.set_sensitive(true);
            let mut bearer = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| ProbeError::ConfigError(format!("invalid API key: {}", e)))?;
            bearer.set_sensitive(true);

            headers.insert(API_KEY_HEADER, api_key);
            headers.insert(AUTHORIZATION, bearer);
        }

        Ok(headers)
    }

    /// One path per prefix for the given route, in probe order.
    pub fn candidate_paths(&self, route: &str) -> Vec<String> {
        self.prefixes
            .iter()
            .map(|prefix| format!("{}{}", prefix, route))
            .collect()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
