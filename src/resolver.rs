use std::collections::HashMap;

use crate::archive::RecordedExchange;

/// Path prefix under which recorded responses are served.
pub const LIVE_PREFIX: &str = "/live";

/// Strips `api_root` from the front of `request_url`.
///
/// URLs that do not start with `api_root` are returned unchanged and indexed
/// under their full text.
pub fn normalize_request_url<'a>(request_url: &'a str, api_root: &str) -> &'a str {
    request_url.strip_prefix(api_root).unwrap_or(request_url)
}

/// Key used to look up a recorded response for an incoming request.
///
/// Built from the raw request path and query exactly as received: no
/// percent-decoding, no trailing-slash handling, no query reordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LookupKey(String);

impl LookupKey {
    /// Returns `None` when `path` is not under [`LIVE_PREFIX`].
    ///
    /// `/live` maps to the empty key and `/live/` to `/`. An empty query
    /// (a bare trailing `?`) adds nothing to the key.
    pub fn from_request_target(path: &str, query: Option<&str>) -> Option<Self> {
        let rest = path.strip_prefix(LIVE_PREFIX)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }

        let mut key = String::with_capacity(rest.len() + query.map_or(0, |q| q.len() + 1));
        key.push_str(rest);
        if let Some(query) = query.filter(|query| !query.is_empty()) {
            key.push('?');
            key.push_str(query);
        }
        Some(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LookupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'a> {
    Hit(&'a str),
    Miss,
}

impl<'a> Resolution<'a> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn body(self) -> Option<&'a str> {
        match self {
            Self::Hit(body) => Some(body),
            Self::Miss => None,
        }
    }

    pub(crate) fn log_label(&self) -> &'static str {
        match self {
            Self::Hit(_) => "hit",
            Self::Miss => "miss",
        }
    }
}

/// Recorded response bodies keyed by request URL relative to the API root.
///
/// Built once and never mutated; share it behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceIndex {
    resources: HashMap<String, String>,
}

impl ResourceIndex {
    /// Later exchanges overwrite earlier ones that normalize to the same key.
    pub fn build<'a, I>(exchanges: I, api_root: &str) -> Self
    where
        I: IntoIterator<Item = &'a RecordedExchange>,
    {
        let mut resources = HashMap::new();
        for exchange in exchanges {
            let key = normalize_request_url(&exchange.request_url, api_root);
            resources.insert(key.to_owned(), exchange.response_body.clone());
        }
        Self { resources }
    }

    pub fn resolve(&self, key: &LookupKey) -> Resolution<'_> {
        self.resolve_str(key.as_str())
    }

    pub fn resolve_str(&self, key: &str) -> Resolution<'_> {
        match self.resources.get(key) {
            Some(body) => Resolution::Hit(body),
            None => Resolution::Miss,
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn sorted_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.resources.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}
