// Attempt-scoped cookie jar.
//
// Stores one pre-joined `Cookie` header value per hostname, extracted from
// raw `Set-Cookie` headers with the attributes stripped. The jar lives only
// for the duration of one login attempt; durable cookies belong to the
// embedder's ambient store.

use std::collections::HashMap;

use async_trait::async_trait;

use moodle_sso_core::urls::parent_domain;

#[derive(Debug, Default)]
pub struct CookieJar {
    entries: HashMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one raw `Set-Cookie` header value into the hostname's entry.
    ///
    /// Multiple cookies may arrive comma-joined in a single header value;
    /// each is truncated at its first `;` to drop attributes (Path, Expires,
    /// HttpOnly, ...). Pairs are appended, not deduplicated: the header is a
    /// replay buffer, and servers take the last occurrence of a name.
    pub fn merge(&mut self, hostname: &str, set_cookie: &str) {
        let pairs: Vec<&str> = set_cookie
            .split(',')
            .filter_map(|cookie| cookie.split(';').next())
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .collect();
        if pairs.is_empty() {
            return;
        }
        let entry = self.entries.entry(hostname.to_string()).or_default();
        for pair in pairs {
            if !entry.is_empty() {
                entry.push_str("; ");
            }
            entry.push_str(pair);
        }
    }

    /// The joined `Cookie` header value for a hostname, if any was stored.
    pub fn get(&self, hostname: &str) -> Option<&str> {
        self.entries.get(hostname).map(String::as_str)
    }

    /// Drop everything. Called at the start of each login attempt so no
    /// session state leaks between attempts.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read-only view of the embedder's durable cookie store (a browser profile,
/// a persisted jar). Queried by exact hostname or parent-domain pattern; the
/// returned value is a ready-to-send `Cookie` header.
#[async_trait]
pub trait AmbientCookieStore: Send + Sync {
    async fn cookies_for(&self, domain: &str) -> Option<String>;
}

/// Ambient store with nothing in it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAmbientCookies;

#[async_trait]
impl AmbientCookieStore for NoAmbientCookies {
    async fn cookies_for(&self, _domain: &str) -> Option<String> {
        None
    }
}

/// Ambient cookies for a hostname: exact match first, then the registrable
/// parent domain (`sso.example.my` falls back to `.example.my`, catching
/// cookies set domain-wide by the identity provider).
pub async fn ambient_cookies(store: &dyn AmbientCookieStore, hostname: &str) -> Option<String> {
    if let Some(cookies) = store.cookies_for(hostname).await {
        if !cookies.is_empty() {
            return Some(cookies);
        }
    }
    let parent = parent_domain(hostname)?;
    store
        .cookies_for(&parent)
        .await
        .filter(|cookies| !cookies.is_empty())
}

/// Full `Cookie` header for one request host: ambient cookies first, then
/// the attempt-local jar's pairs.
pub async fn combined_cookie_header(
    jar: &CookieJar,
    store: &dyn AmbientCookieStore,
    hostname: &str,
) -> Option<String> {
    let ambient = ambient_cookies(store, hostname).await;
    let local = jar.get(hostname);
    match (ambient, local) {
        (Some(a), Some(l)) => Some(format!("{a}; {l}")),
        (Some(a), None) => Some(a),
        (None, Some(l)) => Some(l.to_string()),
        (None, None) => None,
    }
}
