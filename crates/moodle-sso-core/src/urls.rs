// URL helpers for the login flow: host extraction, Location resolution, and
// the parent-domain fallback used when reading ambient cookies.

use url::Url;

/// Extract the hostname from a URL, without port.
pub fn get_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|h| h.to_string()))
}

/// Resolve a `Location` header value against the URL it was served from.
///
/// Absolute values are returned as-is; relative values (both path-absolute
/// and path-relative) are joined against the base.
pub fn resolve_location(base: &str, location: &str) -> Option<String> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return Some(location.to_string());
    }
    Url::parse(base)
        .ok()?
        .join(location)
        .ok()
        .map(|u| u.to_string())
}

/// Registrable parent domain for a hostname, leading dot included:
/// `folio.campus.example.my` → `.example.my`. Returns `None` for bare
/// two-label hosts (no parent to fall back to) and single labels.
pub fn parent_domain(hostname: &str) -> Option<String> {
    let parts: Vec<&str> = hostname.split('.').collect();
    if parts.len() < 3 {
        return None;
    }
    Some(format!(".{}", parts[parts.len() - 2..].join(".")))
}
