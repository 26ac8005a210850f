// Composite token codec.
//
// The token redirect carries `token=<base64>` where the decoded payload is
// `private:::service[:::signature]`. Only the service token (the second
// segment) is usable against the web-service API; the private token renews
// sessions and the signature is ignored here.

use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;

pub const TOKEN_DELIMITER: &str = ":::";

fn token_param_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"token=([A-Za-z0-9+/=]+)").unwrap())
}

/// Decoded `private:::service[:::signature]` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeToken {
    pub private_token: String,
    pub service_token: String,
    pub signature: Option<String>,
}

/// Decode a base64 composite token. Returns `None` for anything that is not
/// valid base64, not UTF-8, or has fewer than two segments.
pub fn decode(encoded: &str) -> Option<CompositeToken> {
    let bytes = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    let parts: Vec<&str> = decoded.split(TOKEN_DELIMITER).collect();
    if parts.len() < 2 {
        return None;
    }
    Some(CompositeToken {
        private_token: parts[0].to_string(),
        service_token: parts[1].to_string(),
        signature: parts.get(2).filter(|s| !s.is_empty()).map(|s| s.to_string()),
    })
}

/// Shortcut for the only segment most callers want.
pub fn service_token(encoded: &str) -> Option<String> {
    decode(encoded).map(|token| token.service_token)
}

/// The raw base64 value of the first `token=` parameter in a URL, if any.
pub fn find_token_param(url: &str) -> Option<&str> {
    token_param_re()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
