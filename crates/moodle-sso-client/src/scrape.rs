// Regex form scraping for server-rendered login and consent pages.
//
// The pages involved are SimpleSAMLphp and Moodle templates: a single form,
// double-quoted attributes, hidden inputs carrying the relay state. Regexes
// are enough for that shape and keep the dependency surface flat; anything
// the patterns miss is treated as the field being absent.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use regex::Regex;

fn form_action_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<form[^>]*action="([^"]*)"[^>]*>"#).unwrap())
}

fn input_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<input[^>]*name="([^"]*)"[^>]*value="([^"]*)""#).unwrap())
}

fn meta_refresh_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"url=([^"'\s>]+)"#).unwrap())
}

// The field name comes from config, so the pattern can't be a static; cache
// compiled patterns per name instead. Regex clones share the compiled
// program.
fn hidden_field_re(name: &str) -> Regex {
    static CACHE: OnceLock<Mutex<HashMap<String, Regex>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock().unwrap();
    cache
        .entry(name.to_string())
        .or_insert_with(|| {
            let pattern = format!(r#"(?i)name="{}"\s*value="([^"]+)""#, regex::escape(name));
            Regex::new(&pattern).unwrap()
        })
        .clone()
}

/// The first form on a page: its action URL and every named input that
/// carries a value.
#[derive(Debug, Clone, Default)]
pub struct FormData {
    pub action: Option<String>,
    pub inputs: HashMap<String, String>,
}

impl FormData {
    /// True when the form can be auto-submitted as a SAML assertion: it has
    /// an action and a `SAMLResponse` field.
    pub fn is_saml_assertion(&self) -> bool {
        self.action.is_some() && self.inputs.contains_key("SAMLResponse")
    }
}

/// Scrape the first `<form>` action and all named inputs from an HTML page.
///
/// Inputs without a `value` attribute (or with `value` before `name`) are
/// skipped; the flows here only replay pre-filled hidden fields.
pub fn extract_form(html: &str) -> FormData {
    let action = form_action_re()
        .captures(html)
        .map(|caps| unescape_entities(&caps[1]));
    let mut inputs = HashMap::new();
    for caps in input_re().captures_iter(html) {
        inputs.insert(caps[1].to_string(), unescape_entities(&caps[2]));
    }
    FormData { action, inputs }
}

/// Value of one named hidden field, e.g. the SimpleSAMLphp `AuthState`.
pub fn extract_hidden_field(html: &str, name: &str) -> Option<String> {
    hidden_field_re(name)
        .captures(html)
        .map(|caps| unescape_entities(&caps[1]))
}

/// Target URL of a `<meta http-equiv="refresh">` tag, used by some IdPs in
/// place of a Location header.
pub fn extract_meta_refresh_url(html: &str) -> Option<String> {
    if !html.to_lowercase().contains("http-equiv") {
        return None;
    }
    meta_refresh_re()
        .captures(html)
        .map(|caps| unescape_entities(&caps[1]))
}

/// Undo the HTML escaping the templates apply to attribute values.
pub fn unescape_entities(value: &str) -> String {
    value.replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAML_PAGE: &str = r#"
        <html><body>
        <form method="post" action="https://folio.example.my/auth/saml2/sp/saml2-acs.php?x=1&amp;y=2">
            <input type="hidden" name="SAMLResponse" value="PHNhbWxwOlJlc3BvbnNlPg==" />
            <input type="hidden" name="RelayState" value="https://folio.example.my/launch" />
            <noscript><input type="submit" value="Continue" /></noscript>
        </form>
        </body></html>
    "#;

    #[test]
    fn test_extract_saml_form() {
        let form = extract_form(SAML_PAGE);
        assert_eq!(
            form.action.as_deref(),
            Some("https://folio.example.my/auth/saml2/sp/saml2-acs.php?x=1&y=2")
        );
        assert_eq!(
            form.inputs.get("SAMLResponse").map(String::as_str),
            Some("PHNhbWxwOlJlc3BvbnNlPg==")
        );
        assert_eq!(
            form.inputs.get("RelayState").map(String::as_str),
            Some("https://folio.example.my/launch")
        );
        assert!(form.is_saml_assertion());
    }

    #[test]
    fn test_form_without_saml_response() {
        let form = extract_form(r#"<form action="/search"><input name="q" value="" /></form>"#);
        assert!(form.action.is_some());
        assert!(!form.is_saml_assertion());
    }

    #[test]
    fn test_no_form() {
        let form = extract_form("<html><body>Session expired</body></html>");
        assert!(form.action.is_none());
        assert!(form.inputs.is_empty());
    }

    #[test]
    fn test_extract_auth_state() {
        let html = r#"<input type="hidden" name="AuthState" value="_abc123:https://sso.example.my/return&amp;x=1" />"#;
        assert_eq!(
            extract_hidden_field(html, "AuthState").as_deref(),
            Some("_abc123:https://sso.example.my/return&x=1")
        );
        assert_eq!(extract_hidden_field(html, "SAMLResponse"), None);
    }

    #[test]
    fn test_auth_state_case_insensitive() {
        let html = r#"<INPUT NAME="AuthState" VALUE="_state1" />"#;
        assert_eq!(
            extract_hidden_field(html, "AuthState").as_deref(),
            Some("_state1")
        );
    }

    #[test]
    fn test_hidden_field_lookup_repeats_across_names() {
        let html = r#"
            <input name="AuthState" value="_s1" />
            <input name="RelayState" value="_r1" />
        "#;
        // Repeated lookups hit the cached pattern and stay independent per name
        for _ in 0..3 {
            assert_eq!(extract_hidden_field(html, "AuthState").as_deref(), Some("_s1"));
            assert_eq!(extract_hidden_field(html, "RelayState").as_deref(), Some("_r1"));
        }
        assert_eq!(extract_hidden_field(html, "SAMLResponse"), None);
    }

    #[test]
    fn test_meta_refresh() {
        let html = r#"<meta http-equiv="refresh" content="0;url=https://folio.example.my/launch?a=1">"#;
        assert_eq!(
            extract_meta_refresh_url(html).as_deref(),
            Some("https://folio.example.my/launch?a=1")
        );
        assert_eq!(extract_meta_refresh_url("<p>url=not-a-refresh</p>"), None);
    }
}
