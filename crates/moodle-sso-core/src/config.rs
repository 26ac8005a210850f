// Site and identity-provider configuration.
//
// Config is input data: it arrives from the embedder (bundled defaults,
// remote config, user settings) already assembled. The registry only does
// hostname lookup with a subdomain-suffix fallback and a standard-Moodle
// default.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Mobile-app service name used when requesting a token.
pub const MOBILE_SERVICE: &str = "moodle_mobile_app";

/// Custom URI scheme the token redirect targets.
pub const DEFAULT_URL_SCHEME: &str = "moodlemobile";

/// Field-name mapping for an identity provider's login form.
///
/// Lets one orchestrator serve differently-templated IdP deployments: the
/// credential POST uses these names as form keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldMapping {
    pub username: String,
    pub password: String,
    pub submit: String,
    pub auth_state: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            username: "username".into(),
            password: "password".into(),
            submit: "submit".into(),
            auth_state: "AuthState".into(),
        }
    }
}

/// Predicate deciding whether a credential-POST response body indicates a
/// rejected login.
pub type FailureHeuristic = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Default invalid-credential heuristic: a failure keyword co-occurring with
/// a mention of username or password, case-insensitive. The scoping avoids
/// false positives on unrelated page text containing e.g. "error".
pub fn default_failure_heuristic(html: &str) -> bool {
    let lower = html.to_lowercase();
    let keyword = ["incorrect", "wrong", "invalid", "error"]
        .iter()
        .any(|k| lower.contains(k));
    keyword && (lower.contains("username") || lower.contains("password"))
}

/// Identity-provider configuration for the SAML login flow.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Endpoint the credential POST is sent to.
    pub login_endpoint: String,

    /// Form field names for the credential POST.
    #[serde(default)]
    pub fields: FieldMapping,

    /// Hostnames on which out-of-band redirects may be observed (the IdP and
    /// the application hosts).
    #[serde(default)]
    pub observed_hosts: Vec<String>,

    /// Override for the invalid-credential detection. Defaults to
    /// [`default_failure_heuristic`] when unset.
    #[serde(skip)]
    pub failure_heuristic: Option<FailureHeuristic>,
}

impl ProviderConfig {
    pub fn new(login_endpoint: impl Into<String>) -> Self {
        Self {
            login_endpoint: login_endpoint.into(),
            fields: FieldMapping::default(),
            observed_hosts: Vec::new(),
            failure_heuristic: None,
        }
    }

    /// Run the configured (or default) invalid-credential check.
    pub fn looks_like_credential_failure(&self, html: &str) -> bool {
        match &self.failure_heuristic {
            Some(heuristic) => heuristic(html),
            None => default_failure_heuristic(html),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("login_endpoint", &self.login_endpoint)
            .field("fields", &self.fields)
            .field("observed_hosts", &self.observed_hosts)
            .field(
                "failure_heuristic",
                &self.failure_heuristic.as_ref().map(|_| "<custom>"),
            )
            .finish()
    }
}

/// Well-known endpoint set for one Moodle site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteUrls {
    pub login: String,
    pub token: String,
    pub service: String,
    pub ajax: String,
    pub launch: String,
}

impl SiteUrls {
    /// Standard Moodle endpoint layout for a hostname.
    pub fn standard(hostname: &str) -> Self {
        Self {
            login: format!("https://{hostname}/login/index.php"),
            token: format!("https://{hostname}/login/token.php"),
            service: format!("https://{hostname}/webservice/rest/server.php"),
            ajax: format!("https://{hostname}/lib/ajax/service.php"),
            launch: format!("https://{hostname}/admin/tool/mobile/launch.php"),
        }
    }
}

/// One site's configuration: endpoints plus an optional SSO provider block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    pub hostname: String,
    pub name: String,
    pub short_name: String,
    pub urls: SiteUrls,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso: Option<ProviderConfig>,
}

impl SiteConfig {
    /// Default config treating `hostname` as a standard Moodle deployment.
    pub fn standard(hostname: &str) -> Self {
        let short = hostname
            .split('.')
            .next()
            .unwrap_or(hostname)
            .to_uppercase();
        Self {
            hostname: hostname.to_string(),
            name: hostname.to_string(),
            short_name: short,
            urls: SiteUrls::standard(hostname),
            sso: None,
        }
    }

    /// Build the mobile-launch URL that starts a token hand-off, with a
    /// fresh passport and the given custom URL scheme.
    pub fn launch_url(&self, url_scheme: &str) -> String {
        format!(
            "{}?service={}&passport={}&urlscheme={}",
            self.urls.launch,
            MOBILE_SERVICE,
            generate_passport(),
            url_scheme
        )
    }
}

/// Random `int.decimal` passport accompanying a launch request. The site
/// echoes it back in the token redirect; the value itself is opaque.
pub fn generate_passport() -> String {
    let mut rng = rand::thread_rng();
    let int: u32 = rng.gen_range(0..1000);
    let decimal: u32 = rng.gen_range(0..10_000_000);
    format!("{int}.{decimal}")
}

/// Hostname-keyed site lookup with subdomain-suffix matching.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteRegistry {
    sites: HashMap<String, SiteConfig>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, config: SiteConfig) {
        self.sites.insert(config.hostname.clone(), config);
    }

    /// Look up a site config: exact hostname first, then any configured
    /// domain the hostname is a subdomain of, then a standard-Moodle
    /// default for unknown hosts.
    pub fn resolve(&self, hostname: &str) -> SiteConfig {
        if let Some(config) = self.sites.get(hostname) {
            return config.clone();
        }
        for (domain, config) in &self.sites {
            if hostname.ends_with(domain.as_str()) {
                let mut config = config.clone();
                config.hostname = hostname.to_string();
                return config;
            }
        }
        SiteConfig::standard(hostname)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_mapping_defaults() {
        let fields = FieldMapping::default();
        assert_eq!(fields.username, "username");
        assert_eq!(fields.password, "password");
        assert_eq!(fields.submit, "submit");
        assert_eq!(fields.auth_state, "AuthState");
    }

    #[test]
    fn test_default_heuristic_requires_scope() {
        assert!(default_failure_heuristic(
            "<p>Incorrect username or password</p>"
        ));
        assert!(default_failure_heuristic("Invalid password."));
        // Failure keyword without a credential mention is not a match
        assert!(!default_failure_heuristic("<div>An error occurred</div>"));
        // Credential mention without a failure keyword is not a match
        assert!(!default_failure_heuristic("Enter your username"));
    }

    #[test]
    fn test_custom_heuristic_overrides_default() {
        let mut provider = ProviderConfig::new("https://idp.example.my/login");
        provider.failure_heuristic = Some(Arc::new(|html| html.contains("LOGIN_DENIED")));
        assert!(provider.looks_like_credential_failure("LOGIN_DENIED"));
        assert!(!provider.looks_like_credential_failure("Incorrect password"));
    }

    #[test]
    fn test_standard_site_urls() {
        let site = SiteConfig::standard("lms.example.edu");
        assert_eq!(site.short_name, "LMS");
        assert_eq!(site.urls.token, "https://lms.example.edu/login/token.php");
        assert_eq!(
            site.urls.launch,
            "https://lms.example.edu/admin/tool/mobile/launch.php"
        );
        assert!(site.sso.is_none());
    }

    #[test]
    fn test_launch_url_shape() {
        let site = SiteConfig::standard("lms.example.edu");
        let url = site.launch_url(DEFAULT_URL_SCHEME);
        assert!(url.starts_with("https://lms.example.edu/admin/tool/mobile/launch.php?"));
        assert!(url.contains("service=moodle_mobile_app"));
        assert!(url.contains("passport="));
        assert!(url.contains("urlscheme=moodlemobile"));
    }

    #[test]
    fn test_passport_shape() {
        let passport = generate_passport();
        let parts: Vec<&str> = passport.split('.').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].parse::<u32>().unwrap() < 1000);
        assert!(parts[1].parse::<u32>().unwrap() < 10_000_000);
    }

    #[test]
    fn test_registry_exact_and_suffix_match() {
        let mut registry = SiteRegistry::new();
        registry.insert(SiteConfig::standard("folio.example.my"));

        assert_eq!(registry.resolve("folio.example.my").hostname, "folio.example.my");

        // Subdomain of a configured site inherits its config
        let sub = registry.resolve("beta.folio.example.my");
        assert_eq!(sub.hostname, "beta.folio.example.my");
        assert_eq!(sub.short_name, "FOLIO");
    }

    #[test]
    fn test_registry_default_fallback() {
        let registry = SiteRegistry::new();
        let config = registry.resolve("unknown.edu");
        assert_eq!(config.hostname, "unknown.edu");
        assert_eq!(config.urls.login, "https://unknown.edu/login/index.php");
    }

    #[test]
    fn test_provider_config_serde() {
        let json = r#"{
            "loginEndpoint": "https://idp.example.my/module.php/core/loginuserpass.php",
            "fields": {"username": "user", "password": "pass", "submit": "go", "authState": "AuthState"},
            "observedHosts": ["idp.example.my", "folio.example.my"]
        }"#;
        let provider: ProviderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(provider.fields.username, "user");
        assert_eq!(provider.observed_hosts.len(), 2);
        assert!(provider.failure_heuristic.is_none());
    }
}
