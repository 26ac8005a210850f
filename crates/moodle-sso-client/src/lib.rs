#![doc = include_str!("../README.md")]

pub mod capture;
pub mod cookie_jar;
pub mod http;
pub mod redirect;
pub mod scrape;
pub mod token;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use moodle_sso_core::config::{ProviderConfig, MOBILE_SERVICE};
use moodle_sso_core::urls::{get_host, resolve_location};
use moodle_sso_core::{Result, SsoError, SsoLogger};

pub use capture::RedirectCaptureBroker;
pub use cookie_jar::{AmbientCookieStore, CookieJar, NoAmbientCookies};
pub use http::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
pub use redirect::{RedirectWalk, RedirectWalker, DEFAULT_MAX_HOPS};
pub use token::{service_token, CompositeToken};
pub use types::{LoginOutcome, LoginStage};

/// Tunables for the login flow.
#[derive(Debug, Clone)]
pub struct FetcherOptions {
    /// Custom URI scheme the token redirect targets, without `://`.
    pub url_scheme: String,
    /// Redirect-chain hop cap.
    pub max_redirect_hops: usize,
    /// How long the token-capture race waits for the out-of-band observer.
    pub capture_timeout: Duration,
    /// Outer budget for one whole login attempt.
    pub attempt_timeout: Duration,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            url_scheme: moodle_sso_core::config::DEFAULT_URL_SCHEME.into(),
            max_redirect_hops: DEFAULT_MAX_HOPS,
            capture_timeout: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(20),
        }
    }
}

/// Orchestrates a headless SAML SSO login against a Moodle site.
///
/// One attempt at a time: the cookie jar and capture broker are reset at the
/// start of each attempt, so concurrent calls on the same fetcher would
/// trample each other's session state. Embedders serialize attempts.
pub struct SsoTokenFetcher {
    transport: Arc<dyn HttpTransport>,
    ambient: Arc<dyn AmbientCookieStore>,
    jar: Mutex<CookieJar>,
    broker: Arc<RedirectCaptureBroker>,
    scheme_prefix: String,
    options: FetcherOptions,
    logger: SsoLogger,
}

impl SsoTokenFetcher {
    /// Fetcher backed by a real reqwest transport and no ambient cookies.
    pub fn new(options: FetcherOptions) -> Result<Self> {
        Ok(Self::with_transport(
            Arc::new(ReqwestTransport::new()?),
            options,
        ))
    }

    /// Fetcher over a caller-supplied transport. Tests script the transport;
    /// embedders may wrap their own HTTP stack.
    pub fn with_transport(transport: Arc<dyn HttpTransport>, options: FetcherOptions) -> Self {
        let scheme_prefix = format!("{}://", options.url_scheme);
        Self {
            transport,
            ambient: Arc::new(NoAmbientCookies),
            jar: Mutex::new(CookieJar::new()),
            broker: Arc::new(RedirectCaptureBroker::new(scheme_prefix.clone())),
            scheme_prefix,
            options,
            logger: SsoLogger::default(),
        }
    }

    pub fn with_ambient_cookies(mut self, store: Arc<dyn AmbientCookieStore>) -> Self {
        self.ambient = store;
        self
    }

    pub fn with_logger(mut self, logger: SsoLogger) -> Self {
        self.logger = logger;
        self
    }

    /// The capture broker to wire into the embedder's redirect observation
    /// (e.g. a webRequest listener publishing custom-scheme redirects).
    pub fn broker(&self) -> Arc<RedirectCaptureBroker> {
        self.broker.clone()
    }

    // ─── Public operations ───────────────────────────────────────────────

    /// Check whether an existing IdP session already yields a token: walk
    /// the launch URL and look for a `token=` redirect. No credentials are
    /// sent; a `needsLogin` outcome means interactive login is required.
    pub async fn fetch_token_if_already_authenticated(&self, launch_url: &str) -> LoginOutcome {
        let attempt = self.session_probe(launch_url);
        match tokio::time::timeout(self.options.attempt_timeout, attempt).await {
            Ok(Ok(Some(token))) => LoginOutcome::success(token),
            Ok(Ok(None)) => {
                self.logger.info("no existing session; interactive login required");
                LoginOutcome::needs_login()
            }
            Ok(Err(error)) => self.fail(error),
            Err(_) => self.fail(SsoError::Timeout),
        }
    }

    /// The full handshake: launch, scrape the login page for its auth-state
    /// field, POST credentials, relay the SAML assertion, and race redirect
    /// walking against out-of-band capture for the token.
    pub async fn perform_full_login(
        &self,
        launch_url: &str,
        username: &str,
        password: &str,
        provider: &ProviderConfig,
    ) -> LoginOutcome {
        let attempt = self.full_login(launch_url, username, password, provider);
        self.run_attempt(attempt).await
    }

    /// Variant for embedders that already hold an auth-state value (scraped
    /// from a login page rendered elsewhere): skips the launch fetch and
    /// starts at the credential POST. Falls back to walking the launch URL
    /// if the capture window closes empty, since a successful credential
    /// POST leaves an IdP session behind even when no redirect was seen.
    pub async fn perform_direct_login(
        &self,
        target_site: &str,
        launch_url: &str,
        username: &str,
        password: &str,
        auth_state: &str,
        provider: &ProviderConfig,
    ) -> LoginOutcome {
        self.logger
            .debug(&format!("direct login against {target_site}"));
        let attempt = self.direct_login(launch_url, username, password, auth_state, provider);
        self.run_attempt(attempt).await
    }

    /// Standard (non-SSO) token fetch against `login/token.php` for sites
    /// that accept direct credentials.
    pub async fn fetch_token_with_password(
        &self,
        token_url: &str,
        username: &str,
        password: &str,
    ) -> LoginOutcome {
        let attempt = self.password_token(token_url, username, password);
        self.run_attempt(attempt).await
    }

    // ─── Flow internals ──────────────────────────────────────────────────

    async fn run_attempt(&self, attempt: impl std::future::Future<Output = Result<String>>) -> LoginOutcome {
        let result = match tokio::time::timeout(self.options.attempt_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(SsoError::Timeout),
        };
        match &result {
            Ok(_) => self.stage(LoginStage::Completed),
            Err(error) => {
                self.stage(LoginStage::Failed);
                self.logger.warn(&format!("login attempt failed: {error}"));
            }
        }
        result.into()
    }

    fn fail(&self, error: SsoError) -> LoginOutcome {
        self.stage(LoginStage::Failed);
        self.logger.warn(&format!("login attempt failed: {error}"));
        LoginOutcome::failure(&error)
    }

    fn stage(&self, stage: LoginStage) {
        self.logger.info(&format!("stage: {stage}"));
    }

    fn walker(&self) -> RedirectWalker<'_> {
        RedirectWalker::new(
            self.transport.as_ref(),
            &self.jar,
            self.ambient.as_ref(),
            &self.scheme_prefix,
            self.options.max_redirect_hops,
        )
    }

    async fn begin_attempt(&self, provider: Option<&ProviderConfig>) {
        self.jar.lock().await.clear();
        let hosts = provider.map(|p| p.observed_hosts.as_slice()).unwrap_or(&[]);
        self.broker.reset(hosts);
        self.stage(LoginStage::Started);
    }

    async fn session_probe(&self, launch_url: &str) -> Result<Option<String>> {
        self.begin_attempt(None).await;
        let walk = self.walker().follow_url(launch_url).await?;
        let terminal = walk.terminal_url();
        if let Some(encoded) = token::find_token_param(terminal) {
            self.logger.debug("existing session produced a token redirect");
            return Ok(token::service_token(encoded));
        }
        // A chain cut off at the hop cap may still hold the token in its
        // last unfollowed Location
        if let Some(location) = &walk.response.location {
            if let Some(encoded) = token::find_token_param(location) {
                return Ok(token::service_token(encoded));
            }
        }
        Ok(None)
    }

    async fn full_login(
        &self,
        launch_url: &str,
        username: &str,
        password: &str,
        provider: &ProviderConfig,
    ) -> Result<String> {
        self.begin_attempt(Some(provider)).await;

        // The launch request may bounce through the IdP and back; let the
        // transport follow ordinary redirects and inspect where it landed.
        let request = HttpRequest::get(launch_url)
            .following_redirects()
            .with_cookies(self.cookie_header(launch_url).await);
        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(error) if error.is_network() => {
                // A follow-mode client chokes on the custom-scheme redirect
                // an existing session triggers; walk manually instead
                let walk = self.walker().follow_url(launch_url).await?;
                if let Some(encoded) = token::find_token_param(walk.terminal_url()) {
                    return token::service_token(encoded).ok_or(SsoError::MalformedToken);
                }
                walk.response
            }
            Err(error) => return Err(error),
        };
        self.store_cookies(launch_url, &response).await;
        self.stage(LoginStage::Launched);

        // Already authenticated: the site handed the token straight back
        if let Some(encoded) = token::find_token_param(&response.url) {
            return token::service_token(encoded).ok_or(SsoError::MalformedToken);
        }

        let auth_state = match scrape::extract_hidden_field(&response.body, &provider.fields.auth_state)
        {
            Some(value) => value,
            None => {
                // Some deployments render the token into the page instead of
                // a login form when a session exists
                if let Some(encoded) = token::find_token_param(&response.body) {
                    return token::service_token(encoded).ok_or(SsoError::MalformedToken);
                }
                return Err(SsoError::MissingAuthState);
            }
        };
        self.stage(LoginStage::AuthStateFound);

        self.submit_credentials(username, password, &auth_state, provider)
            .await
    }

    async fn direct_login(
        &self,
        launch_url: &str,
        username: &str,
        password: &str,
        auth_state: &str,
        provider: &ProviderConfig,
    ) -> Result<String> {
        if auth_state.is_empty() {
            return Err(SsoError::MissingAuthState);
        }
        self.begin_attempt(Some(provider)).await;
        self.stage(LoginStage::AuthStateFound);

        match self
            .submit_credentials(username, password, auth_state, provider)
            .await
        {
            Ok(token) => Ok(token),
            Err(SsoError::TokenCaptureTimeout) => {
                // The credential POST established an IdP session even though
                // no redirect surfaced; the launch URL now resolves directly
                self.logger
                    .debug("capture window closed; retrying via launch URL");
                let walk = self.walker().follow_url(launch_url).await?;
                token::find_token_param(walk.terminal_url())
                    .and_then(token::service_token)
                    .ok_or(SsoError::TokenCaptureTimeout)
            }
            Err(error) => Err(error),
        }
    }

    /// Credential POST through token capture, shared by the full and direct
    /// flows.
    async fn submit_credentials(
        &self,
        username: &str,
        password: &str,
        auth_state: &str,
        provider: &ProviderConfig,
    ) -> Result<String> {
        let endpoint = &provider.login_endpoint;
        let fields = &provider.fields;
        let form = vec![
            (fields.username.clone(), username.to_string()),
            (fields.password.clone(), password.to_string()),
            // SimpleSAMLphp keys on the submit button; its templates label
            // it "Sign in"
            (fields.submit.clone(), "Sign in".to_string()),
            (fields.auth_state.clone(), auth_state.to_string()),
        ];
        let request = HttpRequest::post(endpoint, form)
            .with_cookies(self.cookie_header(endpoint).await);
        let response = self.transport.send(request).await?;
        self.store_cookies(endpoint, &response).await;
        self.stage(LoginStage::CredentialsSubmitted);

        if provider.looks_like_credential_failure(&response.body) {
            return Err(SsoError::InvalidCredentials);
        }

        let form = scrape::extract_form(&response.body);
        if !form.is_saml_assertion() {
            // A redirect instead of a consent page usually means the IdP
            // skipped straight to the application; chase it for the token
            if let Some(location) = &response.location {
                let next = resolve_location(endpoint, location).ok_or_else(|| {
                    SsoError::Network(format!("unresolvable redirect target: {location}"))
                })?;
                let walk = self.walker().follow_url(&next).await?;
                if let Some(token) =
                    token::find_token_param(walk.terminal_url()).and_then(token::service_token)
                {
                    return Ok(token);
                }
            }
            return Err(SsoError::MissingSamlResponse);
        }
        self.stage(LoginStage::SamlResponseFound);

        let action = form.action.clone().unwrap_or_default();
        self.capture_token(&action, form.inputs).await
    }

    /// Race the SAML-assertion relay against the out-of-band capture broker.
    /// The first token-bearing URL from either side wins; both sides coming
    /// up empty is a capture timeout.
    async fn capture_token(
        &self,
        action: &str,
        inputs: HashMap<String, String>,
    ) -> Result<String> {
        self.stage(LoginStage::TokenCapturing);

        let wait = self.broker.wait_for_capture(self.options.capture_timeout);
        let relay = self.relay_assertion(action, inputs);
        tokio::pin!(wait);
        tokio::pin!(relay);

        let mut relay_done = false;
        let mut wait_done = false;
        let mut token_url: Option<String> = None;

        while token_url.is_none() && !(relay_done && wait_done) {
            tokio::select! {
                result = &mut relay, if !relay_done => {
                    relay_done = true;
                    match result {
                        Ok(Some(url)) if token::find_token_param(&url).is_some() => {
                            token_url = Some(url);
                        }
                        Ok(_) => {}
                        Err(error) => {
                            // The observer may still deliver; keep waiting
                            self.logger.debug(&format!("assertion relay failed: {error}"));
                        }
                    }
                }
                captured = &mut wait, if !wait_done => {
                    wait_done = true;
                    if let Some(url) = captured {
                        if token::find_token_param(&url).is_some() {
                            token_url = Some(url);
                        }
                    }
                }
            }
        }

        let url = token_url.ok_or(SsoError::TokenCaptureTimeout)?;
        token::find_token_param(&url)
            .and_then(token::service_token)
            .ok_or(SsoError::MalformedToken)
    }

    /// POST the SAML assertion to its action URL and chase the response for
    /// a token-bearing URL. `Ok(None)` means the relay finished without
    /// seeing one.
    async fn relay_assertion(
        &self,
        action: &str,
        inputs: HashMap<String, String>,
    ) -> Result<Option<String>> {
        let form: Vec<(String, String)> = inputs.into_iter().collect();
        let request = HttpRequest::post(action, form)
            .with_cookies(self.cookie_header(action).await);
        let response = self.transport.send(request).await?;
        self.store_cookies(action, &response).await;

        let next = match &response.location {
            Some(location) if location.starts_with(&self.scheme_prefix) => {
                return Ok(Some(location.clone()));
            }
            Some(location) => resolve_location(action, location).ok_or_else(|| {
                SsoError::Network(format!("unresolvable redirect target: {location}"))
            })?,
            // Some IdPs answer with a meta refresh instead of a Location
            None => match scrape::extract_meta_refresh_url(&response.body) {
                Some(url) => url,
                None => return Ok(None),
            },
        };

        let walk = self.walker().follow_url(&next).await?;
        Ok(walk.final_url)
    }

    async fn password_token(
        &self,
        token_url: &str,
        username: &str,
        password: &str,
    ) -> Result<String> {
        self.stage(LoginStage::Started);
        let form = vec![
            ("username".to_string(), username.to_string()),
            ("password".to_string(), password.to_string()),
            ("service".to_string(), MOBILE_SERVICE.to_string()),
        ];
        let response = self
            .transport
            .send(HttpRequest::post(token_url, form))
            .await?;

        let data: serde_json::Value = serde_json::from_str(&response.body)
            .map_err(|e| SsoError::Network(format!("unexpected token response: {e}")))?;
        if data.get("error").and_then(|v| v.as_str()).is_some() {
            return Err(SsoError::InvalidCredentials);
        }
        data.get("token")
            .and_then(|v| v.as_str())
            .map(|t| t.to_string())
            .ok_or(SsoError::MalformedToken)
    }

    async fn cookie_header(&self, url: &str) -> Option<String> {
        let host = get_host(url)?;
        let jar = self.jar.lock().await;
        cookie_jar::combined_cookie_header(&jar, self.ambient.as_ref(), &host).await
    }

    async fn store_cookies(&self, url: &str, response: &HttpResponse) {
        let Some(host) = get_host(url) else { return };
        let mut jar = self.jar.lock().await;
        for header in &response.set_cookie {
            jar.merge(&host, header);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = FetcherOptions::default();
        assert_eq!(options.url_scheme, "moodlemobile");
        assert_eq!(options.max_redirect_hops, 10);
        assert_eq!(options.capture_timeout, Duration::from_secs(5));
        assert_eq!(options.attempt_timeout, Duration::from_secs(20));
    }
}
