// HTTP transport seam.
//
// The login flow never talks to reqwest directly; it issues `HttpRequest`
// values through the `HttpTransport` trait and reads plain `HttpResponse`
// values back. That keeps redirect handling and cookie management in the
// flow's hands and lets tests script every hop.

use async_trait::async_trait;

use moodle_sso_core::{Result, SsoError};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One outgoing request. `form` is sent URL-encoded when present.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub form: Option<Vec<(String, String)>>,
    /// When false the transport must surface 3xx responses untouched so the
    /// caller can inspect `Location` itself.
    pub follow_redirects: bool,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            form: None,
            follow_redirects: false,
        }
    }

    pub fn post(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            form: Some(form),
            follow_redirects: false,
        }
    }

    pub fn following_redirects(mut self) -> Self {
        self.follow_redirects = true;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_cookies(self, cookies: Option<String>) -> Self {
        match cookies {
            Some(value) if !value.is_empty() => self.with_header("Cookie", value),
            _ => self,
        }
    }
}

/// A completed response, with the headers the flow cares about lifted out.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Final URL after any transport-level redirects.
    pub url: String,
    pub location: Option<String>,
    pub set_cookie: Vec<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.location.is_some()
    }
}

/// Abstraction over the HTTP client.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Production transport backed by reqwest.
///
/// reqwest fixes the redirect policy per client, so two clients are kept: one
/// that never follows redirects (the flow's default) and one that follows
/// them for launch-style requests.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    manual: reqwest::Client,
    auto: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let build = |policy: reqwest::redirect::Policy| {
            reqwest::Client::builder()
                .redirect(policy)
                .user_agent(USER_AGENT)
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .map_err(|e| SsoError::Network(e.to_string()))
        };
        Ok(Self {
            manual: build(reqwest::redirect::Policy::none())?,
            auto: build(reqwest::redirect::Policy::default())?,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let client = if request.follow_redirects {
            &self.auto
        } else {
            &self.manual
        };

        let mut builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url),
        };
        builder = builder
            .header(reqwest::header::ACCEPT, ACCEPT)
            .header(reqwest::header::ACCEPT_LANGUAGE, ACCEPT_LANGUAGE);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(form) = &request.form {
            builder = builder.form(form);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SsoError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let set_cookie = response
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| v.to_string())
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| SsoError::Network(e.to_string()))?;

        Ok(HttpResponse {
            status,
            url,
            location,
            set_cookie,
            body,
        })
    }
}
