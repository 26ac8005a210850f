// Manual redirect walking.
//
// The walker follows Location chains one hop at a time so it can merge
// cookies per hop, resolve relative targets, and stop dead when a hop points
// at the custom token scheme. The custom-scheme URL is never fetched; the
// token lives in the URL itself and the scheme has no HTTP endpoint behind
// it.

use tokio::sync::Mutex;

use moodle_sso_core::urls::{get_host, resolve_location};
use moodle_sso_core::{Result, SsoError};

use crate::cookie_jar::{combined_cookie_header, AmbientCookieStore, CookieJar};
use crate::http::{HttpRequest, HttpResponse, HttpTransport};

pub const DEFAULT_MAX_HOPS: usize = 10;

/// Result of one walk: the last response fetched over HTTP, and the
/// custom-scheme URL the chain terminated at, if it did.
#[derive(Debug)]
pub struct RedirectWalk {
    pub response: HttpResponse,
    pub final_url: Option<String>,
}

impl RedirectWalk {
    /// The URL to inspect for a `token=` parameter: the custom-scheme
    /// terminator if the chain hit one, otherwise the last fetched URL.
    pub fn terminal_url(&self) -> &str {
        self.final_url.as_deref().unwrap_or(&self.response.url)
    }
}

/// Walks a redirect chain by hand, hop-capped, jar-aware.
pub struct RedirectWalker<'a> {
    transport: &'a dyn HttpTransport,
    jar: &'a Mutex<CookieJar>,
    ambient: &'a dyn AmbientCookieStore,
    scheme_prefix: &'a str,
    max_hops: usize,
}

impl<'a> RedirectWalker<'a> {
    pub fn new(
        transport: &'a dyn HttpTransport,
        jar: &'a Mutex<CookieJar>,
        ambient: &'a dyn AmbientCookieStore,
        scheme_prefix: &'a str,
        max_hops: usize,
    ) -> Self {
        Self {
            transport,
            jar,
            ambient,
            scheme_prefix,
            max_hops,
        }
    }

    /// GET a URL and follow its redirect chain.
    pub async fn follow_url(&self, url: &str) -> Result<RedirectWalk> {
        self.follow(HttpRequest::get(url)).await
    }

    /// Follow a redirect chain starting from `request`. The request's method,
    /// form, and headers apply to the first hop only; subsequent hops are
    /// plain GETs, so a POSTed form is never replayed down the chain.
    pub async fn follow(&self, request: HttpRequest) -> Result<RedirectWalk> {
        let mut current = request;
        current.follow_redirects = false;

        for hop in 0.. {
            let url = current.url.clone();
            let mut outgoing = current.clone();
            if let Some(host) = get_host(&url) {
                let jar = self.jar.lock().await;
                outgoing = outgoing
                    .with_cookies(combined_cookie_header(&jar, self.ambient, &host).await);
            }

            let response = self.transport.send(outgoing).await?;

            if let Some(host) = get_host(&url) {
                let mut jar = self.jar.lock().await;
                for header in &response.set_cookie {
                    jar.merge(&host, header);
                }
            }

            let Some(location) = response.location.clone() else {
                return Ok(RedirectWalk {
                    response,
                    final_url: None,
                });
            };

            if location.starts_with(self.scheme_prefix) {
                return Ok(RedirectWalk {
                    response,
                    final_url: Some(location),
                });
            }

            if hop + 1 >= self.max_hops {
                return Ok(RedirectWalk {
                    response,
                    final_url: None,
                });
            }

            let next = resolve_location(&url, &location).ok_or_else(|| {
                SsoError::Network(format!("unresolvable redirect target: {location}"))
            })?;
            current = HttpRequest::get(next);
        }
        unreachable!()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookie_jar::NoAmbientCookies;
    use crate::http::Method;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Transport that pops pre-scripted responses and records requests.
    struct Script {
        responses: StdMutex<Vec<HttpResponse>>,
        requests: StdMutex<Vec<HttpRequest>>,
    }

    impl Script {
        fn new(mut responses: Vec<HttpResponse>) -> Self {
            responses.reverse();
            Self {
                responses: StdMutex::new(responses),
                requests: StdMutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for Script {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| SsoError::Network("script exhausted".into()))
        }
    }

    fn redirect(url: &str, location: &str, set_cookie: &[&str]) -> HttpResponse {
        HttpResponse {
            status: 302,
            url: url.into(),
            location: Some(location.into()),
            set_cookie: set_cookie.iter().map(|s| s.to_string()).collect(),
            body: String::new(),
        }
    }

    fn page(url: &str, body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            url: url.into(),
            location: None,
            set_cookie: Vec::new(),
            body: body.into(),
        }
    }

    #[tokio::test]
    async fn test_walk_to_plain_page() {
        let script = Script::new(vec![
            redirect("https://a.example/start", "/step2", &["sid=1; Path=/"]),
            page("https://a.example/step2", "done"),
        ]);
        let jar = Mutex::new(CookieJar::new());
        let walker = RedirectWalker::new(&script, &jar, &NoAmbientCookies, "moodlemobile://", 10);

        let walk = walker.follow_url("https://a.example/start").await.unwrap();
        assert_eq!(walk.final_url, None);
        assert_eq!(walk.response.body, "done");
        assert_eq!(walk.terminal_url(), "https://a.example/step2");

        // Cookie set on hop 1 is replayed on hop 2
        let requests = script.requests();
        assert_eq!(requests[1].url, "https://a.example/step2");
        assert!(requests[1]
            .headers
            .iter()
            .any(|(name, value)| name == "Cookie" && value == "sid=1"));
    }

    #[tokio::test]
    async fn test_custom_scheme_short_circuit() {
        let capture = "moodlemobile://token=QUJDOjo6WFlaOjo6c2ln";
        let script = Script::new(vec![redirect("https://a.example/launch", capture, &[])]);
        let jar = Mutex::new(CookieJar::new());
        let walker = RedirectWalker::new(&script, &jar, &NoAmbientCookies, "moodlemobile://", 10);

        let walk = walker.follow_url("https://a.example/launch").await.unwrap();
        assert_eq!(walk.final_url.as_deref(), Some(capture));
        assert_eq!(walk.terminal_url(), capture);
        // The custom-scheme URL itself is never fetched
        assert_eq!(script.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_cookies_accumulate_until_short_circuit() {
        let capture = "moodlemobile://token=QUJDOjo6WFlaOjo6c2ln";
        let script = Script::new(vec![
            redirect("https://a.example/hop1", "/hop2", &["sid=1; Path=/"]),
            redirect("https://a.example/hop2", "/hop3", &["lang=en; Secure"]),
            redirect("https://a.example/hop3", "/hop4", &["theme=dark"]),
            redirect("https://a.example/hop4", capture, &[]),
        ]);
        let jar = Mutex::new(CookieJar::new());
        let walker = RedirectWalker::new(&script, &jar, &NoAmbientCookies, "moodlemobile://", 10);

        let walk = walker.follow_url("https://a.example/hop1").await.unwrap();
        assert_eq!(walk.final_url.as_deref(), Some(capture));

        // Every ordinary hop was fetched, the custom-scheme target was not,
        // and the last hop carried everything set along the way
        let requests = script.requests();
        assert_eq!(requests.len(), 4);
        assert!(requests[3]
            .headers
            .iter()
            .any(|(name, value)| name == "Cookie" && value == "sid=1; lang=en; theme=dark"));
    }

    #[tokio::test]
    async fn test_hop_cap() {
        let responses: Vec<HttpResponse> = (0..10)
            .map(|i| {
                redirect(
                    &format!("https://a.example/hop{i}"),
                    &format!("/hop{}", i + 1),
                    &[],
                )
            })
            .collect();
        let script = Script::new(responses);
        let jar = Mutex::new(CookieJar::new());
        let walker = RedirectWalker::new(&script, &jar, &NoAmbientCookies, "moodlemobile://", 10);

        let walk = walker.follow_url("https://a.example/hop0").await.unwrap();
        assert_eq!(walk.final_url, None);
        assert_eq!(script.requests().len(), 10);
        // The walk surfaces the last redirect response unconsumed
        assert!(walk.response.is_redirect());
    }

    #[tokio::test]
    async fn test_post_not_replayed_across_hops() {
        let script = Script::new(vec![
            redirect("https://idp.example/acs", "https://app.example/launch", &[]),
            page("https://app.example/launch", "landed"),
        ]);
        let jar = Mutex::new(CookieJar::new());
        let walker = RedirectWalker::new(&script, &jar, &NoAmbientCookies, "moodlemobile://", 10);

        let first = HttpRequest::post(
            "https://idp.example/acs",
            vec![("SAMLResponse".into(), "xml".into())],
        );
        walker.follow(first).await.unwrap();

        let requests = script.requests();
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(requests[1].method, Method::Get);
        assert!(requests[1].form.is_none());
    }

    #[tokio::test]
    async fn test_relative_location_resolved() {
        let script = Script::new(vec![
            redirect("https://a.example/dir/start", "next.php", &[]),
            page("https://a.example/dir/next.php", "ok"),
        ]);
        let jar = Mutex::new(CookieJar::new());
        let walker = RedirectWalker::new(&script, &jar, &NoAmbientCookies, "moodlemobile://", 10);

        walker.follow_url("https://a.example/dir/start").await.unwrap();
        assert_eq!(script.requests()[1].url, "https://a.example/dir/next.php");
    }
}
