//! Request Gate & Forwarder (RGF) — the forwarding half: transparent HTTP
//! proxying to the primary service with hop-by-hop header filtering and
//! bounded retry on transient transport errors.
//!
//! Activation (the gate half) always precedes the first attempt and is not
//! re-entered on retry — readiness is assumed stable within the short retry
//! window.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tracing::{info, warn};

use crate::error::{ForwardError, ForwardResult};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Hop-by-hop headers per RFC 7230, stripped from the response we return to
/// the client.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub struct Forwarder {
    http: reqwest::Client,
}

/// A forwarded response, ready to be written back to the client.
pub struct ForwardedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Forwarder {
    pub fn new(forward_timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(forward_timeout).build()?;
        Ok(Self { http })
    }

    /// Forward one request to `target_url`, retrying up to [`MAX_ATTEMPTS`]
    /// times on connect/timeout errors only.
    pub async fn forward(
        &self,
        method: Method,
        target_url: &str,
        query: Option<&str>,
        headers: HeaderMap,
        body: Bytes,
    ) -> ForwardResult<ForwardedResponse> {
        let mut url = target_url.to_string();
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }

        let reqwest_headers = to_reqwest_headers(&headers);

        for attempt in 1..=MAX_ATTEMPTS {
            info!(url = %url, attempt, "forwarding request");

            let result = self
                .http
                .request(method.clone(), &url)
                .headers(reqwest_headers.clone())
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(resp) => return Ok(into_forwarded_response(resp).await?),
                Err(e) if is_transient(&e) => {
                    warn!(url = %url, attempt, error = %e, "transient forward error");
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(RETRY_BACKOFF).await;
                        continue;
                    }
                    return Err(ForwardError::Transport(e.to_string()));
                }
                Err(e) => {
                    return Err(ForwardError::Other(e.to_string()));
                }
            }
        }

        // Unreachable: the loop above always returns by the last attempt.
        Err(ForwardError::Transport("retries exhausted".to_string()))
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

async fn into_forwarded_response(resp: reqwest::Response) -> ForwardResult<ForwardedResponse> {
    let status = resp.status();
    let mut headers = HeaderMap::new();
    for (name, value) in resp.headers() {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str().to_ascii_lowercase().as_str()) {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }
    let body = resp.bytes().await.map_err(|e| ForwardError::Other(e.to_string()))?;

    Ok(ForwardedResponse { status, headers, body })
}

/// Copy request headers except `Host` and `Connection`,
/// translating between the axum/http and reqwest header types.
fn to_reqwest_headers(headers: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut out = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        let lower = name.as_str().to_ascii_lowercase();
        if lower == "host" || lower == "connection" {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.insert(name, value);
        }
    }
    out
}

/// Build the upstream URL for the primary service:
/// leading slashes on `path` are stripped.
pub fn upstream_url(base: &str, path: &str) -> String {
    format!("{base}/{}", path.trim_start_matches('/'))
}

/// Translate a `reqwest` header map back into an `axum`/`http` one for the
/// response path, used by `routes.rs`.
pub fn axum_headers_from(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.insert(name, value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    #[test]
    fn upstream_url_strips_leading_slashes() {
        assert_eq!(
            upstream_url("http://manager.default.svc.cluster.local:80", "/foo/bar"),
            "http://manager.default.svc.cluster.local:80/foo/bar"
        );
        assert_eq!(
            upstream_url("http://manager.default.svc.cluster.local:80", "foo/bar"),
            "http://manager.default.svc.cluster.local:80/foo/bar"
        );
    }

    #[tokio::test]
    async fn strips_hop_by_hop_response_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/foo"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("connection", "keep-alive")
                    .insert_header("x-custom", "value"),
            )
            .mount(&server)
            .await;

        let forwarder = Forwarder::new(Duration::from_secs(5)).unwrap();
        let target = format!("{}/foo", server.uri());
        let resp = forwarder
            .forward(Method::GET, &target, None, HeaderMap::new(), Bytes::new())
            .await
            .unwrap();

        assert_eq!(resp.status, StatusCode::OK);
        assert!(!resp.headers.contains_key("connection"));
        assert_eq!(resp.headers.get("x-custom"), Some(&HeaderValue::from_static("value")));
    }

    #[tokio::test]
    async fn round_trips_request_body_byte_identical() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"echo".to_vec()))
            .mount(&server)
            .await;

        let forwarder = Forwarder::new(Duration::from_secs(5)).unwrap();
        let target = format!("{}/bar", server.uri());
        let resp = forwarder
            .forward(Method::POST, &target, None, HeaderMap::new(), Bytes::from_static(b"{\"x\":1}"))
            .await
            .unwrap();

        assert_eq!(resp.body, Bytes::from_static(b"echo"));
    }

    #[tokio::test]
    async fn drops_host_and_connection_request_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/foo"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let forwarder = Forwarder::new(Duration::from_secs(5)).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("client-supplied-host"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));

        let target = format!("{}/foo", server.uri());
        let resp = forwarder.forward(Method::GET, &target, None, headers, Bytes::new()).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
    }

    /// Responds to the first request with a delay that outlasts the client
    /// timeout (a transient, retryable failure) and to every subsequent
    /// request with an immediate 200.
    struct FlakyThenOk {
        calls: AtomicUsize,
    }

    impl Respond for FlakyThenOk {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(200).set_delay(Duration::from_millis(500))
            } else {
                ResponseTemplate::new(200).set_body_bytes(b"recovered".to_vec())
            }
        }
    }

    #[tokio::test]
    async fn retries_once_on_timeout_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(FlakyThenOk { calls: AtomicUsize::new(0) })
            .expect(2)
            .mount(&server)
            .await;

        // Shorter than the mock's first-attempt delay, so attempt 1 times out.
        let forwarder = Forwarder::new(Duration::from_millis(100)).unwrap();
        let target = format!("{}/flaky", server.uri());
        let resp = forwarder
            .forward(Method::GET, &target, None, HeaderMap::new(), Bytes::new())
            .await
            .unwrap();

        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body, Bytes::from_static(b"recovered"));
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_of_timeouts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/always-slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let forwarder = Forwarder::new(Duration::from_millis(100)).unwrap();
        let target = format!("{}/always-slow", server.uri());
        let result = forwarder
            .forward(Method::GET, &target, None, HeaderMap::new(), Bytes::new())
            .await;

        assert!(matches!(result, Err(ForwardError::Transport(_))));
    }
}
