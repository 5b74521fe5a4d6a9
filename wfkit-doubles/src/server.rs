//! The HTTP server shared by every double.
//!
//! A double listens on all interfaces so that job containers can reach it
//! through the Docker bridge. Each one runs on its own thread with a
//! current-thread runtime, which keeps the doubles usable from plain
//! synchronous tests. Every request is recorded before it is dispatched.

use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::DoubleError;
use crate::bridge::docker_bridge_gateway;

/// Captured `{param}` and `*` values of a matched route.
pub type PathParams = BTreeMap<String, String>;

type Handler = Arc<dyn Fn(&RecordedRequest, &PathParams) -> MockResponse + Send + Sync>;

/// One request as the double received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Header names are lower-case.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// A canned response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockResponse {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        // A value that fails to serialise is a bug in the test, surfaced as a 500.
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body,
            },
            Err(err) => Self::text(500, format!("mock response is not valid JSON: {err}")),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: body.into().into_bytes(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

impl IntoResponse for MockResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, self.body).into_response();
        for (name, value) in self.headers {
            match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().insert(name, value);
                }
                _ => tracing::warn!("dropping invalid mock response header"),
            }
        }
        response
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Rest,
}

/// `"METHOD /path/{param}/*"`. The method may be `*` to match any method.
/// `{name}` captures one segment; a trailing `*` captures the remainder
/// (possibly empty) under the key `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    method: Option<String>,
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Result<Self, DoubleError> {
        let invalid = |reason: &str| DoubleError::Pattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let (method, path) = pattern
            .trim()
            .split_once(' ')
            .ok_or_else(|| invalid("expected `METHOD /path`"))?;
        let path = path.trim();
        if !path.starts_with('/') {
            return Err(invalid("path must start with `/`"));
        }

        let raw: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (i, segment) in raw.iter().enumerate() {
            let parsed = if *segment == "*" {
                if i + 1 != raw.len() {
                    return Err(invalid("`*` is only allowed as the last segment"));
                }
                Segment::Rest
            } else if let Some(name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                if name.is_empty() {
                    return Err(invalid("empty parameter name"));
                }
                Segment::Param(name.to_string())
            } else {
                Segment::Literal((*segment).to_string())
            };
            segments.push(parsed);
        }

        let method = match method.trim() {
            "*" => None,
            m => Some(m.to_ascii_uppercase()),
        };
        Ok(Self { method, segments })
    }

    /// Captured parameters if `method` and `path` match.
    pub fn matches(&self, method: &str, path: &str) -> Option<PathParams> {
        if let Some(expected) = &self.method {
            if !expected.eq_ignore_ascii_case(method) {
                return None;
            }
        }

        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = PathParams::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Rest => {
                    params.insert("*".to_string(), parts[i.min(parts.len())..].join("/"));
                    return Some(params);
                }
                Segment::Literal(literal) => {
                    if parts.get(i) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), (*parts.get(i)?).to_string());
                }
            }
        }
        (parts.len() == self.segments.len()).then_some(params)
    }
}

/// Request log and routing table of one double.
pub struct DoubleState {
    name: String,
    requests: Mutex<Vec<RecordedRequest>>,
    routes: Mutex<Vec<(RoutePattern, Handler)>>,
    fallback: MockResponse,
}

impl DoubleState {
    pub fn new(name: impl Into<String>, fallback: MockResponse) -> Self {
        Self {
            name: name.into(),
            requests: Mutex::new(Vec::new()),
            routes: Mutex::new(Vec::new()),
            fallback,
        }
    }

    pub fn handle<F>(&self, pattern: &str, handler: F) -> Result<(), DoubleError>
    where
        F: Fn(&RecordedRequest, &PathParams) -> MockResponse + Send + Sync + 'static,
    {
        let pattern = RoutePattern::parse(pattern)?;
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((pattern, Arc::new(handler)));
        Ok(())
    }

    /// Snapshot of every request so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear_requests(&self) {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn respond(&self, request: RecordedRequest) -> MockResponse {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        // Clone the handler out so it runs without the routes lock held.
        let matched = {
            let routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
            routes.iter().find_map(|(pattern, handler)| {
                pattern
                    .matches(&request.method, &request.path)
                    .map(|params| (Arc::clone(handler), params))
            })
        };

        match matched {
            Some((handler, params)) => handler(&request, &params),
            None => {
                tracing::debug!(
                    double = %self.name,
                    method = %request.method,
                    path = %request.path,
                    "no route matched; using fallback"
                );
                self.fallback.clone()
            }
        }
    }
}

/// Router that records and dispatches every request against `state`.
pub fn router(state: Arc<DoubleState>) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

async fn dispatch(
    State(state): State<Arc<DoubleState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = RecordedRequest {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
        body: body.to_vec(),
    };
    tracing::debug!(double = %state.name, method = %request.method, path = %request.path, "request");
    state.respond(request).into_response()
}

/// A running double. Dropping it stops the server and joins its thread.
pub struct HttpDouble {
    state: Arc<DoubleState>,
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl HttpDouble {
    /// Start a double on an OS-assigned port.
    pub fn start(name: &str, fallback: MockResponse) -> Result<Self, DoubleError> {
        let state = Arc::new(DoubleState::new(name, fallback));

        let listener = TcpListener::bind("0.0.0.0:0").map_err(DoubleError::Bind)?;
        listener.set_nonblocking(true).map_err(DoubleError::Bind)?;
        let addr = listener.local_addr().map_err(DoubleError::Bind)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(DoubleError::Runtime)?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(Arc::clone(&state));
        let thread_name = format!("wfkit-double-{name}");
        let label = name.to_string();

        let thread = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(err) => {
                            tracing::error!(double = %label, error = %err, "failed to register listener");
                            return;
                        }
                    };
                    let served = axum::serve(listener, app)
                        .with_graceful_shutdown(async {
                            let _ = shutdown_rx.await;
                        })
                        .await;
                    if let Err(err) = served {
                        tracing::error!(double = %label, error = %err, "server stopped");
                    }
                });
            })
            .map_err(DoubleError::Runtime)?;

        tracing::info!(double = name, port = addr.port(), "HTTP double listening");
        Ok(Self {
            state,
            addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Route requests matching `pattern` to `handler`. Earlier routes win.
    pub fn handle<F>(&self, pattern: &str, handler: F) -> Result<(), DoubleError>
    where
        F: Fn(&RecordedRequest, &PathParams) -> MockResponse + Send + Sync + 'static,
    {
        self.state.handle(pattern, handler)
    }

    /// Answer every request matching `pattern` with `response`.
    pub fn respond(&self, pattern: &str, response: MockResponse) -> Result<(), DoubleError> {
        self.state.handle(pattern, move |_, _| response.clone())
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests()
    }

    /// Recorded requests matching `pattern`.
    pub fn requests_matching(&self, pattern: &str) -> Result<Vec<RecordedRequest>, DoubleError> {
        let pattern = RoutePattern::parse(pattern)?;
        Ok(self
            .state
            .requests()
            .into_iter()
            .filter(|request| pattern.matches(&request.method, &request.path).is_some())
            .collect())
    }

    pub fn clear_requests(&self) {
        self.state.clear_requests();
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Base URL for the test process.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port())
    }

    /// Base URL for steps running inside job containers.
    pub fn container_url(&self) -> String {
        format!("http://{}:{}", docker_bridge_gateway(), self.port())
    }
}

impl std::fmt::Debug for HttpDouble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDouble")
            .field("name", &self.state.name)
            .field("addr", &self.addr)
            .finish()
    }
}

impl Drop for HttpDouble {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!(double = %self.state.name, "server thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    #[test]
    fn test_route_pattern_params_and_rest() {
        let pattern = RoutePattern::parse("GET /api/plugins/{slug}/versions/*").unwrap();
        let params = pattern
            .matches("GET", "/api/plugins/my-app/versions/1.0.0/download")
            .unwrap();
        assert_eq!(params["slug"], "my-app");
        assert_eq!(params["*"], "1.0.0/download");

        let params = pattern.matches("get", "/api/plugins/my-app/versions").unwrap();
        assert_eq!(params["*"], "");

        assert!(pattern.matches("POST", "/api/plugins/my-app/versions/1").is_none());
        assert!(pattern.matches("GET", "/api/plugins/my-app").is_none());
    }

    #[test]
    fn test_route_pattern_exact_length() {
        let pattern = RoutePattern::parse("* /api/plugins/{slug}").unwrap();
        assert!(pattern.matches("DELETE", "/api/plugins/x").is_some());
        assert!(pattern.matches("GET", "/api/plugins/x/extra").is_none());
        assert!(pattern.matches("GET", "/api/plugins/").is_none());
    }

    #[test]
    fn test_route_pattern_rejects_bad_input() {
        for bad in ["/no/method", "GET no-slash", "GET /a/*/b", "GET /a/{}"] {
            assert!(
                matches!(RoutePattern::parse(bad), Err(DoubleError::Pattern { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_mock_response_constructors() {
        let response = MockResponse::json(201, &json!({"id": 1}));
        assert_eq!(response.status, 201);
        assert_eq!(response.body, br#"{"id":1}"#);
        assert_eq!(MockResponse::status(204).body, Vec::<u8>::new());
        assert_eq!(MockResponse::text(400, "bad").body, b"bad");

        let response = MockResponse::status(302)
            .with_header("location", "/moved")
            .with_header("bad\nname", "x")
            .into_response();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()["location"], "/moved");
        assert_eq!(response.headers().len(), 1);
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    #[tokio::test]
    async fn test_router_records_and_dispatches() {
        let state = Arc::new(DoubleState::new("test", MockResponse::status(404)));
        state
            .handle("POST /hooks/{name}", |request, params| {
                MockResponse::json(200, &json!({
                    "hook": params["name"],
                    "echo": request.body_text(),
                }))
            })
            .unwrap();

        let (status, headers, body) = send(
            router(Arc::clone(&state)),
            Request::builder()
                .method("POST")
                .uri("/hooks/deploy?dry=1")
                .header("X-Token", "abc")
                .body(Body::from("payload"))
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["content-type"], "application/json");
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["hook"], "deploy");
        assert_eq!(json["echo"], "payload");

        let recorded = state.requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].method, "POST");
        assert_eq!(recorded[0].path, "/hooks/deploy");
        assert_eq!(recorded[0].query.as_deref(), Some("dry=1"));
        assert_eq!(recorded[0].header("x-token"), Some("abc"));
    }

    #[tokio::test]
    async fn test_router_fallback_and_first_match_wins() {
        let state = Arc::new(DoubleState::new("test", MockResponse::text(418, "teapot")));
        state
            .handle("GET /a/*", |_, _| MockResponse::text(200, "first"))
            .unwrap();
        state
            .handle("GET /a/b", |_, _| MockResponse::text(200, "second"))
            .unwrap();

        let get = |uri: &str| Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (_, _, body) = send(router(Arc::clone(&state)), get("/a/b")).await;
        assert_eq!(body, b"first");

        let (status, _, body) = send(router(Arc::clone(&state)), get("/elsewhere")).await;
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
        assert_eq!(body, b"teapot");
        assert_eq!(state.requests().len(), 2);

        state.clear_requests();
        assert!(state.requests().is_empty());
    }
}
