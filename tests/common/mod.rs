#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use tokio::net::TcpListener;
use tokio::time::Instant;

// ============================================================================
// Test double for HTTP targets
// ============================================================================

/// How the fake target answers every request.
#[derive(Clone, Debug)]
pub struct Behavior {
    pub status: StatusCode,
    pub delay: Duration,
    pub body: String,
}

impl Behavior {
    pub fn ok() -> Self {
        Self {
            status: StatusCode::OK,
            delay: Duration::ZERO,
            body: "ok".to_string(),
        }
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::ok()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::ok()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub at: Instant,
}

impl Recorded {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body is JSON")
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

/// Records every request and tracks how many are in flight at once.
#[derive(Clone, Debug)]
pub struct FakeTarget {
    pub base_url: String,
    behavior: Behavior,
    requests: Arc<Mutex<Vec<Recorded>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeTarget {
    /// Serve on an ephemeral local port. Any path is accepted.
    pub async fn spawn(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let target = Self {
            base_url: format!("http://{addr}"),
            behavior,
            requests: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        };

        let app = Router::new().fallback(handle).with_state(target.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        target
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn handle(
    State(target): State<FakeTarget>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let now = target.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    let _guard = InFlightGuard(target.in_flight.clone());
    target.max_in_flight.fetch_max(now, Ordering::SeqCst);

    target.requests.lock().unwrap().push(Recorded {
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body,
        at: Instant::now(),
    });

    if !target.behavior.delay.is_zero() {
        tokio::time::sleep(target.behavior.delay).await;
    }
    (target.behavior.status, target.behavior.body.clone())
}

/// A local URL nothing listens on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/hook")
}
