use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Html;
use axum::routing::get;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_HOME: &str = "/";
pub const PATH_DOGS: &str = "/api/dogs";
pub const PATH_BREEDS: &str = "/api/dogs/breeds";
pub const PATH_SLOW: &str = "/slow";
pub const PATH_FAIL: &str = "/fail";
pub const PATH_ECHO: &str = "/echo";

/// Response header carrying the request's `User-Agent` on [`PATH_ECHO`].
pub const ECHO_USER_AGENT: &str = "x-echo-user-agent";

const SLOW_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    dogs_requests: Arc<AtomicU64>,
    breeds_requests: Arc<AtomicU64>,
    failed_responses: Arc<AtomicU64>,
    user_agent_requests: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn dogs_requests(&self) -> u64 {
        self.dogs_requests.load(Ordering::Relaxed)
    }

    pub fn breeds_requests(&self) -> u64 {
        self.breeds_requests.load(Ordering::Relaxed)
    }

    pub fn failed_responses(&self) -> u64 {
        self.failed_responses.load(Ordering::Relaxed)
    }

    /// Requests to [`PATH_ECHO`] that carried a `User-Agent` header.
    pub fn user_agent_requests(&self) -> u64 {
        self.user_agent_requests.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct TestServerUrls {
    pub base_url: String,
    pub home: String,
    pub dogs: String,
    pub breeds: String,
    pub slow: String,
    pub fail: String,
    pub echo: String,
}

impl TestServerUrls {
    pub fn new(base_url: String) -> Self {
        Self {
            home: format!("{base_url}{PATH_HOME}"),
            dogs: format!("{base_url}{PATH_DOGS}"),
            breeds: format!("{base_url}{PATH_BREEDS}"),
            slow: format!("{base_url}{PATH_SLOW}"),
            fail: format!("{base_url}{PATH_FAIL}"),
            echo: format!("{base_url}{PATH_ECHO}"),
            base_url,
        }
    }
}

#[derive(Debug, Serialize)]
struct Dog {
    id: u32,
    name: &'static str,
    breed: &'static str,
}

const DOGS: &[Dog] = &[
    Dog {
        id: 1,
        name: "Biscuit",
        breed: "beagle",
    },
    Dog {
        id: 2,
        name: "Pepper",
        breed: "border collie",
    },
    Dog {
        id: 3,
        name: "Mochi",
        breed: "shiba inu",
    },
];

const BREEDS: &[&str] = &["beagle", "border collie", "dachshund", "shiba inu"];

async fn handle_home(State(stats): State<TestServerStats>) -> Html<&'static str> {
    TestServerStats::inc(&stats.requests_total);
    Html("<!doctype html><title>dogs</title><h1>Dogs</h1>")
}

async fn handle_dogs(State(stats): State<TestServerStats>) -> Json<&'static [Dog]> {
    TestServerStats::inc(&stats.requests_total);
    TestServerStats::inc(&stats.dogs_requests);
    Json(DOGS)
}

async fn handle_breeds(State(stats): State<TestServerStats>) -> Json<&'static [&'static str]> {
    TestServerStats::inc(&stats.requests_total);
    TestServerStats::inc(&stats.breeds_requests);
    Json(BREEDS)
}

async fn handle_slow(State(stats): State<TestServerStats>) -> &'static str {
    TestServerStats::inc(&stats.requests_total);
    sleep(SLOW_DELAY).await;
    "slow"
}

async fn handle_fail(State(stats): State<TestServerStats>) -> (StatusCode, &'static str) {
    TestServerStats::inc(&stats.requests_total);
    TestServerStats::inc(&stats.failed_responses);
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

async fn handle_echo(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
) -> ([(&'static str, String); 1], String) {
    TestServerStats::inc(&stats.requests_total);
    let agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !agent.is_empty() {
        TestServerStats::inc(&stats.user_agent_requests);
    }
    ([(ECHO_USER_AGENT, agent.clone())], agent)
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_HOME, get(handle_home))
        .route(PATH_DOGS, get(handle_dogs))
        .route(PATH_BREEDS, get(handle_breeds))
        .route(PATH_SLOW, get(handle_slow))
        .route(PATH_FAIL, get(handle_fail))
        .route(PATH_ECHO, get(handle_echo))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    urls: TestServerUrls,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        let base_url = format!("http://{addr}");
        let urls = TestServerUrls::new(base_url.clone());

        Ok(Self {
            addr,
            base_url,
            urls,
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn urls(&self) -> &TestServerUrls {
        &self.urls
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
