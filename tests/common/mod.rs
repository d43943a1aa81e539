//! Shared test infrastructure for integration tests.
//!
//! Provides dispatcher builders, a throwaway server bound to an
//! OS-assigned port, and an HTTP client for talking to it.

#![allow(dead_code)]

use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use weighted_dispatch::{AppState, BackendTarget, WeightedDispatcher, serve};

pub type TestClient = Client<HttpConnector, Full<Bytes>>;

/// Initializes a tracing subscriber for test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

/// Builds a dispatcher from `(id, weight)` pairs, in order.
pub fn dispatcher(layout: &[(&str, u32)]) -> WeightedDispatcher {
    let targets = layout
        .iter()
        .map(|(id, weight)| BackendTarget::new(*id, *weight).expect("valid backend"))
        .collect::<Vec<BackendTarget>>();
    WeightedDispatcher::new(targets).expect("non-empty pool")
}

/// Selects `n` times and returns the chosen ids.
pub fn pick(dispatcher: &WeightedDispatcher, n: usize) -> Vec<String> {
    (0..n)
        .map(|_| dispatcher.select().expect("select").id().to_owned())
        .collect()
}

/// Counts how often `id` occurs in `ids`.
pub fn count(ids: &[String], id: &str) -> usize {
    ids.iter().filter(|x| *x == id).count()
}

pub fn test_state(layout: &[(&str, u32)]) -> AppState {
    AppState {
        dispatcher: dispatcher(layout),
        load_test_requests: 100,
    }
}

pub fn test_client() -> TestClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// Starts the dispatcher's HTTP front end on an ephemeral local port.
/// Returns the bound address and a handle to shut it down.
pub async fn start_server(state: AppState) -> (SocketAddr, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel::<()>();

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("failed to bind test server");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(serve(listener, state, async {
        let _ = rx.await;
    }));

    (addr, tx)
}

/// Sends a request and returns the status with the collected body.
pub async fn send(
    client: &TestClient,
    method: Method,
    addr: SocketAddr,
    path: &str,
    body: &str,
) -> (StatusCode, Bytes) {
    let req = Request::builder()
        .method(method)
        .uri(format!("http://{addr}{path}"))
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_owned())))
        .expect("test request must build");

    let resp: Response<_> = client.request(req).await.expect("request failed");
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .expect("failed to collect response body")
        .to_bytes();
    (status, bytes)
}
