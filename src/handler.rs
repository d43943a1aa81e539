//! HTTP request handling: dispatch, metrics, and administrative routes.
//!
//! Routes:
//!
//! - `GET /metrics` returns the dispatcher snapshot as a JSON array.
//! - `PUT|POST /admin/weights` changes one backend's weight.
//! - `POST /admin/load-test[?requests=N]` runs a load test against the live
//!   pool.
//! - `GET` on any other path selects a backend, records the request as
//!   served, and reports which backend took it.
//!
//! Every inbound request is assigned a monotonically increasing request ID
//! and wrapped in a [`tracing::Span`] carrying structured fields.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, warn};

use crate::config::{DEFAULT_MAX_BODY_SIZE, MAX_LOAD_TEST_REQUESTS};
use crate::{DispatchError, Result, RuntimeConfig, WeightedDispatcher, load_test};

/// An alias to simplify the calls to `Box<dyn std::error::Error + Send + Sync>`.
type StdError = Box<dyn std::error::Error + Send + Sync>;

/// Global monotonic counter for assigning unique request IDs.
static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// State shared by every request handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The dispatcher all routes operate on.
    pub dispatcher: WeightedDispatcher,
    /// Load test size used when a request does not specify one.
    pub load_test_requests: u64,
}

impl AppState {
    /// Builds the dispatcher from the configured backends.
    pub fn from_runtime(config: &RuntimeConfig) -> Result<Self> {
        Ok(Self {
            dispatcher: WeightedDispatcher::new(config.backends.clone())?,
            load_test_requests: config.load_test_requests,
        })
    }
}

/// Body of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub backend_id: String,
    pub served_count: u64,
}

/// Body accepted by `/admin/weights`.
///
/// The weight is read as a signed integer so that negative values are
/// reported as invalid weights rather than as malformed JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightUpdate {
    pub backend_id: String,
    pub weight: i64,
}

/// Processes a single inbound request.
pub async fn handle_request<B>(req: Request<B>, state: AppState) -> Result<Response<Full<Bytes>>>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<StdError>,
{
    let request_id = REQUEST_ID.fetch_add(1, Ordering::Relaxed);
    let span = tracing::info_span!(
        "request",
        id = request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        let result = route(req, &state).await;
        if let Err(e) = &result {
            warn!(error = %e, status = e.status_code().as_u16(), "request failed");
        }
        result
    }
    .instrument(span)
    .await
}

async fn route<B>(req: Request<B>, state: &AppState) -> Result<Response<Full<Bytes>>>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<StdError>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    match path.as_str() {
        "/metrics" => {
            require_method(&method, &[Method::GET])?;
            metrics(state)
        }
        "/admin/weights" => {
            require_method(&method, &[Method::PUT, Method::POST])?;
            update_weight(req, state).await
        }
        "/admin/load-test" => {
            require_method(&method, &[Method::POST])?;
            let query = req.uri().query().map(str::to_owned);
            run_load_test(query.as_deref(), state).await
        }
        _ => {
            require_method(&method, &[Method::GET])?;
            dispatch(state)
        }
    }
}

fn require_method(method: &Method, allowed: &[Method]) -> Result<()> {
    if allowed.contains(method) {
        Ok(())
    } else {
        Err(DispatchError::MethodNotAllowed)
    }
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Result<Response<Full<Bytes>>> {
    let body = serde_json::to_vec(value)
        .map_err(|e| DispatchError::Internal(format!("failed to encode response: {e}")))?;

    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
        .body(Full::new(Bytes::from(body)))?)
}

fn dispatch(state: &AppState) -> Result<Response<Full<Bytes>>> {
    let target = state.dispatcher.select()?;
    let served_count = target.record_served();
    debug!(backend = target.id(), served_count, "dispatched request");

    json_response(
        StatusCode::OK,
        &DispatchResponse {
            backend_id: target.id().to_owned(),
            served_count,
        },
    )
}

fn metrics(state: &AppState) -> Result<Response<Full<Bytes>>> {
    let snapshot = state.dispatcher.snapshot()?;
    json_response(StatusCode::OK, &snapshot)
}

async fn update_weight<B>(req: Request<B>, state: &AppState) -> Result<Response<Full<Bytes>>>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<StdError>,
{
    if content_length_exceeds(&req, DEFAULT_MAX_BODY_SIZE) {
        warn!(limit = DEFAULT_MAX_BODY_SIZE, "request body exceeds size limit");
        return Err(DispatchError::PayloadTooLarge {
            limit: DEFAULT_MAX_BODY_SIZE,
        });
    }

    let body = Limited::new(req.into_body(), DEFAULT_MAX_BODY_SIZE)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                DispatchError::PayloadTooLarge {
                    limit: DEFAULT_MAX_BODY_SIZE,
                }
            } else {
                DispatchError::BadRequest(format!("failed to read request body: {e}"))
            }
        })?
        .to_bytes();

    let update: WeightUpdate = serde_json::from_slice(&body)?;
    let weight = u32::try_from(update.weight).map_err(|_| {
        DispatchError::InvalidArgument(format!("weight out of range: {}", update.weight))
    })?;

    let snapshot = state
        .dispatcher
        .update_weight_and_snapshot(&update.backend_id, weight)?;
    info!(
        backend = %update.backend_id,
        weight,
        "backend weight updated"
    );

    json_response(StatusCode::OK, &snapshot)
}

/// Returns `true` if the declared `Content-Length` is larger than `limit`.
fn content_length_exceeds<B>(req: &Request<B>, limit: usize) -> bool {
    req.headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .is_some_and(|len| len > limit as u64)
}

async fn run_load_test(query: Option<&str>, state: &AppState) -> Result<Response<Full<Bytes>>> {
    let requests = requested_load(query)?.unwrap_or(state.load_test_requests);
    info!(requests, "starting load test");

    let dispatcher = state.dispatcher.clone();
    let report = tokio::task::spawn_blocking(move || load_test::run(&dispatcher, requests))
        .await
        .map_err(|e| DispatchError::Internal(format!("load test task failed: {e}")))??;

    info!(requests, "load test completed");
    json_response(StatusCode::OK, &report)
}

/// Extracts `requests=N` from a query string, if present.
fn requested_load(query: Option<&str>) -> Result<Option<u64>> {
    let Some(value) = query
        .unwrap_or_default()
        .split('&')
        .find_map(|pair| pair.strip_prefix("requests="))
    else {
        return Ok(None);
    };

    match value.parse::<u64>() {
        Ok(0) | Err(_) => Err(DispatchError::BadRequest(format!(
            "requests must be a positive integer, got \"{value}\""
        ))),
        Ok(n) if n > MAX_LOAD_TEST_REQUESTS => Err(DispatchError::BadRequest(format!(
            "requests must not exceed {MAX_LOAD_TEST_REQUESTS}, got {n}"
        ))),
        Ok(n) => Ok(Some(n)),
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::Empty;

    use super::*;
    use crate::BackendTarget;

    fn state(layout: &[(&str, u32)]) -> AppState {
        let targets = layout
            .iter()
            .map(|(id, weight)| BackendTarget::new(*id, *weight).unwrap())
            .collect();
        AppState {
            dispatcher: WeightedDispatcher::new(targets).unwrap(),
            load_test_requests: 10,
        }
    }

    async fn body_json<T: serde::de::DeserializeOwned>(resp: Response<Full<Bytes>>) -> T {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(path: &str) -> Request<Empty<Bytes>> {
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Empty::new())
            .unwrap()
    }

    fn weight_request(method: Method, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri("/admin/weights")
            .body(Full::new(Bytes::from(body.to_owned())))
            .unwrap()
    }

    #[test]
    fn requested_load_parses_query() {
        assert_eq!(requested_load(None).unwrap(), None);
        assert_eq!(requested_load(Some("x=1")).unwrap(), None);
        assert_eq!(requested_load(Some("x=1&requests=20")).unwrap(), Some(20));
        assert!(requested_load(Some("requests=0")).is_err());
        assert!(requested_load(Some("requests=abc")).is_err());
    }

    #[test]
    fn requested_load_is_bounded() {
        assert_eq!(
            requested_load(Some("requests=1000000")).unwrap(),
            Some(MAX_LOAD_TEST_REQUESTS)
        );
        for query in ["requests=1000001", "requests=18446744073709551615"] {
            let err = requested_load(Some(query)).unwrap_err();
            assert!(matches!(err, DispatchError::BadRequest(_)), "{query}");
        }
    }

    #[tokio::test]
    async fn get_root_dispatches_and_counts() {
        let state = state(&[("A", 2), ("B", 1)]);

        let resp = handle_request(get("/"), state.clone()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(CONTENT_TYPE).unwrap(), JSON_CONTENT_TYPE);

        let body: DispatchResponse = body_json(resp).await;
        assert_eq!(
            body,
            DispatchResponse {
                backend_id: "A".into(),
                served_count: 1,
            }
        );
    }

    #[tokio::test]
    async fn any_other_path_dispatches() {
        let state = state(&[("A", 1)]);
        let resp = handle_request(get("/some/page"), state).await.unwrap();
        let body: DispatchResponse = body_json(resp).await;
        assert_eq!(body.backend_id, "A");
    }

    #[tokio::test]
    async fn post_root_is_method_not_allowed() {
        let state = state(&[("A", 1)]);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(Empty::<Bytes>::new())
            .unwrap();

        let err = handle_request(req, state.clone()).await.unwrap_err();
        assert_eq!(err, DispatchError::MethodNotAllowed);
        assert_eq!(state.dispatcher.snapshot().unwrap()[0].served_count, 0);
    }

    #[tokio::test]
    async fn metrics_lists_every_backend() {
        let state = state(&[("A", 5), ("B", 3)]);
        handle_request(get("/"), state.clone()).await.unwrap();

        let resp = handle_request(get("/metrics"), state).await.unwrap();
        let body: serde_json::Value = body_json(resp).await;
        assert_eq!(
            body,
            serde_json::json!([
                { "backendId": "A", "weight": 5, "servedCount": 1 },
                { "backendId": "B", "weight": 3, "servedCount": 0 },
            ])
        );
    }

    #[tokio::test]
    async fn weight_update_applies_and_returns_snapshot() {
        let state = state(&[("A", 5), ("B", 3)]);
        let req = weight_request(Method::PUT, r#"{"backendId":"B","weight":7}"#);

        let resp = handle_request(req, state.clone()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.dispatcher.total_weight().unwrap(), 12);

        let body: serde_json::Value = body_json(resp).await;
        assert_eq!(
            body,
            serde_json::json!([
                { "backendId": "A", "weight": 5, "servedCount": 0 },
                { "backendId": "B", "weight": 7, "servedCount": 0 },
            ])
        );
    }

    #[tokio::test]
    async fn weight_update_rejects_oversized_body() {
        let state = state(&[("A", 5), ("B", 3)]);
        let padding = " ".repeat(DEFAULT_MAX_BODY_SIZE);
        let body = format!(r#"{{"backendId":"B","weight":7}}{padding}"#);

        let err = handle_request(weight_request(Method::PUT, &body), state.clone())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::PayloadTooLarge {
                limit: DEFAULT_MAX_BODY_SIZE
            }
        );
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(state.dispatcher.total_weight().unwrap(), 8);
    }

    #[tokio::test]
    async fn weight_update_rejects_declared_oversized_body() {
        let state = state(&[("A", 5)]);
        let req = Request::builder()
            .method(Method::PUT)
            .uri("/admin/weights")
            .header(CONTENT_LENGTH, "67108864")
            .body(Full::new(Bytes::from_static(br#"{"backendId":"A","weight":2}"#)))
            .unwrap();

        let err = handle_request(req, state.clone()).await.unwrap_err();
        assert!(matches!(err, DispatchError::PayloadTooLarge { .. }));
        assert_eq!(state.dispatcher.total_weight().unwrap(), 5);
    }

    #[tokio::test]
    async fn weight_update_rejects_non_positive_weights() {
        let state = state(&[("A", 5), ("B", 3)]);
        for weight in ["0", "-4"] {
            let body = format!(r#"{{"backendId":"B","weight":{weight}}}"#);
            let err = handle_request(weight_request(Method::POST, &body), state.clone())
                .await
                .unwrap_err();
            assert!(matches!(err, DispatchError::InvalidArgument(_)));
        }
        assert_eq!(state.dispatcher.total_weight().unwrap(), 8);
    }

    #[tokio::test]
    async fn weight_update_unknown_backend_is_not_found() {
        let state = state(&[("A", 5)]);
        let req = weight_request(Method::PUT, r#"{"backendId":"Z","weight":10}"#);

        let err = handle_request(req, state).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn weight_update_rejects_malformed_json() {
        let state = state(&[("A", 5)]);
        let req = weight_request(Method::PUT, "weight=3");

        let err = handle_request(req, state).await.unwrap_err();
        assert!(matches!(err, DispatchError::BadRequest(_)));
    }

    #[tokio::test]
    async fn load_test_uses_configured_default() {
        let state = state(&[("A", 3), ("B", 2)]);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/admin/load-test")
            .body(Empty::<Bytes>::new())
            .unwrap();

        let resp = handle_request(req, state).await.unwrap();
        let report: load_test::LoadTestReport = body_json(resp).await;
        assert_eq!(report.requests, 10);
        assert_eq!(report.backends[0].served, 6);
        assert_eq!(report.backends[1].served, 4);
    }
}
