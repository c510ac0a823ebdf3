//! Trigger HTTP server
//!
//! Routes:
//! - `GET /` - status, version and environment
//! - `POST /clean_beacon_data` - queue a full run (readings -> sessions)
//! - `POST /areas` - queue an areas-only run (stored positions -> sessions)
//! - `GET /jobs/{id}` - job status
//! - `GET /metrics` - Prometheus text format
//!
//! Trigger bodies are optional JSON `{"timestamp": "..."}`; without one the run
//! covers the default lookback window. Every response carries permissive CORS
//! headers.

use crate::domain::types::RunMode;
use crate::infra::metrics::Metrics;
use crate::services::jobs::{DispatchError, JobQueue};
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderMap, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Reported by `GET /`
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "+", env!("GIT_HASH"));

/// Shared state for request handlers
pub struct ServerState {
    queue: JobQueue,
    metrics: Arc<Metrics>,
    environment: String,
    default_lookback: chrono::Duration,
}

impl ServerState {
    pub fn new(
        queue: JobQueue,
        metrics: Arc<Metrics>,
        environment: String,
        default_lookback_secs: u64,
    ) -> Self {
        Self {
            queue,
            metrics,
            environment,
            default_lookback: chrono::Duration::seconds(default_lookback_secs as i64),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TriggerBody {
    #[serde(default)]
    timestamp: Option<String>,
}

/// Parse a trigger cursor: RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS[.f]` taken as UTC
pub fn parse_cursor(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Resolve the run cursor from a trigger body; empty body means the default window
fn parse_trigger_body(
    body: &[u8],
    now: DateTime<Utc>,
    default_lookback: chrono::Duration,
) -> Result<DateTime<Utc>, String> {
    let trigger: TriggerBody = if body.iter().all(|b| b.is_ascii_whitespace()) {
        TriggerBody::default()
    } else {
        serde_json::from_slice(body).map_err(|e| format!("invalid JSON body: {}", e))?
    };

    match trigger.timestamp.as_deref() {
        None | Some("") => Ok(now - default_lookback),
        Some(raw) => parse_cursor(raw).ok_or_else(|| format!("invalid timestamp '{}'", raw)),
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, json!({ "status": "error", "message": message }))
}

fn preflight_response(headers: &HeaderMap) -> Response<Full<Bytes>> {
    let requested = headers
        .get("Access-Control-Request-Headers")
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("Content-Type"));
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .header("Access-Control-Allow-Headers", requested)
        .body(Full::new(Bytes::new()))
        .expect("static response should not fail")
}

fn trigger(state: &ServerState, mode: RunMode, body: &[u8]) -> Response<Full<Bytes>> {
    let since = match parse_trigger_body(body, Utc::now(), state.default_lookback) {
        Ok(since) => since,
        Err(message) => {
            warn!(mode = %mode.as_str(), error = %message, "trigger_rejected");
            return error_response(StatusCode::BAD_REQUEST, &message);
        }
    };

    match state.queue.submit(mode, since) {
        Ok(handle) => json_response(
            StatusCode::OK,
            json!({
                "status": "success",
                "message": "process triggered",
                "job_id": handle.id(),
                "since": since,
            }),
        ),
        Err(e @ DispatchError::AlreadyRunning(_)) => {
            error_response(StatusCode::CONFLICT, &e.to_string())
        }
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string()),
    }
}

fn job_status(state: &ServerState, raw_id: &str) -> Response<Full<Bytes>> {
    let Ok(id) = Uuid::parse_str(raw_id) else {
        return error_response(StatusCode::NOT_FOUND, "unknown job");
    };
    match state.queue.status(&id) {
        Some(status) => json_response(StatusCode::OK, json!({ "job_id": id, "status": status })),
        None => error_response(StatusCode::NOT_FOUND, "unknown job"),
    }
}

/// Queue depth gauges appended to the metrics text
fn queue_gauges(queue: &JobQueue) -> String {
    let mut output = String::new();
    output.push_str("# HELP positioning_jobs_pending Jobs queued or running\n");
    output.push_str("# TYPE positioning_jobs_pending gauge\n");
    output.push_str(&format!("positioning_jobs_pending {}\n", queue.pending()));
    output.push_str("# HELP positioning_run_windows_held Run windows claimed by a pending job\n");
    output.push_str("# TYPE positioning_run_windows_held gauge\n");
    output.push_str(&format!("positioning_run_windows_held {}\n", queue.windows_held()));
    output
}

/// Route one request whose body has already been read
pub async fn route(
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
    state: &ServerState,
) -> Response<Full<Bytes>> {
    debug!(method = %method, path = %path, "http_request");

    if *method == Method::OPTIONS {
        return preflight_response(headers);
    }

    match (method, path) {
        (&Method::GET, "/") => json_response(
            StatusCode::OK,
            json!({
                "status": "success",
                "version": VERSION,
                "environment": state.environment,
            }),
        ),
        (&Method::POST, "/clean_beacon_data") => trigger(state, RunMode::Full, body),
        (&Method::POST, "/areas") => trigger(state, RunMode::AreasOnly, body),
        (&Method::GET, "/metrics") => {
            let summary = state.metrics.report();
            summary.log();
            let mut text = summary.to_prometheus();
            text.push_str(&queue_gauges(&state.queue));
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(text)))
                .expect("static response should not fail")
        }
        (&Method::GET, p) if p.starts_with("/jobs/") => job_status(state, &p["/jobs/".len()..]),
        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "http_body_read_failed");
            return Ok(error_response(StatusCode::BAD_REQUEST, "unreadable body"));
        }
    };

    Ok(route(&parts.method, parts.uri.path(), &parts.headers, &body, &state).await)
}

/// Start the trigger HTTP server and serve until shutdown is signalled
pub async fn start_trigger_server(
    addr: SocketAddr,
    state: Arc<ServerState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, version = %VERSION, "trigger_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "trigger_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "trigger_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("trigger_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::jobs::{create_job_queue, JobWorker};
    use crate::services::pipeline::testing::*;
    use crate::services::pipeline::Pipeline;

    fn state() -> (ServerState, JobWorker) {
        let metrics = Arc::new(Metrics::new());
        let directory = Arc::new(FakeDirectory::new(&["b1"]));
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(MemoryReadings(Vec::new())),
            Arc::new(MemoryPositions::default()),
            directory.clone(),
            directory,
            metrics.clone(),
        ));
        let (queue, worker) = create_job_queue(pipeline, metrics.clone(), 4);
        (ServerState::new(queue, metrics, "test".to_string(), 3600), worker)
    }

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_parse_cursor_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(parse_cursor("2024-03-01T09:30:00Z"), Some(expected));
        assert_eq!(parse_cursor("2024-03-01T10:30:00+01:00"), Some(expected));
        assert_eq!(parse_cursor("2024-03-01 09:30:00"), Some(expected));
        assert_eq!(parse_cursor("2024-03-01T09:30:00"), Some(expected));
        assert!(parse_cursor("yesterday").is_none());
    }

    #[test]
    fn test_empty_body_uses_default_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let lookback = chrono::Duration::hours(1);

        assert_eq!(parse_trigger_body(b"", now, lookback), Ok(now - lookback));
        assert_eq!(parse_trigger_body(b"{}", now, lookback), Ok(now - lookback));
        assert!(parse_trigger_body(b"{\"timestamp\": 5", now, lookback).is_err());
    }

    #[tokio::test]
    async fn test_status_route() {
        let (state, _worker) = state();
        let response = route(&Method::GET, "/", &HeaderMap::new(), b"", &state).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "success");
        assert_eq!(json["environment"], "test");
        assert_eq!(json["version"], VERSION);
    }

    #[tokio::test]
    async fn test_trigger_then_duplicate_conflicts() {
        let (state, _worker) = state();
        let body = br#"{"timestamp": "2024-03-01 09:30:00"}"#;

        let first = route(&Method::POST, "/clean_beacon_data", &HeaderMap::new(), body, &state).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["Access-Control-Allow-Origin"], "*");
        let json = body_json(first).await;
        assert_eq!(json["message"], "process triggered");
        let job_id = json["job_id"].as_str().unwrap().to_string();

        let second = route(&Method::POST, "/areas", &HeaderMap::new(), body, &state).await;
        assert_eq!(second.status(), StatusCode::CONFLICT);

        let status = route(&Method::GET, &format!("/jobs/{}", job_id), &HeaderMap::new(), b"", &state).await;
        assert_eq!(status.status(), StatusCode::OK);
        assert_eq!(body_json(status).await["status"]["state"], "queued");
    }

    #[tokio::test]
    async fn test_bad_timestamp_is_400() {
        let (state, _worker) = state();
        let response = route(
            &Method::POST,
            "/areas",
            &HeaderMap::new(),
            br#"{"timestamp": "not a time"}"#,
            &state,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stopped_worker_is_503() {
        let (state, worker) = state();
        drop(worker);

        let response = route(&Method::POST, "/clean_beacon_data", &HeaderMap::new(), b"", &state).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unknown_job_and_route_are_404() {
        let (state, _worker) = state();
        let unknown = format!("/jobs/{}", Uuid::now_v7());

        for path in [unknown.as_str(), "/jobs/not-a-uuid", "/nope"] {
            let response = route(&Method::GET, path, &HeaderMap::new(), b"", &state).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", path);
        }
    }

    #[tokio::test]
    async fn test_preflight_echoes_requested_headers() {
        let (state, _worker) = state();
        let mut headers = HeaderMap::new();
        headers.insert("Access-Control-Request-Headers", HeaderValue::from_static("X-Custom"));

        let response = route(&Method::OPTIONS, "/areas", &headers, b"", &state).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["Access-Control-Allow-Headers"], "X-Custom");
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let (state, _worker) = state();
        let response = route(&Method::GET, "/metrics", &HeaderMap::new(), b"", &state).await;

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("positioning_runs_started_total 0"));
        assert!(text.contains("positioning_jobs_pending 0\n"));
    }

    #[tokio::test]
    async fn test_metrics_route_reports_queued_jobs() {
        let (state, _worker) = state();
        let trigger = route(&Method::POST, "/areas", &HeaderMap::new(), b"", &state).await;
        assert_eq!(trigger.status(), StatusCode::OK);

        let response = route(&Method::GET, "/metrics", &HeaderMap::new(), b"", &state).await;
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("positioning_jobs_pending 1\n"));
        assert!(text.contains("positioning_run_windows_held 1\n"));
    }
}
