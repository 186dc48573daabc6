use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::Instant;

use zoneminder_exporter::config::ZoneminderConfig;
use zoneminder_exporter::zoneminder::{Client, Monitor, SkipReason, ZmClient, ZmError};

/// Scripted ZoneMinder API served over a real socket.
struct Upstream {
    daemon: Value,
    daemon_delay: Option<Duration>,
    monitors: Value,
    event_pages: Vec<Value>,
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "first_page")]
    page: usize,
}

fn first_page() -> usize {
    1
}

async fn daemon_handler(State(state): State<Arc<Upstream>>) -> Json<Value> {
    if let Some(delay) = state.daemon_delay {
        tokio::time::sleep(delay).await;
    }
    Json(state.daemon.clone())
}

async fn monitors_handler(State(state): State<Arc<Upstream>>) -> Json<Value> {
    Json(state.monitors.clone())
}

async fn events_handler(
    State(state): State<Arc<Upstream>>,
    Path(filter): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Value>, StatusCode> {
    // The client must send the fixed-width start-time filter.
    if !filter.starts_with("StartTime >=:") || !filter.ends_with(".json") {
        return Err(StatusCode::NOT_FOUND);
    }

    state
        .event_pages
        .get(query.page - 1)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn serve(upstream: Upstream) -> SocketAddr {
    let app = Router::new()
        .route("/host/daemonCheck.json", get(daemon_handler))
        .route("/monitors.json", get(monitors_handler))
        .route("/events/index/{filter}", get(events_handler))
        .with_state(Arc::new(upstream));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("binding test upstream");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test upstream");
    });

    addr
}

fn client_for(addr: SocketAddr) -> Client {
    Client::new(&ZoneminderConfig {
        api_url: format!("http://{addr}"),
        collect_timeout: Duration::from_secs(5),
        event_lookback: Duration::from_secs(3 * 60 * 60),
    })
    .expect("building client")
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(5)
}

fn min_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .expect("valid timestamp")
}

fn event_record(id: &str, start: &str, end: Value, monitor_id: &str) -> Value {
    json!({
        "Event": {
            "Id": id,
            "Name": format!("Event-{id}"),
            "StartTime": start,
            "EndTime": end,
            "MonitorId": monitor_id,
        }
    })
}

fn monitors_page() -> Value {
    json!({
        "monitors": [
            {"Monitor": {"Id": "1", "Name": "Front"}},
            {"Monitor": null},
            {"Monitor": {"Id": "2", "Name": "Yard"}},
        ]
    })
}

fn front() -> Monitor {
    Monitor {
        id: "1".to_string(),
        name: "Front".to_string(),
    }
}

#[tokio::test]
async fn daemon_running_reads_result_field() {
    let addr = serve(Upstream {
        daemon: json!({"result": 1}),
        daemon_delay: None,
        monitors: json!({"monitors": []}),
        event_pages: Vec::new(),
    })
    .await;

    let client = client_for(addr);
    assert!(client.daemon_running(deadline()).await.expect("fetch"));
}

#[tokio::test]
async fn daemon_stopped_reads_zero() {
    let addr = serve(Upstream {
        daemon: json!({"result": 0}),
        daemon_delay: None,
        monitors: json!({"monitors": []}),
        event_pages: Vec::new(),
    })
    .await;

    let client = client_for(addr);
    assert!(!client.daemon_running(deadline()).await.expect("fetch"));
}

#[tokio::test]
async fn monitors_skips_empty_wrappers_preserving_order() {
    let addr = serve(Upstream {
        daemon: json!({"result": 1}),
        daemon_delay: None,
        monitors: monitors_page(),
        event_pages: Vec::new(),
    })
    .await;

    let client = client_for(addr);
    let monitors = client.monitors(deadline()).await.expect("fetch");

    let names: Vec<_> = monitors.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["Front", "Yard"]);
}

#[tokio::test]
async fn events_accumulates_all_pages() {
    // Only page 3 clears the nextPage flag; the union of all pages'
    // events must come back.
    let pages = vec![
        json!({
            "events": [event_record("1", "2026-01-01 10:00:00", json!("2026-01-01 10:05:00"), "1")],
            "pagination": {"page": 1, "nextPage": true},
        }),
        json!({
            "events": [event_record("2", "2026-01-01 11:00:00", json!("2026-01-01 11:05:00"), "1")],
            "pagination": {"page": 2, "nextPage": true},
        }),
        json!({
            "events": [event_record("3", "2026-01-01 12:00:00", json!("2026-01-01 12:05:00"), "1")],
            "pagination": {"page": 3, "nextPage": false},
        }),
    ];

    let addr = serve(Upstream {
        daemon: json!({"result": 1}),
        daemon_delay: None,
        monitors: monitors_page(),
        event_pages: pages,
    })
    .await;

    let client = client_for(addr);
    let monitors = vec![front()];
    let fetch = client
        .events(deadline(), min_start(), &monitors)
        .await
        .expect("fetch");

    let ids: Vec<_> = fetch.kept.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert!(fetch.skipped.is_empty());
}

#[tokio::test]
async fn events_applies_record_skip_rules() {
    let pages = vec![json!({
        "events": [
            // Still in progress: filtered silently.
            event_record("1", "2026-01-01 10:00:00", json!(null), "1"),
            // Unparseable start time.
            event_record("2", "yesterday-ish", json!("2026-01-01 10:05:00"), "1"),
            // Unknown monitor id.
            event_record("3", "2026-01-01 10:00:00", json!("2026-01-01 10:05:00"), "99"),
            // Survivor.
            event_record("4", "2026-01-01 10:00:00", json!("2026-01-01 10:05:00"), "1"),
        ],
    })];

    let addr = serve(Upstream {
        daemon: json!({"result": 1}),
        daemon_delay: None,
        monitors: monitors_page(),
        event_pages: pages,
    })
    .await;

    let client = client_for(addr);
    let monitors = vec![front()];
    let fetch = client
        .events(deadline(), min_start(), &monitors)
        .await
        .expect("fetch");

    assert_eq!(fetch.kept.len(), 1);
    assert_eq!(fetch.kept[0].id, "4");
    assert_eq!(fetch.kept[0].monitor.name, "Front");

    let reasons: Vec<_> = fetch
        .skipped
        .iter()
        .map(|s| (s.id.as_str(), s.reason))
        .collect();
    assert_eq!(
        reasons,
        vec![
            ("2", SkipReason::BadStartTime),
            ("3", SkipReason::UnknownMonitor),
        ]
    );
}

#[tokio::test]
async fn events_normalizes_timestamps_to_utc() {
    let pages = vec![json!({
        "events": [event_record("1", "2026-01-01 10:00:00", json!("2026-01-01 10:05:00"), "1")],
    })];

    let addr = serve(Upstream {
        daemon: json!({"result": 1}),
        daemon_delay: None,
        monitors: monitors_page(),
        event_pages: pages,
    })
    .await;

    let client = client_for(addr);
    let monitors = vec![front()];
    let fetch = client
        .events(deadline(), min_start(), &monitors)
        .await
        .expect("fetch");

    let expected_start = Utc
        .with_ymd_and_hms(2026, 1, 1, 10, 0, 0)
        .single()
        .expect("valid timestamp");
    assert_eq!(fetch.kept[0].start, expected_start);
    assert_eq!(
        fetch.kept[0].end - fetch.kept[0].start,
        chrono::Duration::minutes(5)
    );
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let addr = serve(Upstream {
        daemon: json!("not an object"),
        daemon_delay: None,
        monitors: json!({"monitors": []}),
        event_pages: Vec::new(),
    })
    .await;

    let client = client_for(addr);
    let err = client
        .daemon_running(deadline())
        .await
        .expect_err("should fail");

    assert!(matches!(err, ZmError::Decode { .. }), "got {err:?}");
}

#[tokio::test]
async fn expired_deadline_aborts_in_flight_call() {
    let addr = serve(Upstream {
        daemon: json!({"result": 1}),
        daemon_delay: Some(Duration::from_secs(5)),
        monitors: json!({"monitors": []}),
        event_pages: Vec::new(),
    })
    .await;

    let client = client_for(addr);
    let started = std::time::Instant::now();

    let err = client
        .daemon_running(Instant::now() + Duration::from_millis(200))
        .await
        .expect_err("should time out");

    assert!(
        matches!(err, ZmError::DeadlineExceeded { .. }),
        "got {err:?}"
    );
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "call did not abort promptly",
    );
}
