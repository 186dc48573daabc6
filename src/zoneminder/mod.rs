use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ZoneminderConfig;

/// Fixed-width timestamp format used by the ZoneMinder API.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A camera/source configured in ZoneMinder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monitor {
    pub id: String,
    pub name: String,
}

/// A completed motion event, normalized to UTC with its monitor resolved.
///
/// In-progress events (no end time) never make it into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub monitor: Monitor,
}

/// Why an event record was dropped during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Start time did not match the API timestamp format.
    BadStartTime,
    /// End time did not match the API timestamp format.
    BadEndTime,
    /// The referenced monitor id is not in the current snapshot.
    UnknownMonitor,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BadStartTime => "unparseable start time",
            Self::BadEndTime => "unparseable end time",
            Self::UnknownMonitor => "unknown monitor id",
        };
        f.write_str(s)
    }
}

/// A dropped event record, kept for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEvent {
    pub id: String,
    pub reason: SkipReason,
}

/// Result of one event listing: surviving events plus the records dropped
/// by the per-record integrity rules. Drops are record-scoped and never
/// fail the fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFetch {
    pub kept: Vec<Event>,
    pub skipped: Vec<SkippedEvent>,
}

/// Monitor snapshot indexed by id, for resolving event references.
///
/// Built from a listing fetched in the same collection cycle, so resolution
/// data is never staler than the current scrape.
pub struct MonitorIndex<'a> {
    by_id: HashMap<&'a str, &'a Monitor>,
}

impl<'a> MonitorIndex<'a> {
    pub fn new(monitors: &'a [Monitor]) -> Self {
        let by_id = monitors.iter().map(|m| (m.id.as_str(), m)).collect();
        Self { by_id }
    }

    pub fn get(&self, id: &str) -> Option<&'a Monitor> {
        self.by_id.get(id).copied()
    }
}

/// Errors from a single resource fetch. Each aborts only the fetch in
/// progress; record-level problems are reported as [`SkippedEvent`]s
/// instead.
#[derive(Debug, Error)]
pub enum ZmError {
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status {status} from {path}")]
    Status {
        path: String,
        status: reqwest::StatusCode,
    },

    #[error("decoding response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("deadline exceeded while fetching {path}")]
    DeadlineExceeded { path: String },
}

/// ZoneMinder API client trait.
///
/// Every operation runs under the caller's deadline and aborts in-flight
/// requests once it passes.
pub trait ZmClient: Send + Sync {
    /// Check whether the ZoneMinder daemon reports running.
    fn daemon_running(
        &self,
        deadline: Instant,
    ) -> impl std::future::Future<Output = Result<bool, ZmError>> + Send;

    /// Fetch the configured monitor list, preserving listing order.
    fn monitors(
        &self,
        deadline: Instant,
    ) -> impl std::future::Future<Output = Result<Vec<Monitor>, ZmError>> + Send;

    /// Fetch completed events starting at or after `min_start`, walking all
    /// pages and resolving monitor references against `monitors`.
    fn events(
        &self,
        deadline: Instant,
        min_start: DateTime<Utc>,
        monitors: &[Monitor],
    ) -> impl std::future::Future<Output = Result<EventFetch, ZmError>> + Send;
}

/// HTTP-based ZoneMinder API client.
pub struct Client {
    http: reqwest::Client,
    api_url: String,
}

impl Client {
    /// Create a new API client.
    pub fn new(cfg: &ZoneminderConfig) -> Result<Self> {
        let timeout = if cfg.collect_timeout.is_zero() {
            Duration::from_secs(30)
        } else {
            cfg.collect_timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
        })
    }

    /// Perform a GET request under the deadline and deserialize the JSON
    /// response.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        deadline: Instant,
        path: &str,
    ) -> Result<T, ZmError> {
        let url = format!("{}/{}", self.api_url, path);

        let request = async {
            let response = self
                .http
                .get(&url)
                .header("Accept", "application/json")
                .send()
                .await
                .map_err(|e| ZmError::Transport {
                    path: path.to_string(),
                    source: e,
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(ZmError::Status {
                    path: path.to_string(),
                    status,
                });
            }

            response.json::<T>().await.map_err(|e| ZmError::Decode {
                path: path.to_string(),
                source: e,
            })
        };

        match tokio::time::timeout_at(deadline, request).await {
            Ok(result) => result,
            Err(_) => Err(ZmError::DeadlineExceeded {
                path: path.to_string(),
            }),
        }
    }
}

impl ZmClient for Client {
    async fn daemon_running(&self, deadline: Instant) -> Result<bool, ZmError> {
        debug!("checking daemon status");

        let rsp: DaemonCheckResponse = self.get_json(deadline, "host/daemonCheck.json").await?;

        Ok(rsp.result != 0)
    }

    async fn monitors(&self, deadline: Instant) -> Result<Vec<Monitor>, ZmError> {
        debug!("fetching monitor list");

        let rsp: MonitorsResponse = self.get_json(deadline, "monitors.json").await?;

        // Wrapper items without an inner monitor are skipped, not an error.
        Ok(rsp
            .monitors
            .into_iter()
            .filter_map(|item| item.monitor)
            .map(|m| Monitor {
                id: m.id,
                name: m.name,
            })
            .collect())
    }

    async fn events(
        &self,
        deadline: Instant,
        min_start: DateTime<Utc>,
        monitors: &[Monitor],
    ) -> Result<EventFetch, ZmError> {
        let index = MonitorIndex::new(monitors);
        let filter = min_start.format(TIME_FORMAT);

        let mut kept = Vec::new();
        let mut skipped = Vec::new();
        let mut page = 1u32;

        loop {
            let path = format!("events/index/StartTime >=:{filter}.json?page={page}");
            let rsp: EventsResponse = self.get_json(deadline, &path).await?;

            let (mut page_kept, page_skipped) = resolve_events(rsp.events, &index);

            for skip in &page_skipped {
                warn!(event_id = %skip.id, reason = %skip.reason, "skipping event");
            }

            kept.append(&mut page_kept);
            skipped.extend(page_skipped);

            match rsp.pagination {
                Some(p) if p.next_page => page += 1,
                _ => break,
            }
        }

        debug!(kept = kept.len(), skipped = skipped.len(), "fetched events");

        Ok(EventFetch { kept, skipped })
    }
}

/// Parse an API timestamp. The wire format carries no zone; values are
/// read as UTC.
fn parse_api_time(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, TIME_FORMAT).map(|naive| naive.and_utc())
}

/// Apply the per-record integrity rules to one page of event items,
/// splitting them into kept events and observable drops.
///
/// Rules, in priority order: records still in progress (no end time) are
/// filtered silently; unparseable start/end times and unknown monitor ids
/// are dropped with a reason.
fn resolve_events(items: Vec<EventItem>, index: &MonitorIndex<'_>) -> (Vec<Event>, Vec<SkippedEvent>) {
    let mut kept = Vec::new();
    let mut skipped = Vec::new();

    for item in items {
        let Some(record) = item.event else {
            continue;
        };

        // In-progress events have no end time yet. Ignore them instead of
        // making up data for them.
        let end_raw = record.end_time.as_deref().unwrap_or("");
        if end_raw.is_empty() {
            continue;
        }

        let start_raw = record.start_time.as_deref().unwrap_or("");
        let Ok(start) = parse_api_time(start_raw) else {
            skipped.push(SkippedEvent {
                id: record.id,
                reason: SkipReason::BadStartTime,
            });
            continue;
        };

        let Ok(end) = parse_api_time(end_raw) else {
            skipped.push(SkippedEvent {
                id: record.id,
                reason: SkipReason::BadEndTime,
            });
            continue;
        };

        let Some(monitor) = index.get(&record.monitor_id) else {
            skipped.push(SkippedEvent {
                id: record.id,
                reason: SkipReason::UnknownMonitor,
            });
            continue;
        };

        kept.push(Event {
            id: record.id,
            name: record.name,
            start,
            end,
            monitor: monitor.clone(),
        });
    }

    (kept, skipped)
}

// --- JSON response structures ---

#[derive(Deserialize)]
struct DaemonCheckResponse {
    result: i64,
}

#[derive(Deserialize)]
struct MonitorsResponse {
    #[serde(default)]
    monitors: Vec<MonitorItem>,
}

#[derive(Deserialize)]
struct MonitorItem {
    #[serde(rename = "Monitor")]
    monitor: Option<MonitorRecord>,
}

#[derive(Deserialize)]
struct MonitorRecord {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<EventItem>,
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct EventItem {
    #[serde(rename = "Event")]
    event: Option<EventRecord>,
}

#[derive(Deserialize)]
struct EventRecord {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "StartTime", default)]
    start_time: Option<String>,
    #[serde(rename = "EndTime", default)]
    end_time: Option<String>,
    #[serde(rename = "MonitorId")]
    monitor_id: String,
}

#[derive(Deserialize)]
struct Pagination {
    #[serde(rename = "nextPage", default)]
    next_page: bool,
}
