pub mod reduce;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::Instant;
use tracing::{error, warn};

use crate::zoneminder::{Monitor, ZmClient};

/// Metric namespace prefixed to every exported name.
pub const NAMESPACE: &str = "zoneminder";

pub const DAEMON_RUNNING: &str = "daemon_running";
pub const LAST_EVENT_START_TIME: &str = "last_event_start_time";
pub const LAST_EVENT_END_TIME: &str = "last_event_end_time";
pub const MONITOR_CONFIGURED: &str = "monitor_configured";

const LABEL_MONITOR: &str = "monitor";

/// Static metadata for one exported metric family. All families are gauges.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

/// The fixed metric contract, independent of any scrape.
pub const DESCRIPTORS: &[Descriptor] = &[
    Descriptor {
        name: DAEMON_RUNNING,
        help: "Status of the ZoneMinder daemon.",
        labels: &[],
    },
    Descriptor {
        name: LAST_EVENT_START_TIME,
        help: "Start time of the most recent completed event, in epoch seconds.",
        labels: &[LABEL_MONITOR],
    },
    Descriptor {
        name: LAST_EVENT_END_TIME,
        help: "End time of the most recent completed event, in epoch seconds.",
        labels: &[LABEL_MONITOR],
    },
    Descriptor {
        name: MONITOR_CONFIGURED,
        help: "Monitor configured in ZoneMinder.",
        labels: &[LABEL_MONITOR],
    },
];

/// One gauge data point produced during a scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub name: &'static str,
    pub value: f64,
    pub labels: Vec<(&'static str, String)>,
}

/// Receives observations as a scrape produces them.
pub trait ObservationSink {
    fn observe(&mut self, observation: Observation);
}

impl ObservationSink for Vec<Observation> {
    fn observe(&mut self, observation: Observation) {
        self.push(observation);
    }
}

/// Per-scrape bookkeeping, for the exporter's self metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectSummary {
    /// Resource families that produced no data this cycle.
    pub family_errors: usize,
    /// Event records dropped by the integrity rules.
    pub events_skipped: usize,
}

/// Stateless scrape pipeline: fetches daemon status, monitors, and recent
/// events under one deadline and reduces them to the metric contract.
///
/// Holds no cross-scrape state; every collection cycle rebuilds its result
/// set from fresh fetches, so concurrent scrapes are isolation-safe.
pub struct Collector<C> {
    client: C,
    collect_timeout: Duration,
    event_lookback: chrono::Duration,
}

impl<C: ZmClient> Collector<C> {
    /// Create a collector with a fixed collection budget and event
    /// lookback window.
    pub fn new(client: C, collect_timeout: Duration, event_lookback: Duration) -> Result<Self> {
        let event_lookback =
            chrono::Duration::from_std(event_lookback).context("event lookback out of range")?;

        Ok(Self {
            client,
            collect_timeout,
            event_lookback,
        })
    }

    /// The metric families a scrape can emit.
    pub fn describe() -> &'static [Descriptor] {
        DESCRIPTORS
    }

    /// Run one collection cycle, emitting observations to `sink`.
    ///
    /// Each resource family fails independently: an upstream error is
    /// logged and that family emits nothing, but the scrape as a whole
    /// still succeeds with whatever the other families produced.
    pub async fn collect_into(&self, sink: &mut impl ObservationSink) -> CollectSummary {
        let deadline = Instant::now() + self.collect_timeout;
        let mut summary = CollectSummary::default();

        // Daemon status and monitor list have no data dependency; fetch
        // them concurrently under the shared deadline.
        let (daemon, monitors) = tokio::join!(
            self.client.daemon_running(deadline),
            self.client.monitors(deadline),
        );

        match daemon {
            Ok(running) => {
                sink.observe(Observation {
                    name: DAEMON_RUNNING,
                    value: if running { 1.0 } else { 0.0 },
                    labels: Vec::new(),
                });
            }
            Err(e) => {
                summary.family_errors += 1;
                error!(error = %e, "failed to check whether the daemon is running");
            }
        }

        let monitors = match monitors {
            Ok(monitors) => {
                warn_duplicate_names(&monitors);
                Some(monitors)
            }
            Err(e) => {
                summary.family_errors += 1;
                error!(error = %e, "failed to fetch monitors");
                None
            }
        };

        // Event resolution needs a monitor snapshot no older than this
        // scrape; without one the family is skipped for the cycle.
        match &monitors {
            Some(monitors) => {
                let min_start = Utc::now() - self.event_lookback;

                match self.client.events(deadline, min_start, monitors).await {
                    Ok(fetch) => {
                        summary.events_skipped = fetch.skipped.len();

                        for (name, group) in reduce::group_by_monitor(&fetch.kept) {
                            if let Some(last) = reduce::most_recent(&group) {
                                sink.observe(Observation {
                                    name: LAST_EVENT_START_TIME,
                                    value: last.start.timestamp() as f64,
                                    labels: vec![(LABEL_MONITOR, name.to_string())],
                                });
                                sink.observe(Observation {
                                    name: LAST_EVENT_END_TIME,
                                    value: last.end.timestamp() as f64,
                                    labels: vec![(LABEL_MONITOR, name.to_string())],
                                });
                            }
                        }
                    }
                    Err(e) => {
                        summary.family_errors += 1;
                        error!(error = %e, "failed to fetch events");
                    }
                }
            }
            None => {
                summary.family_errors += 1;
                error!("skipping event collection: no monitor snapshot this cycle");
            }
        }

        if let Some(monitors) = monitors {
            for monitor in &monitors {
                sink.observe(Observation {
                    name: MONITOR_CONFIGURED,
                    value: 1.0,
                    labels: vec![(LABEL_MONITOR, monitor.name.clone())],
                });
            }
        }

        summary
    }
}

/// Monitors sharing a configured name export merged, indistinguishable
/// series. Assumed unique in practice; flag it when the assumption breaks.
fn warn_duplicate_names(monitors: &[Monitor]) {
    let mut seen: HashMap<&str, &str> = HashMap::new();

    for monitor in monitors {
        if let Some(first_id) = seen.insert(monitor.name.as_str(), monitor.id.as_str()) {
            warn!(
                name = %monitor.name,
                first_id,
                second_id = %monitor.id,
                "duplicate monitor name; their series will merge",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_table() {
        let names: Vec<_> = DESCRIPTORS.iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "daemon_running",
                "last_event_start_time",
                "last_event_end_time",
                "monitor_configured",
            ]
        );
    }

    #[test]
    fn test_descriptor_label_sets() {
        for desc in DESCRIPTORS {
            let expected: &[&str] = if desc.name == DAEMON_RUNNING {
                &[]
            } else {
                &["monitor"]
            };
            assert_eq!(desc.labels, expected, "labels for {}", desc.name);
        }
    }

    #[test]
    fn test_vec_sink_preserves_order() {
        let mut sink: Vec<Observation> = Vec::new();
        sink.observe(Observation {
            name: DAEMON_RUNNING,
            value: 1.0,
            labels: Vec::new(),
        });
        sink.observe(Observation {
            name: MONITOR_CONFIGURED,
            value: 1.0,
            labels: vec![("monitor", "Front".to_string())],
        });

        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0].name, DAEMON_RUNNING);
        assert_eq!(sink[1].name, MONITOR_CONFIGURED);
    }
}
