use std::collections::BTreeMap;

use crate::zoneminder::Event;

/// Partition events by monitor name, preserving encounter order within
/// each group. Name-keyed for compatibility with the exported label set;
/// monitors sharing a name merge here.
pub fn group_by_monitor(events: &[Event]) -> BTreeMap<&str, Vec<&Event>> {
    let mut groups: BTreeMap<&str, Vec<&Event>> = BTreeMap::new();

    for event in events {
        groups
            .entry(event.monitor.name.as_str())
            .or_default()
            .push(event);
    }

    groups
}

/// Select the most recent event of a group: the one with the maximum start
/// time, ties resolved in favor of the later fetch position.
pub fn most_recent<'a>(group: &[&'a Event]) -> Option<&'a Event> {
    let mut best: Option<&Event> = None;

    for event in group {
        if best.is_none_or(|b| event.start >= b.start) {
            best = Some(event);
        }
    }

    best
}
