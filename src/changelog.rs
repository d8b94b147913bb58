use crate::state::{StateStore, StoreError};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

pub const HEARTBEAT: &str = "No changes detected in devices.";

/// Entries look like `2026-10-19T08:30:00Z: RAM changed from 16.00 GB to 32.00 GB`.
/// Line breaks inside `message` are escaped so each entry stays on one line.
pub fn format_entry(at: SystemTime, message: &str) -> String {
    let message = message.replace('\r', "\\r").replace('\n', "\\n");
    format!("{}: {}", humantime::format_rfc3339_seconds(at), message)
}

/// Leading timestamp of an entry. Space-separated timestamps without a zone
/// are accepted as UTC.
pub fn parse_timestamp(line: &str) -> Option<SystemTime> {
    let (ts, _) = line.split_once(": ")?;
    humantime::parse_rfc3339_weak(ts.trim()).ok()
}

#[derive(Debug, Default)]
pub struct Pruned {
    pub kept: Vec<String>,
    pub expired: usize,
    pub malformed: Vec<String>,
}

impl Pruned {
    pub fn dropped(&self) -> usize {
        self.expired + self.malformed.len()
    }
}

/// Keeps entries strictly newer than `now - window`, preserving order.
pub fn prune(lines: Vec<String>, now: SystemTime, window: Duration) -> Pruned {
    let cutoff = now.checked_sub(window);
    let mut out = Pruned::default();
    for line in lines {
        match parse_timestamp(&line) {
            None => out.malformed.push(line),
            Some(ts) if cutoff.map_or(true, |c| ts > c) => out.kept.push(line),
            Some(_) => out.expired += 1,
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
pub struct ChangeLog {
    retention: Duration,
}

impl ChangeLog {
    pub fn new(retention: Duration) -> Self {
        Self { retention }
    }

    pub fn append<S: StateStore + ?Sized>(
        &self,
        store: &mut S,
        message: &str,
        now: SystemTime,
    ) -> Result<(), StoreError> {
        let pruned = prune(store.read_log()?, now, self.retention);
        for line in &pruned.malformed {
            warn!(line = %line, "dropping change log entry with unreadable timestamp");
        }
        if pruned.dropped() > 0 {
            debug!(
                expired = pruned.expired,
                malformed = pruned.malformed.len(),
                kept = pruned.kept.len(),
                "change log pruned"
            );
            store.rewrite_log(&pruned.kept)?;
        }
        store.append_log(&format_entry(now, message))
    }
}
