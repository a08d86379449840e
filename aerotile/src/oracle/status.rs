//! Plain-text slot report parsing.
//!
//! The shared status endpoint answers with a fixed line grammar:
//!
//! ```text
//! Current time: 2026-08-25T14:00:39Z
//! Slot available after: 2026-08-25T14:01:07Z, in 28 seconds.
//! 2 slots available now.
//! Currently running queries (pid, space limit, time limit, start time):
//! 12345 536870912 180 2026-08-25T14:00:12Z
//! ```
//!
//! A report without a parseable current time yields no status rather than
//! an error; the oracle keeps whatever it knew before.

use chrono::{DateTime, Utc};

/// One request slot: a timestamp after which the remote API accepts one
/// more request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSlot {
    pub available_after: DateTime<Utc>,
}

/// Parsed slot report from the status endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RateStatus {
    /// Server-side time the report was generated.
    pub current_time: DateTime<Utc>,
    /// Every known request slot, in report order.
    pub slots: Vec<RateSlot>,
    /// Number of queries the server is currently executing.
    pub running_queries: usize,
}

impl RateStatus {
    /// Earliest timestamp at which a request slot is available.
    pub fn next_available_slot(&self) -> Option<DateTime<Utc>> {
        self.slots.iter().map(|s| s.available_after).min()
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Parse a status report.
///
/// Returns `None` when the report has no current time; malformed slot or
/// query lines are skipped individually.
pub fn parse_status(text: &str) -> Option<RateStatus> {
    let mut current_time = None;
    let mut slots = Vec::new();
    let mut slots_available_now = 0usize;
    let mut running_queries = 0usize;
    let mut in_query_list = false;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if in_query_list {
            running_queries += 1;
            continue;
        }

        if let Some(rest) = line.strip_prefix("Current time:") {
            current_time = parse_timestamp(rest);
        } else if let Some(rest) = line.strip_prefix("Slot available after:") {
            // "after: <ISO-8601>, in N seconds." The timestamp is
            // authoritative; the trailing seconds are redundant.
            let timestamp = rest.split(',').next().unwrap_or(rest);
            if let Some(ts) = parse_timestamp(timestamp) {
                slots.push(RateSlot {
                    available_after: ts,
                });
            }
        } else if line.ends_with("available now.") {
            // "<N> slot(s) available now." expands to N slots at the
            // report's current time.
            if let Some(count) = line
                .split_whitespace()
                .next()
                .and_then(|n| n.parse::<usize>().ok())
            {
                slots_available_now += count;
            }
        } else if line.starts_with("Currently running queries") {
            in_query_list = true;
        }
    }

    let current_time = current_time?;
    for _ in 0..slots_available_now {
        slots.push(RateSlot {
            available_after: current_time,
        });
    }

    Some(RateStatus {
        current_time,
        slots,
        running_queries,
    })
}
