//! Memory counter snapshots and their deltas.

use serde::{Deserialize, Serialize};

use std::ops::Sub;

use crate::{ReportResult, format_grouped};

/// Point-in-time allocation counters of the running process.
///
/// A snapshot subtracted from a later one of the same process yields the work
/// done in between, not a live value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StatSnapshot {
    pub total_allocated_objects: i64,
    pub total_freed_objects: i64,
    pub old_objects: i64,
    /// Live heap size. Only present when collecting it was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_size: Option<i64>,
}

impl StatSnapshot {
    pub fn live_objects(&self) -> i64 {
        self.total_allocated_objects
            .saturating_sub(self.total_freed_objects)
    }

    pub fn young_objects(&self) -> i64 {
        self.live_objects().saturating_sub(self.old_objects)
    }

    /// `end - start`, field by field. Counter resets show up as negative
    /// values and are kept as-is.
    pub fn delta(start: &StatSnapshot, end: &StatSnapshot) -> StatSnapshot {
        StatSnapshot {
            total_allocated_objects: end
                .total_allocated_objects
                .saturating_sub(start.total_allocated_objects),
            total_freed_objects: end
                .total_freed_objects
                .saturating_sub(start.total_freed_objects),
            old_objects: end.old_objects.saturating_sub(start.old_objects),
            mem_size: match (start.mem_size, end.mem_size) {
                (Some(s), Some(e)) => Some(e.saturating_sub(s)),
                _ => None,
            },
        }
    }
}

impl Sub for StatSnapshot {
    type Output = StatSnapshot;

    fn sub(self, start: StatSnapshot) -> StatSnapshot {
        StatSnapshot::delta(&start, &self)
    }
}

/// Reads the current counters of the process.
pub trait StatSource {
    fn capture(&self) -> ReportResult<StatSnapshot>;
}

/// A stat delta with the label of the block it measured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedStat {
    pub name: String,
    pub stat: StatSnapshot,
}

impl NamedStat {
    pub fn new(name: impl Into<String>, stat: StatSnapshot) -> Self {
        Self {
            name: name.into(),
            stat,
        }
    }

    pub fn header(&self) -> String {
        if self.stat.mem_size.is_some() {
            "|name|memsize|allocated|old|freed|".to_string()
        } else {
            "|name|allocated|old|freed|".to_string()
        }
    }

    pub fn dash(&self) -> String {
        if self.stat.mem_size.is_some() {
            "|---|---|---|---|---|".to_string()
        } else {
            "|---|---|---|---|".to_string()
        }
    }

    pub fn message(&self) -> String {
        let s = &self.stat;
        let counters = format!(
            "{}|{}|{}|",
            format_grouped(s.total_allocated_objects),
            format_grouped(s.old_objects),
            format_grouped(s.total_freed_objects)
        );
        match s.mem_size {
            Some(mem) => format!("|{}|{}|{counters}", self.name, format_grouped(mem)),
            None => format!("|{}|{counters}", self.name),
        }
    }

    pub fn table(&self) -> String {
        [self.header(), self.dash(), self.message()].join("\n")
    }
}
