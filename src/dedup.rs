//! Folding repeated query timings of one span into a single counted entry.

use indexmap::IndexMap;
use indexmap::map::Entry;

use crate::{QueryTiming, summarize};

/// Groups `timings` and keeps one entry per group, in first-seen order.
///
/// Exact mode groups by statement and bound parameters; aggressive mode by
/// summary text. A kept entry is the first of its group with `count`,
/// `duration_ms` and `first_fetch_duration_ms` summed over the group.
pub fn dedup(timings: Vec<QueryTiming>, aggressive: bool) -> Vec<QueryTiming> {
    if timings.len() <= 1 {
        return timings;
    }

    let mut groups: IndexMap<String, QueryTiming> = IndexMap::new();
    for timing in timings {
        match groups.entry(group_key(&timing, aggressive)) {
            Entry::Occupied(mut entry) => absorb(entry.get_mut(), timing),
            Entry::Vacant(entry) => {
                let mut first = timing;
                first.count = Some(first.count.unwrap_or(1));
                entry.insert(first);
            }
        }
    }
    groups.into_values().collect()
}

fn group_key(timing: &QueryTiming, aggressive: bool) -> String {
    if aggressive {
        return timing.summary.clone().unwrap_or_else(|| {
            summarize(&timing.raw_statement, timing.parameters.as_deref(), false)
        });
    }
    // Parameter values are arbitrary JSON; their debug form is a stable key.
    format!("{:?}", (&timing.raw_statement, &timing.parameters))
}

fn absorb(kept: &mut QueryTiming, other: QueryTiming) {
    kept.count = Some(kept.count.unwrap_or(1) + other.count.unwrap_or(1));
    kept.duration_ms += other.duration_ms;
    kept.first_fetch_duration_ms = match (kept.first_fetch_duration_ms, other.first_fetch_duration_ms)
    {
        (Some(a), Some(b)) => Some(a + b),
        (a, b) => a.or(b),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn timing(sql: &str, id: i64, ms: f64) -> QueryTiming {
        QueryTiming::new(sql, 0.0, ms).with_parameters(vec![("id".to_string(), json!(id))])
    }

    #[test]
    fn short_input_is_returned_unchanged() {
        assert!(dedup(Vec::new(), false).is_empty());
        let one = vec![timing("SELECT 1", 1, 1.0)];
        assert_eq!(dedup(one.clone(), true), one);
    }

    #[test]
    fn exact_mode_groups_by_statement_and_parameters() {
        let timings = vec![
            timing("SELECT * FROM users WHERE id = $1", 1, 1.0),
            timing("SELECT * FROM roles WHERE id = $1", 1, 4.0),
            timing("SELECT * FROM users WHERE id = $1", 1, 2.0),
            timing("SELECT * FROM users WHERE id = $1", 2, 8.0),
            timing("SELECT * FROM users WHERE id = $1", 1, 3.0),
        ];
        let out = dedup(timings, false);

        assert_eq!(out.len(), 3);
        assert!(out[0].raw_statement.contains("users"));
        assert_eq!(out[0].count, Some(3));
        assert_eq!(out[0].duration_ms, 6.0);
        assert_eq!(out[0].first_fetch_duration_ms, Some(6.0));
        assert!(out[1].raw_statement.contains("roles"));
        assert_eq!(out[1].count, Some(1));
        assert_eq!(out[2].count, Some(1));
        assert_eq!(out[2].duration_ms, 8.0);
    }

    #[test]
    fn aggressive_mode_groups_by_summary() {
        let timings = vec![
            QueryTiming::new("SELECT id FROM users WHERE id = 1", 0.0, 1.0),
            QueryTiming::new("SELECT id FROM users WHERE id = 2", 1.0, 1.5),
            QueryTiming::new("BEGIN", 2.0, 0.1),
        ];
        let out = dedup(timings, true);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].count, Some(2));
        assert_eq!(out[0].duration_ms, 2.5);
        assert_eq!(out[1].raw_statement, "BEGIN");
    }

    #[test]
    fn absent_first_fetch_stays_absent() {
        let timings = vec![
            timing("SELECT 1", 1, 1.0).with_first_fetch(None),
            timing("SELECT 1", 1, 1.0).with_first_fetch(None),
        ];
        let out = dedup(timings, false);
        assert_eq!(out[0].first_fetch_duration_ms, None);

        let mixed = vec![
            timing("SELECT 1", 1, 1.0).with_first_fetch(None),
            timing("SELECT 1", 1, 1.0).with_first_fetch(Some(0.5)),
        ];
        assert_eq!(dedup(mixed, false)[0].first_fetch_duration_ms, Some(0.5));
    }

    #[test]
    fn dedup_is_idempotent() {
        let timings = vec![
            timing("SELECT a FROM t", 1, 1.0),
            timing("SELECT a FROM t", 1, 2.0),
            timing("SELECT b FROM t", 1, 3.0),
            timing("SELECT a FROM t", 2, 4.0),
        ];
        for aggressive in [false, true] {
            let once = dedup(timings.clone(), aggressive);
            let twice = dedup(once.clone(), aggressive);
            assert_eq!(once, twice);
        }
    }
}
