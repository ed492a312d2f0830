//! Span tree model: pages, nodes and their query timings.

use regex::Regex;
use serde::{Deserialize, Serialize};

use std::ops::AddAssign;

use crate::{ReportResult, is_schema_lookup, is_transaction_control};

/// First-fetch durations below this are served from a cache.
pub const CACHED_FETCH_THRESHOLD_MS: f64 = 0.001;

/// A bound parameter: name and value.
pub type QueryParam = (String, serde_json::Value);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueryTiming {
    pub raw_statement: String,
    #[serde(default)]
    pub parameters: Option<Vec<QueryParam>>,
    pub start_ms: f64,
    pub duration_ms: f64,
    #[serde(default)]
    pub first_fetch_duration_ms: Option<f64>,
    #[serde(default)]
    pub row_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Times this statement ran; set when repeated timings are merged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Summary text cached by the renderer.
    #[serde(skip)]
    pub summary: Option<String>,
}

impl QueryTiming {
    pub fn new(raw_statement: impl Into<String>, start_ms: f64, duration_ms: f64) -> Self {
        Self {
            raw_statement: raw_statement.into(),
            parameters: None,
            start_ms,
            duration_ms,
            first_fetch_duration_ms: Some(duration_ms),
            row_count: 0,
            stack_trace: None,
            count: None,
            summary: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<QueryParam>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_rows(mut self, row_count: u64) -> Self {
        self.row_count = row_count;
        self
    }

    pub fn with_first_fetch(mut self, first_fetch_duration_ms: Option<f64>) -> Self {
        self.first_fetch_duration_ms = first_fetch_duration_ms;
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn is_cached(&self) -> bool {
        self.first_fetch_duration_ms
            .is_none_or(|ms| ms < CACHED_FETCH_THRESHOLD_MS)
    }

    /// Database round trips that are not application queries: cache hits,
    /// schema lookups and transaction control.
    pub fn is_other_hit(&self) -> bool {
        self.is_cached()
            || is_schema_lookup(&self.raw_statement)
            || is_transaction_control(&self.raw_statement)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryCount {
    pub count: u64,
    pub rows: u64,
}

impl AddAssign for QueryCount {
    fn add_assign(&mut self, other: Self) {
        self.count += other.count;
        self.rows += other.rows;
    }
}

/// Statements split into application queries and other hits, each with its
/// summed duration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QueryTally {
    pub queries: u64,
    pub queries_ms: f64,
    pub other_hits: u64,
    pub other_ms: f64,
}

impl QueryTally {
    pub fn record(&mut self, query: &QueryTiming) {
        if query.is_other_hit() {
            self.other_hits += 1;
            self.other_ms += query.duration_ms;
        } else {
            self.queries += 1;
            self.queries_ms += query.duration_ms;
        }
    }

    /// Time of `elapsed_ms` spent outside the database.
    pub fn code_ms(&self, elapsed_ms: f64) -> f64 {
        elapsed_ms - self.queries_ms - self.other_ms
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub depth: usize,
    pub start_ms: f64,
    pub duration_ms: f64,
    pub duration_without_children_ms: f64,
    #[serde(default)]
    pub trivial_duration_threshold_ms: Option<f64>,
    #[serde(default)]
    pub queries: Vec<QueryTiming>,
    /// Summed duration of `queries`, including any merged from descendants.
    #[serde(default)]
    pub sql_duration_ms: f64,
    #[serde(default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>, start_ms: f64, duration_ms: f64) -> Self {
        Self {
            name: name.into(),
            depth: 0,
            start_ms,
            duration_ms,
            duration_without_children_ms: duration_ms,
            trivial_duration_threshold_ms: None,
            queries: Vec::new(),
            sql_duration_ms: 0.0,
            row_count: None,
            children: Vec::new(),
        }
    }

    pub fn with_threshold(mut self, threshold_ms: f64) -> Self {
        self.trivial_duration_threshold_ms = Some(threshold_ms);
        self
    }

    pub fn with_query(mut self, query: QueryTiming) -> Self {
        self.push_query(query);
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.push_child(child);
        self
    }

    pub fn push_query(&mut self, query: QueryTiming) {
        self.sql_duration_ms += query.duration_ms;
        self.queries.push(query);
    }

    /// Adopts `child`, renumbering its subtree depths below this node and
    /// taking its duration out of this node's own time.
    pub fn push_child(&mut self, mut child: Node) {
        child.renumber_depths(self.depth + 1);
        self.duration_without_children_ms =
            (self.duration_without_children_ms - child.duration_ms).max(0.0);
        self.children.push(child);
    }

    /// Below its threshold and without queries of its own. Children do not
    /// matter.
    pub fn is_trivial(&self) -> bool {
        self.trivial_duration_threshold_ms
            .is_some_and(|threshold| self.duration_ms < threshold)
            && self.queries.is_empty()
    }

    /// Pre-order walk. With `skip_trivial`, a trivial node and its whole
    /// subtree are not visited.
    pub fn for_each_node<'a>(&'a self, skip_trivial: bool, visit: &mut impl FnMut(&'a Node)) {
        if skip_trivial && self.is_trivial() {
            return;
        }
        visit(self);
        for child in &self.children {
            child.for_each_node(skip_trivial, visit);
        }
    }

    /// Queries attached to this node only.
    pub fn own_query_count(&self, include_cached: bool) -> QueryCount {
        let mut total = QueryCount::default();
        for query in &self.queries {
            if include_cached || !query.is_cached() {
                total += QueryCount {
                    count: 1,
                    rows: query.row_count,
                };
            }
        }
        total
    }

    /// Queries over the whole subtree.
    pub fn count_queries(&self, include_cached: bool) -> QueryCount {
        let mut total = QueryCount::default();
        self.for_each_node(false, &mut |node| {
            total += node.own_query_count(include_cached);
        });
        total
    }

    /// Query time of this node only, counting the same queries as
    /// [`Node::own_query_count`].
    pub fn own_sql_duration(&self, include_cached: bool) -> f64 {
        self.queries
            .iter()
            .filter(|q| include_cached || !q.is_cached())
            .map(|q| q.duration_ms)
            .sum()
    }

    /// Query time over the whole subtree.
    pub fn sql_duration_in_subtree(&self, include_cached: bool) -> f64 {
        let mut total = 0.0;
        self.for_each_node(false, &mut |node| {
            total += node.own_sql_duration(include_cached);
        });
        total
    }

    pub fn tally_queries(&self) -> QueryTally {
        let mut tally = QueryTally::default();
        self.for_each_node(false, &mut |node| {
            for query in &node.queries {
                tally.record(query);
            }
        });
        tally
    }

    /// Recomputes every depth in the subtree, with this node at `depth`.
    pub fn renumber_depths(&mut self, depth: usize) {
        self.depth = depth;
        for child in &mut self.children {
            child.renumber_depths(depth + 1);
        }
    }

    /// Flattens every child whose name matches one of `patterns` into a leaf
    /// carrying its subtree's queries. Other children are searched further.
    pub fn collapse(&mut self, patterns: &[Regex]) {
        for child in &mut self.children {
            if patterns.iter().any(|p| p.is_match(&child.name)) {
                child.merge_children();
            } else {
                child.collapse(patterns);
            }
        }
    }

    /// Moves all descendant queries, query time and rows into this node, in
    /// pre-order, and drops the children.
    pub fn merge_children(&mut self) {
        let children = std::mem::take(&mut self.children);
        merge_into(children, self);
    }
}

fn merge_into(children: Vec<Node>, target: &mut Node) {
    for child in children {
        let Node {
            queries,
            sql_duration_ms,
            row_count,
            children,
            ..
        } = child;
        target.queries.extend(queries);
        target.sql_duration_ms += sql_duration_ms;
        target.row_count = Some(target.row_count.unwrap_or(0) + row_count.unwrap_or(0));
        merge_into(children, target);
    }
}

pub fn compile_patterns(patterns: &[String]) -> ReportResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(Into::into))
        .collect()
}

/// One captured run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Page {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    pub root: Node,
    pub duration_ms: f64,
    pub duration_ms_in_sql: f64,
}

impl Page {
    pub fn new(id: impl Into<String>, name: impl Into<String>, root: Node) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            started_at: None,
            duration_ms: root.duration_ms,
            duration_ms_in_sql: root.sql_duration_in_subtree(false),
            root,
        }
    }
}
