//! Building a span tree while the measured work runs.

use std::time::Instant;

use crate::{Node, QueryTiming, ReportError, ReportResult};

/// Produces the span tree of one run.
pub trait SpanCapture {
    /// Starts a fresh capture whose root span is called `name`. Anything left
    /// from an earlier, unfinished capture is dropped.
    fn start(&mut self, name: &str);

    /// Closes every open span and returns the root.
    fn finish(&mut self) -> ReportResult<Node>;
}

#[derive(Debug)]
struct OpenSpan {
    node: Node,
    started: Instant,
}

/// Manual span builder: `enter`/`exit` pairs nest, queries attach to the
/// innermost open span. Times are milliseconds since [`SpanCapture::start`].
#[derive(Debug, Default)]
pub struct SpanRecorder {
    origin: Option<Instant>,
    open: Vec<OpenSpan>,
    trivial_threshold_ms: Option<f64>,
}

impl SpanRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spans shorter than this and without queries are hidden unless trivial
    /// spans are displayed.
    pub fn with_trivial_threshold(mut self, threshold_ms: f64) -> Self {
        self.trivial_threshold_ms = Some(threshold_ms);
        self
    }

    pub fn is_recording(&self) -> bool {
        !self.open.is_empty()
    }

    /// Milliseconds since the capture started; 0 when not recording.
    pub fn elapsed_ms(&self) -> f64 {
        self.origin
            .map_or(0.0, |origin| origin.elapsed().as_secs_f64() * 1000.0)
    }

    pub fn enter(&mut self, name: impl Into<String>) -> ReportResult<()> {
        if !self.is_recording() {
            return Err(ReportError::InvalidArgument(
                "cannot enter a span outside a capture".to_string(),
            ));
        }
        let span = self.open_span(name.into());
        self.open.push(span);
        Ok(())
    }

    /// Closes the innermost span, which must be `name`. The root span is
    /// closed by [`SpanCapture::finish`] only.
    pub fn exit(&mut self, name: &str) -> ReportResult<()> {
        let Some(top) = self.open.last() else {
            return Err(ReportError::InvalidArgument(format!(
                "cannot exit span {name:?} outside a capture"
            )));
        };
        if self.open.len() == 1 || top.node.name != name {
            return Err(ReportError::InvalidArgument(format!(
                "cannot exit span {name:?} while {:?} is the innermost open span",
                top.node.name
            )));
        }
        self.close_top();
        Ok(())
    }

    /// Runs `f` inside a span of its own. The span is closed whether or not
    /// `f` fails.
    pub fn span<T, E>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Self) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<ReportError>,
    {
        self.enter(name)?;
        let result = f(self);
        self.exit(name)?;
        result
    }

    pub fn record_query(&mut self, query: QueryTiming) -> ReportResult<()> {
        let Some(top) = self.open.last_mut() else {
            return Err(ReportError::InvalidArgument(
                "cannot record a query outside a capture".to_string(),
            ));
        };
        top.node.push_query(query);
        Ok(())
    }

    /// Times `f` and records it as a query against the innermost span. `f`
    /// returns its value and the number of rows it fetched.
    pub fn time_query<T, E>(
        &mut self,
        statement: &str,
        f: impl FnOnce() -> Result<(T, u64), E>,
    ) -> Result<T, E>
    where
        E: From<ReportError>,
    {
        let start_ms = self.elapsed_ms();
        let started = Instant::now();
        let (value, rows) = f()?;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.record_query(QueryTiming::new(statement, start_ms, duration_ms).with_rows(rows))?;
        Ok(value)
    }

    fn open_span(&self, name: String) -> OpenSpan {
        let mut node = Node::new(name, self.elapsed_ms(), 0.0);
        node.depth = self.open.len();
        node.trivial_duration_threshold_ms = self.trivial_threshold_ms;
        OpenSpan {
            node,
            started: Instant::now(),
        }
    }

    /// Pops the innermost span, fixes its durations and hands it to its
    /// parent. Returns it instead when it was the root.
    fn close_top(&mut self) -> Option<Node> {
        let OpenSpan { mut node, started } = self.open.pop()?;
        node.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let children_ms: f64 = node.children.iter().map(|c| c.duration_ms).sum();
        node.duration_without_children_ms = (node.duration_ms - children_ms).max(0.0);

        match self.open.last_mut() {
            Some(parent) => {
                parent.node.children.push(node);
                None
            }
            None => Some(node),
        }
    }
}

impl SpanCapture for SpanRecorder {
    fn start(&mut self, name: &str) {
        if self.is_recording() {
            tracing::debug!(dropped = self.open.len(), "restarting span capture");
        }
        self.open.clear();
        self.origin = Some(Instant::now());
        let root = self.open_span(name.to_string());
        self.open.push(root);
    }

    fn finish(&mut self) -> ReportResult<Node> {
        if !self.is_recording() {
            return Err(ReportError::InvalidArgument(
                "no span capture was started".to_string(),
            ));
        }
        for span in self.open.iter_mut().skip(1) {
            span.node.name.push_str(" (unfinished)");
        }
        while !self.open.is_empty() {
            if let Some(root) = self.close_top() {
                self.origin = None;
                return Ok(root);
            }
        }
        Err(ReportError::InvalidArgument(
            "span capture lost its root".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_spans_and_queries() {
        let mut recorder = SpanRecorder::new();
        recorder.start("request");
        recorder
            .record_query(QueryTiming::new("BEGIN", 0.0, 0.1))
            .expect("query");
        recorder
            .span("load", |r| {
                r.record_query(QueryTiming::new("SELECT 1", 0.2, 1.0).with_rows(1))?;
                r.span("inner", |_| Ok::<_, ReportError>(()))
            })
            .expect("span");

        let root = recorder.finish().expect("finish");
        assert_eq!(root.name, "request");
        assert_eq!(root.depth, 0);
        assert_eq!(root.queries.len(), 1);
        assert_eq!(root.children.len(), 1);

        let load = &root.children[0];
        assert_eq!(load.name, "load");
        assert_eq!(load.depth, 1);
        assert_eq!(load.sql_duration_ms, 1.0);
        assert_eq!(load.children[0].name, "inner");
        assert_eq!(load.children[0].depth, 2);

        assert!(root.duration_ms >= load.duration_ms);
        assert!(root.duration_ms >= root.duration_without_children_ms);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn unclosed_spans_are_marked() {
        let mut recorder = SpanRecorder::new();
        recorder.start("request");
        recorder.enter("outer").expect("enter");
        recorder.enter("inner").expect("enter");

        let root = recorder.finish().expect("finish");
        let outer = &root.children[0];
        assert_eq!(root.name, "request");
        assert_eq!(outer.name, "outer (unfinished)");
        assert_eq!(outer.children[0].name, "inner (unfinished)");
    }

    #[test]
    fn exit_must_match_innermost_span() {
        let mut recorder = SpanRecorder::new();
        recorder.start("request");
        recorder.enter("a").expect("enter");
        assert!(matches!(recorder.exit("b"), Err(ReportError::InvalidArgument(_))));
        recorder.exit("a").expect("exit");
        assert!(recorder.exit("request").is_err());
    }

    #[test]
    fn recording_needs_a_started_capture() {
        let mut recorder = SpanRecorder::new();
        assert!(recorder.enter("a").is_err());
        assert!(recorder.record_query(QueryTiming::new("SELECT 1", 0.0, 1.0)).is_err());
        assert!(recorder.finish().is_err());
    }

    #[test]
    fn failing_span_is_still_closed() {
        let mut recorder = SpanRecorder::new();
        recorder.start("request");
        let result: ReportResult<()> = recorder.span("boom", |_| {
            Err(ReportError::InvalidArgument("boom".to_string()))
        });
        assert!(result.is_err());
        let root = recorder.finish().expect("finish");
        assert_eq!(root.children[0].name, "boom");
    }

    #[test]
    fn timed_query_lands_on_innermost_span() {
        let mut recorder = SpanRecorder::new().with_trivial_threshold(1_000.0);
        recorder.start("request");
        let value = recorder
            .span("load", |r| r.time_query("SELECT * FROM vms", || Ok::<_, ReportError>((7, 3))))
            .expect("query");
        assert_eq!(value, 7);

        let root = recorder.finish().expect("finish");
        let load = &root.children[0];
        assert_eq!(load.queries[0].row_count, 3);
        assert_eq!(load.trivial_duration_threshold_ms, Some(1_000.0));
        assert!(!load.is_trivial());
        assert!(root.is_trivial());
    }
}
