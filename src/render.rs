//! Fixed-width, pipe-delimited report of page groups.
//!
//! Every numeric column shares one width, computed over the whole batch
//! before the first line is written, so rows of different groups line up.

use regex::Regex;
use serde::{Deserialize, Serialize};

use std::io::Write;

use crate::{
    Cell, Node, PageGroup, QueryTiming, ReportResult, Sample, compile_patterns, dedup, indent,
    mean, summarize,
};

const FREED_OBJECTS_NOTE: &str =
    "note: objects were freed during these runs; memory figures undercount allocations";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RenderOptions {
    pub display_offset: bool,
    pub display_sql: bool,
    pub display_children: bool,
    pub display_trivial: bool,
    pub display_trace: bool,
    pub display_cache: bool,
    pub display_stats: bool,
    /// Name patterns of spans to flatten into a single row.
    pub collapse: Vec<String>,
    pub dedup: bool,
    pub aggressive_dedup: bool,
    /// Print summarized instead of raw SQL.
    pub shorten: bool,
    /// Leave the first run out of group averages.
    pub skip_first: bool,
    /// Minimum width of the numeric columns.
    pub width: Option<usize>,
}

impl RenderOptions {
    pub fn shows_sql(&self) -> bool {
        self.display_sql || self.aggressive_dedup
    }

    pub fn dedups(&self) -> bool {
        self.dedup || self.aggressive_dedup
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPhase {
    Idle,
    WidthComputed,
    Printing,
    Done,
}

#[derive(Debug, Clone)]
struct Row {
    depth: usize,
    offset: Cell,
    duration: Cell,
    child_duration: Cell,
    memory: Cell,
    objects: Cell,
    query_count: Cell,
    query_ms: Cell,
    query_rows: Cell,
    phrase: String,
}

impl Row {
    fn new(depth: usize, phrase: impl Into<String>) -> Self {
        Self {
            depth,
            offset: Cell::Empty,
            duration: Cell::Empty,
            child_duration: Cell::Empty,
            memory: Cell::Empty,
            objects: Cell::Empty,
            query_count: Cell::Empty,
            query_ms: Cell::Empty,
            query_rows: Cell::Empty,
            phrase: phrase.into(),
        }
    }

    fn is_dashes(&self) -> bool {
        matches!(&self.offset, Cell::Text(text) if text == "---")
    }
}

#[derive(Debug)]
pub struct ReportRenderer<W: Write> {
    options: RenderOptions,
    collapse: Vec<Regex>,
    width: usize,
    phase: RenderPhase,
    out: W,
}

impl<W: Write> ReportRenderer<W> {
    pub fn new(options: RenderOptions, out: W) -> ReportResult<Self> {
        let collapse = compile_patterns(&options.collapse)?;
        Ok(Self {
            width: options.width.unwrap_or(0),
            options,
            collapse,
            phase: RenderPhase::Idle,
            out,
        })
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Widens the shared column width to fit every value.
    pub fn compute_widths(&mut self, values: impl IntoIterator<Item = Cell>) {
        self.width = values
            .into_iter()
            .map(|cell| cell.render().chars().count())
            .fold(self.width, usize::max);
        self.enter(RenderPhase::WidthComputed);
    }

    pub fn print_header(&mut self) -> ReportResult<()> {
        self.enter(RenderPhase::Printing);
        let mut row = Row::new(0, "comments");
        row.offset = Cell::text("@");
        row.duration = Cell::text("ms");
        row.child_duration = Cell::text("ms-");
        row.memory = Cell::text("mem");
        row.objects = Cell::text("objs");
        row.query_count = Cell::text("sql");
        row.query_ms = Cell::text("sqlms");
        row.query_rows = Cell::text("sqlrows");
        self.print_line(&row)?;
        self.print_dashes()
    }

    pub fn print_dashes(&mut self) -> ReportResult<()> {
        let dash = || Cell::text("---");
        let row = Row {
            offset: dash(),
            duration: dash(),
            child_duration: dash(),
            memory: dash(),
            objects: dash(),
            query_count: dash(),
            query_ms: dash(),
            query_rows: dash(),
            ..Row::new(0, "---")
        };
        self.print_line(&row)
    }

    /// One summary row for the run, then the span tree when children are
    /// displayed. Configured collapse patterns are applied to the tree in
    /// place.
    pub fn print_page(&mut self, sample: &mut Sample) -> ReportResult<()> {
        self.enter(RenderPhase::Printing);
        let page = &mut sample.page;
        let include_cached = self.options.display_cache;
        let counts = page.root.count_queries(include_cached);

        let mut row = Row::new(0, page.name.clone());
        row.offset = Cell::Duration(0.0);
        row.duration = Cell::Duration(page.duration_ms);
        row.memory = Cell::objects(sample.stat.and_then(|s| s.mem_size));
        row.objects = Cell::objects(sample.stat.map(|s| s.total_allocated_objects));
        row.query_count = Cell::Count(counts.count as f64);
        row.query_ms = Cell::Duration(page.root.sql_duration_in_subtree(include_cached));
        row.query_rows = Cell::Count(counts.rows as f64);
        self.print_line(&row)?;

        if !self.collapse.is_empty() {
            page.root.collapse(&self.collapse);
        }
        if self.options.display_children {
            self.print_node(&page.root)?;
        }
        Ok(())
    }

    /// Prints every group with a shared header, an average line for groups
    /// of more than two runs, and a note when the memory deltas saw frees.
    pub fn print_group(&mut self, groups: &mut [PageGroup]) -> ReportResult<()> {
        let display_stats = self.options.display_stats;
        let include_cached = self.options.display_cache;
        let mut widths = Vec::new();
        for sample in groups.iter().flat_map(|g| &g.samples) {
            widths.push(Cell::Duration(sample.page.duration_ms));
            widths.push(Cell::Duration(
                sample.page.root.sql_duration_in_subtree(include_cached),
            ));
            if display_stats && let Some(stat) = sample.stat {
                widths.push(Cell::objects(stat.mem_size));
                widths.push(Cell::Objects(stat.total_allocated_objects));
            }
        }
        self.compute_widths(widths);

        self.print_header()?;
        let banners = groups.len() > 1;
        for group in groups.iter_mut() {
            if banners {
                writeln!(self.out, "======")?;
                writeln!(self.out, "{}", group.title())?;
                writeln!(self.out, "======")?;
            }
            for sample in &mut group.samples {
                self.print_page(sample)?;
            }
            if group.samples.len() > 2 {
                self.print_dashes()?;
                self.print_averages(group.averaged(self.options.skip_first))?;
            }
        }

        let freed = groups
            .iter()
            .flat_map(|g| &g.samples)
            .filter_map(|s| s.stat)
            .any(|stat| stat.total_freed_objects != 0);
        if freed {
            writeln!(self.out, "{FREED_OBJECTS_NOTE}")?;
        }
        self.enter(RenderPhase::Done);
        Ok(())
    }

    fn print_averages(&mut self, samples: &[Sample]) -> ReportResult<()> {
        let include_cached = self.options.display_cache;
        let counts: Vec<_> = samples
            .iter()
            .map(|s| s.page.root.count_queries(include_cached))
            .collect();
        let stats: Vec<_> = samples.iter().filter_map(|s| s.stat).collect();
        let mem_sizes: Vec<_> = stats.iter().filter_map(|s| s.mem_size).collect();

        let mut row = Row::new(0, "avg");
        row.duration = Cell::Duration(mean(samples.iter().map(|s| s.page.duration_ms)));
        if !mem_sizes.is_empty() {
            row.memory = Cell::Objects(mean(mem_sizes.iter().map(|&m| m as f64)).round() as i64);
        }
        if !stats.is_empty() {
            let objects = mean(stats.iter().map(|s| s.total_allocated_objects as f64));
            row.objects = Cell::Objects(objects.round() as i64);
        }
        row.query_count = Cell::Count(mean(counts.iter().map(|c| c.count as f64)));
        row.query_ms = Cell::Duration(mean(
            samples
                .iter()
                .map(|s| s.page.root.sql_duration_in_subtree(include_cached)),
        ));
        row.query_rows = Cell::Count(mean(counts.iter().map(|c| c.rows as f64)));
        self.print_line(&row)
    }

    fn print_node(&mut self, root: &Node) -> ReportResult<()> {
        let mut nodes = Vec::new();
        root.for_each_node(!self.options.display_trivial, &mut |node| nodes.push(node));

        for node in nodes {
            let include_cached = self.options.display_cache;
            let counts = node.own_query_count(include_cached);
            let mut row = Row::new(node.depth, node.name.trim());
            row.offset = Cell::Duration(node.start_ms);
            row.duration = Cell::Duration(node.duration_ms);
            row.child_duration = Cell::Duration(node.duration_without_children_ms);
            row.query_count = Cell::Count(counts.count as f64);
            row.query_ms = Cell::Duration(node.own_sql_duration(include_cached));
            row.query_rows = Cell::Count(counts.rows as f64);
            self.print_line(&row)?;

            if self.options.shows_sql() {
                self.print_queries(node)?;
            }
        }
        Ok(())
    }

    fn print_queries(&mut self, node: &Node) -> ReportResult<()> {
        let aggressive = self.options.aggressive_dedup;
        let mut timings: Vec<QueryTiming> = node
            .queries
            .iter()
            .filter(|q| self.options.display_cache || !q.is_cached())
            .cloned()
            .collect();
        for timing in &mut timings {
            timing.summary = Some(summarize(
                &timing.raw_statement,
                timing.parameters.as_deref(),
                !aggressive,
            ));
        }
        if self.options.dedups() {
            timings = dedup(timings, aggressive);
        }

        for timing in &timings {
            self.print_query(timing, node.depth + 1)?;
            if self.options.display_trace
                && let Some(trace) = &timing.stack_trace
            {
                self.print_trace(trace, node.depth)?;
            }
        }
        Ok(())
    }

    fn print_query(&mut self, timing: &QueryTiming, depth: usize) -> ReportResult<()> {
        let text = match (&timing.summary, self.options.shorten) {
            (Some(summary), true) => summary.as_str(),
            _ => timing.raw_statement.as_str(),
        };
        let mut row = Row::new(depth, text);
        row.offset = Cell::Duration(timing.start_ms);
        row.query_count = Cell::count(timing.count.map(|c| c as f64));
        row.query_ms = Cell::Duration(timing.duration_ms);
        row.query_rows = if timing.is_cached() {
            Cell::text(format!("({})", timing.row_count))
        } else {
            Cell::Count(timing.row_count as f64)
        };
        self.print_line(&row)
    }

    fn print_trace(&mut self, trace: &str, depth: usize) -> ReportResult<()> {
        self.print_line(&Row::new(depth, "TRACE:"))?;
        for line in trace.lines() {
            self.print_line(&Row::new(depth + 1, line))?;
        }
        Ok(())
    }

    fn print_line(&mut self, row: &Row) -> ReportResult<()> {
        let dashes = row.is_dashes();
        let sp = if dashes { ':' } else { ' ' };
        let w = self.width;

        let mut line = String::from("| ");
        let mut wide = |text: String| line.push_str(&format!(" {text:>w$}{sp}|"));
        if self.options.display_offset {
            wide(row.offset.render());
        }
        wide(row.duration.render());
        if self.options.display_children {
            wide(row.child_duration.render());
        }
        if self.options.display_stats {
            wide(row.memory.render_sparse());
            wide(row.objects.render_sparse());
        }
        line.push_str(&format!(
            "{:>5}{sp}| {:>w$}{sp}| {:>8}{sp}|",
            row.query_count.render_sparse(),
            row.query_ms.render_sparse(),
            row.query_rows.render_sparse(),
        ));

        let phrase = row.phrase.replace("executing ", "");
        if dashes {
            line.push_str(&format!(" {}{phrase}", indent(row.depth)));
        } else {
            line.push_str(&format!("`{}{phrase}`", indent(row.depth)));
        }
        writeln!(self.out, "{line}")?;
        Ok(())
    }

    fn enter(&mut self, phase: RenderPhase) {
        if self.phase != phase {
            tracing::debug!(from = ?self.phase, to = ?phase, "renderer phase");
            self.phase = phase;
        }
    }
}
