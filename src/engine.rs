//! Measuring runs and reporting on them.

use globset::{Glob, GlobMatcher};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use std::cell::RefCell;
use std::io::Write;

use crate::{
    NamedStat, Page, PageStore, PageSummary, RenderOptions, ReportError, ReportRenderer,
    ReportResult, Sample, SpanCapture, StatSnapshot, StatSource, group_samples,
};

/// Measures blocks of work, keeps the captured pages in a store and prints
/// grouped reports over them.
#[derive(Debug)]
pub struct ReportEngine<S, M> {
    store: S,
    stats: M,
    options: RenderOptions,
    /// Names of the `track` calls currently running, outermost first.
    frames: RefCell<Vec<String>>,
}

impl<S: PageStore, M: StatSource> ReportEngine<S, M> {
    pub fn new(store: S, stats: M, options: RenderOptions) -> Self {
        Self {
            store,
            stats,
            options,
            frames: RefCell::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut RenderOptions {
        &mut self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Current counters, or zeros when they cannot be read.
    pub fn capture_stat(&self) -> StatSnapshot {
        match self.stats.capture() {
            Ok(stat) => stat,
            Err(err) => {
                tracing::warn!("memory counters unavailable, reporting zeros: {err}");
                StatSnapshot::default()
            }
        }
    }

    /// Runs `f` between two snapshots. A failing `f` is passed through and no
    /// closing snapshot is taken.
    ///
    /// Calls nested inside `f` are named after their enclosing calls, as in
    /// `outer:inner`.
    pub fn track<T, E>(
        &self,
        name: &str,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<(T, NamedStat), E> {
        let full_name = {
            let mut frames = self.frames.borrow_mut();
            frames.push(name.to_string());
            frames.join(":")
        };
        let start = self.capture_stat();
        let result = f();
        self.frames.borrow_mut().pop();
        let value = result?;
        let end = self.capture_stat();
        Ok((value, NamedStat::new(full_name, end - start)))
    }

    /// Tracks `f` while `capture` records its spans, then stores the page and
    /// its stat delta. Returns the value of `f` and the page id.
    pub fn profile_run<C, T, E>(
        &mut self,
        name: &str,
        capture: &mut C,
        f: impl FnOnce(&mut C) -> Result<T, E>,
    ) -> Result<(T, String), E>
    where
        C: SpanCapture,
        E: From<ReportError>,
    {
        let started_at = now_rfc3339();
        capture.start(name);
        let (value, stat) = self.track(name, || f(capture))?;
        let root = capture.finish()?;

        let mut page = Page::new("", name, root);
        page.started_at = started_at;
        let tally = page.root.tally_queries();
        let id = self.store.save_page(page)?;
        self.store.save_stat(&id, &stat.stat)?;
        tracing::debug!(
            %id,
            name = %stat.name,
            queries = tally.queries,
            other_hits = tally.other_hits,
            "profiled run"
        );
        Ok((value, id))
    }

    /// One unsaved warm-up run (`prep <name>`), then `samples` stored runs
    /// named `<name>1` to `<name>N`. Returns the stored ids in run order.
    pub fn sample_runs<C, T, E>(
        &mut self,
        name: &str,
        samples: usize,
        capture: &mut C,
        mut f: impl FnMut(&mut C) -> Result<T, E>,
    ) -> Result<Vec<String>, E>
    where
        C: SpanCapture,
        E: From<ReportError>,
    {
        capture.start(&format!("prep {name}"));
        f(capture)?;
        capture.finish()?;

        let mut ids = Vec::with_capacity(samples);
        for run in 1..=samples {
            let (_, id) = self.profile_run(&format!("{name}{run}"), capture, &mut f)?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Loads pages `ids` and their stats and prints the grouped report.
    pub fn report(&self, ids: &[String], out: impl Write) -> ReportResult<()> {
        let mut pages = Vec::with_capacity(ids.len());
        let mut stats = Vec::with_capacity(ids.len());
        for id in ids {
            pages.push(self.store.load_page(id)?);
            stats.push(self.store.load_stat(id)?);
        }
        self.report_pages(pages, stats, out)
    }

    /// Prints already loaded pages. `stats` pairs up with `pages` by position;
    /// missing entries mean no stat.
    pub fn report_pages(
        &self,
        pages: Vec<Page>,
        stats: Vec<Option<StatSnapshot>>,
        out: impl Write,
    ) -> ReportResult<()> {
        let mut stats = stats.into_iter();
        let samples = pages
            .into_iter()
            .map(|page| Sample::new(page, stats.next().flatten()))
            .collect();
        let mut groups = group_samples(samples);
        let mut renderer = ReportRenderer::new(self.options.clone(), out)?;
        renderer.print_group(&mut groups)
    }

    /// Stored pages, optionally only those whose name matches `name_glob`.
    pub fn list(&self, name_glob: Option<&str>) -> ReportResult<Vec<PageSummary>> {
        let matcher = name_glob.map(compile_glob).transpose()?;
        let mut pages = self.store.list_pages()?;
        if let Some(matcher) = matcher {
            pages.retain(|page| matcher.is_match(&page.name));
        }
        Ok(pages)
    }

    /// Ids of stored pages whose name matches `name_glob`, oldest first.
    pub fn ids_matching(&self, name_glob: &str) -> ReportResult<Vec<String>> {
        Ok(self
            .list(Some(name_glob))?
            .into_iter()
            .map(|page| page.id)
            .collect())
    }
}

fn compile_glob(pattern: &str) -> ReportResult<GlobMatcher> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|e| ReportError::InvalidArgument(format!("invalid glob {pattern:?}: {e}")))
}

fn now_rfc3339() -> Option<String> {
    OffsetDateTime::now_utc().format(&Rfc3339).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;

    use crate::{MemoryPageStore, Node, QueryTiming, SpanRecorder};

    /// Allocation counter that grows by 100 objects per reading.
    #[derive(Default)]
    struct Ticking {
        readings: Cell<i64>,
    }

    impl StatSource for Ticking {
        fn capture(&self) -> ReportResult<StatSnapshot> {
            let n = self.readings.get() + 1;
            self.readings.set(n);
            Ok(StatSnapshot {
                total_allocated_objects: n * 100,
                ..StatSnapshot::default()
            })
        }
    }

    struct Unavailable;

    impl StatSource for Unavailable {
        fn capture(&self) -> ReportResult<StatSnapshot> {
            Err(ReportError::Stat("no counters".to_string()))
        }
    }

    fn engine() -> ReportEngine<MemoryPageStore, Ticking> {
        ReportEngine::new(MemoryPageStore::new(), Ticking::default(), RenderOptions::default())
    }

    #[test]
    fn unavailable_counters_fall_back_to_zero() {
        let engine = ReportEngine::new(MemoryPageStore::new(), Unavailable, RenderOptions::default());
        assert_eq!(engine.capture_stat(), StatSnapshot::default());
        let (value, stat) = engine.track("noop", || Ok::<_, ReportError>(5)).expect("track");
        assert_eq!(value, 5);
        assert_eq!(stat.stat, StatSnapshot::default());
    }

    #[test]
    fn track_reports_the_delta() {
        let engine = engine();
        let (_, stat) = engine.track("work", || Ok::<_, ReportError>(())).expect("track");
        assert_eq!(stat.name, "work");
        assert_eq!(stat.stat.total_allocated_objects, 100);
    }

    #[test]
    fn nested_tracks_are_named_after_their_parents() {
        let engine = engine();
        let ((inner, sibling), outer) = engine
            .track("outer", || {
                let (_, inner) = engine.track("inner", || Ok::<_, ReportError>(()))?;
                let (_, sibling) = engine.track("sibling", || Ok::<_, ReportError>(()))?;
                Ok::<_, ReportError>((inner, sibling))
            })
            .expect("track");
        assert_eq!(inner.name, "outer:inner");
        assert_eq!(sibling.name, "outer:sibling");
        assert_eq!(outer.name, "outer");

        let failed = engine.track("boom", || Err::<(), _>(ReportError::InvalidArgument("boom".into())));
        assert!(failed.is_err());
        let (_, after) = engine.track("after", || Ok::<_, ReportError>(())).expect("track");
        assert_eq!(after.name, "after");
    }

    #[test]
    fn failed_block_takes_no_closing_snapshot() {
        let engine = engine();
        let result = engine.track("boom", || Err::<(), _>(ReportError::InvalidArgument("boom".into())));
        assert!(result.is_err());
        assert_eq!(engine.stats.readings.get(), 1);
    }

    #[test]
    fn profile_run_saves_page_and_stat() {
        let mut engine = engine();
        let mut recorder = SpanRecorder::new();
        let (rows, id) = engine
            .profile_run("build-1", &mut recorder, |r| {
                r.record_query(QueryTiming::new("SELECT * FROM vms", 0.0, 2.0).with_rows(4))?;
                Ok::<_, ReportError>(4)
            })
            .expect("run");
        assert_eq!(rows, 4);

        let page = engine.store().load_page(&id).expect("page");
        assert_eq!(page.name, "build-1");
        assert_eq!(page.root.name, "build-1");
        assert_eq!(page.duration_ms_in_sql, 2.0);
        assert!(page.started_at.is_some());
        let stat = engine.store().load_stat(&id).expect("stat").expect("saved");
        assert_eq!(stat.total_allocated_objects, 100);
    }

    #[test]
    fn failed_run_is_not_saved() {
        let mut engine = engine();
        let mut recorder = SpanRecorder::new();
        let result = engine.profile_run("boom", &mut recorder, |_| {
            Err::<(), _>(ReportError::InvalidArgument("boom".into()))
        });
        assert!(result.is_err());
        assert!(engine.store().is_empty());
    }

    #[test]
    fn sample_runs_warm_up_then_number_runs() {
        let mut engine = engine();
        let mut recorder = SpanRecorder::new();
        let mut calls = 0;
        let ids = engine
            .sample_runs("build", 3, &mut recorder, |_| {
                calls += 1;
                Ok::<_, ReportError>(())
            })
            .expect("samples");
        assert_eq!(calls, 4);
        let names: Vec<String> = engine
            .list(None)
            .expect("list")
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["build1", "build2", "build3"]);
        assert_eq!(ids.len(), 3);

        let mut out = Vec::new();
        engine.report(&ids, &mut out).expect("report");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("`build1`"));
        assert!(text.contains("`avg`"));
    }

    #[test]
    fn list_filters_by_glob() {
        let mut engine = engine();
        let mut store_page = |name: &str| {
            engine
                .store
                .save_page(Page::new("", name, Node::new("request", 0.0, 1.0)))
                .expect("save")
        };
        store_page("build-1");
        store_page("build-2");
        store_page("deploy-1");

        assert_eq!(engine.ids_matching("build-*").expect("glob").len(), 2);
        assert_eq!(engine.list(Some("deploy-?")).expect("glob").len(), 1);
        assert!(matches!(
            engine.list(Some("[")),
            Err(ReportError::InvalidArgument(_))
        ));
    }

    #[test]
    fn report_pages_pairs_stats_by_position() {
        let mut engine = engine();
        engine.options_mut().display_stats = true;
        let pages = vec![
            Page::new("a", "run1", Node::new("request", 0.0, 1.0)),
            Page::new("b", "run2", Node::new("request", 0.0, 2.0)),
        ];
        let stat = StatSnapshot {
            total_allocated_objects: 4_321,
            ..StatSnapshot::default()
        };
        let mut out = Vec::new();
        engine
            .report_pages(pages, vec![Some(stat)], &mut out)
            .expect("report");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("4_321"));
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn missing_page_is_a_store_error() {
        let engine = engine();
        let err = engine.report(&["missing".to_string()], Vec::<u8>::new());
        assert!(matches!(err, Err(ReportError::Store(_))));
    }
}
