//! CLI report commands (`spanreport report ...`).

use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};

use crate::{
    AllocationCounters, Config, FilePageStore, PageSummary, RenderOptions, ReportEngine,
    ReportError, ReportResult,
};

const PAGE_SELECTOR_HELP: &str = "Stored page ids. Combine with --name to add pages by name.";

#[derive(Debug, Subcommand)]
pub enum ReportCommand {
    /// Print the grouped timing table for stored pages.
    Show {
        #[arg(value_name = "ID", help = PAGE_SELECTOR_HELP)]
        ids: Vec<String>,
        /// Also report every stored page whose name matches this glob.
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        render: RenderArgs,
    },
    /// List stored pages.
    List {
        #[arg(long)]
        name: Option<String>,
    },
}

/// Command line overrides of the `[render]` config table. A flag only ever
/// turns an option on.
#[derive(Debug, Clone, Default, Args)]
pub struct RenderArgs {
    /// Show each row's start offset.
    #[arg(long)]
    pub offset: bool,
    /// Show query rows under each span.
    #[arg(long)]
    pub sql: bool,
    /// Show the span tree, not only the page totals.
    #[arg(long)]
    pub children: bool,
    #[arg(long)]
    pub trivial: bool,
    #[arg(long)]
    pub trace: bool,
    /// Include queries answered from a cache.
    #[arg(long)]
    pub cache: bool,
    /// Show memory and object columns.
    #[arg(long)]
    pub stats: bool,
    /// Span name patterns to flatten, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub collapse: Vec<String>,
    #[arg(long)]
    pub dedup: bool,
    /// Dedup by summarized statement; implies --sql.
    #[arg(long)]
    pub aggressive_dedup: bool,
    #[arg(long)]
    pub shorten: bool,
    /// Leave the first run of each group out of its average.
    #[arg(long)]
    pub skip_first: bool,
    #[arg(long)]
    pub width: Option<usize>,
}

impl RenderArgs {
    pub fn apply(&self, options: &mut RenderOptions) {
        options.display_offset |= self.offset;
        options.display_sql |= self.sql;
        options.display_children |= self.children;
        options.display_trivial |= self.trivial;
        options.display_trace |= self.trace;
        options.display_cache |= self.cache;
        options.display_stats |= self.stats;
        options.dedup |= self.dedup;
        options.aggressive_dedup |= self.aggressive_dedup;
        options.shorten |= self.shorten;
        options.skip_first |= self.skip_first;
        if !self.collapse.is_empty() {
            options.collapse = self.collapse.clone();
        }
        if self.width.is_some() {
            options.width = self.width;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ReportOutput {
    Table(String),
    Pages(Vec<PageSummary>),
}

pub fn report_command(config: &Config, command: &ReportCommand) -> ReportResult<ReportOutput> {
    let store = FilePageStore::new(config.pages_dir());
    let stats = AllocationCounters::new(config.collect_mem_size);

    match command {
        ReportCommand::Show { ids, name, render } => {
            let mut options = config.render.clone();
            render.apply(&mut options);
            let engine = ReportEngine::new(store, stats, options);

            let mut selected = ids.clone();
            if let Some(pattern) = name {
                selected.extend(engine.ids_matching(pattern)?);
            }
            if selected.is_empty() {
                return Err(ReportError::InvalidArgument(
                    "report show needs page ids or a --name pattern matching stored pages"
                        .to_string(),
                ));
            }

            let mut out = Vec::new();
            engine.report(&selected, &mut out)?;
            let table = String::from_utf8(out)
                .map_err(|e| ReportError::Store(format!("report is not utf-8: {e}")))?;
            Ok(ReportOutput::Table(table))
        }

        ReportCommand::List { name } => {
            let engine = ReportEngine::new(store, stats, config.render.clone());
            Ok(ReportOutput::Pages(engine.list(name.as_deref())?))
        }
    }
}
