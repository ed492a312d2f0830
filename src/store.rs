//! Persistence of captured pages and their stat deltas.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{Page, ReportError, ReportResult, StatSnapshot};

/// Listing entry for a stored page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PageSummary {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    pub duration_ms: f64,
    pub duration_ms_in_sql: f64,
    /// Application queries, without cache hits, schema lookups and
    /// transaction control.
    #[serde(default)]
    pub queries: u64,
    #[serde(default)]
    pub other_hits: u64,
    /// Run time spent outside the database.
    #[serde(default)]
    pub code_ms: f64,
}

impl PageSummary {
    fn started_at_time(&self) -> Option<OffsetDateTime> {
        self.started_at
            .as_deref()
            .and_then(|stamp| OffsetDateTime::parse(stamp, &Rfc3339).ok())
    }
}

impl From<&Page> for PageSummary {
    fn from(page: &Page) -> Self {
        let tally = page.root.tally_queries();
        Self {
            id: page.id.clone(),
            name: page.name.clone(),
            started_at: page.started_at.clone(),
            duration_ms: page.duration_ms,
            duration_ms_in_sql: page.duration_ms_in_sql,
            queries: tally.queries,
            other_hits: tally.other_hits,
            code_ms: tally.code_ms(page.duration_ms),
        }
    }
}

pub trait PageStore {
    fn load_page(&self, id: &str) -> ReportResult<Page>;

    /// Stores `page` and returns its id. A page without id gets a fresh one.
    fn save_page(&mut self, page: Page) -> ReportResult<String>;

    /// Stored pages, oldest first.
    fn list_pages(&self) -> ReportResult<Vec<PageSummary>>;

    fn save_stat(&mut self, id: &str, stat: &StatSnapshot) -> ReportResult<()>;

    /// The stat delta saved with page `id`, if there is one.
    fn load_stat(&self, id: &str) -> ReportResult<Option<StatSnapshot>>;
}

pub fn new_page_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn assign_id(page: &mut Page) {
    if page.id.is_empty() {
        page.id = new_page_id();
    }
}

/// One pretty JSON file per page (`<id>.json`) and per stat delta
/// (`<id>.stat.json`) in a directory.
#[derive(Debug, Clone)]
pub struct FilePageStore {
    dir: PathBuf,
}

impl FilePageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn page_path(&self, id: &str) -> ReportResult<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{id}.json")))
    }

    fn stat_path(&self, id: &str) -> ReportResult<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{id}.stat.json")))
    }
}

impl PageStore for FilePageStore {
    fn load_page(&self, id: &str) -> ReportResult<Page> {
        let path = self.page_path(id)?;
        if !path.exists() {
            return Err(ReportError::Store(format!(
                "no page {id:?} in {}",
                self.dir.display()
            )));
        }
        let mut page: Page = read_json(&path)?;
        page.root.renumber_depths(0);
        Ok(page)
    }

    fn save_page(&mut self, mut page: Page) -> ReportResult<String> {
        assign_id(&mut page);
        let path = self.page_path(&page.id)?;
        write_json(&path, &page)?;
        tracing::debug!(id = %page.id, name = %page.name, "saved page");
        Ok(page.id)
    }

    fn list_pages(&self) -> ReportResult<Vec<PageSummary>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut pages = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.ends_with(".json") || file_name.ends_with(".stat.json") {
                continue;
            }
            match read_json::<Page>(&path) {
                Ok(page) => pages.push(PageSummary::from(&page)),
                Err(err) => tracing::warn!("skipping unreadable page {}: {err}", path.display()),
            }
        }
        // Ids are random; order by capture time, then name for pages without one.
        pages.sort_by(|a, b| {
            a.started_at_time()
                .cmp(&b.started_at_time())
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(pages)
    }

    fn save_stat(&mut self, id: &str, stat: &StatSnapshot) -> ReportResult<()> {
        write_json(&self.stat_path(id)?, stat)
    }

    fn load_stat(&self, id: &str) -> ReportResult<Option<StatSnapshot>> {
        let path = self.stat_path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }
}

/// Ids end up in file names.
fn validate_id(id: &str) -> ReportResult<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ReportError::InvalidArgument(format!("invalid page id {id:?}")))
    }
}

fn write_json(path: &Path, value: &impl Serialize) -> ReportResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> ReportResult<T> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|err| {
        ReportError::Store(format!("malformed {}: {err}", path.display()))
    })
}

/// Keeps pages in insertion order in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryPageStore {
    pages: Vec<Page>,
    stats: BTreeMap<String, StatSnapshot>,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl PageStore for MemoryPageStore {
    fn load_page(&self, id: &str) -> ReportResult<Page> {
        self.pages
            .iter()
            .find(|page| page.id == id)
            .cloned()
            .ok_or_else(|| ReportError::Store(format!("no page {id:?}")))
    }

    fn save_page(&mut self, mut page: Page) -> ReportResult<String> {
        assign_id(&mut page);
        let id = page.id.clone();
        match self.pages.iter_mut().find(|p| p.id == id) {
            Some(existing) => *existing = page,
            None => self.pages.push(page),
        }
        Ok(id)
    }

    fn list_pages(&self) -> ReportResult<Vec<PageSummary>> {
        Ok(self.pages.iter().map(PageSummary::from).collect())
    }

    fn save_stat(&mut self, id: &str, stat: &StatSnapshot) -> ReportResult<()> {
        self.stats.insert(id.to_string(), *stat);
        Ok(())
    }

    fn load_stat(&self, id: &str) -> ReportResult<Option<StatSnapshot>> {
        Ok(self.stats.get(id).copied())
    }
}
