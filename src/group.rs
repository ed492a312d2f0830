//! Grouping repeated runs of the same work.

use indexmap::IndexMap;

use crate::{Page, StatSnapshot};

/// A captured page together with the memory delta of its run, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub page: Page,
    pub stat: Option<StatSnapshot>,
}

impl Sample {
    pub fn new(page: Page, stat: Option<StatSnapshot>) -> Self {
        Self { page, stat }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// Name prefix left after stripping a trailing run index.
    Runs(String),
    /// A name without run index; only identical names share the group.
    Name(String),
}

impl GroupKey {
    pub fn for_name(name: &str) -> Self {
        let prefix = name.trim_end_matches(|c: char| c.is_ascii_digit());
        if prefix.len() == name.len() {
            Self::Name(name.to_string())
        } else {
            Self::Runs(prefix.to_string())
        }
    }

    pub fn run_prefix(&self) -> Option<&str> {
        match self {
            Self::Runs(prefix) => Some(prefix),
            Self::Name(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageGroup {
    pub key: GroupKey,
    pub samples: Vec<Sample>,
}

impl PageGroup {
    /// Banner text: the name of the first run.
    pub fn title(&self) -> &str {
        self.samples
            .first()
            .map_or("", |sample| sample.page.name.as_str())
    }

    /// Samples that go into the average line.
    pub fn averaged(&self, skip_first: bool) -> &[Sample] {
        if skip_first {
            self.samples.get(1..).unwrap_or_default()
        } else {
            &self.samples
        }
    }
}

/// Splits samples by [`GroupKey`]. Groups appear in order of their first run;
/// runs keep their order within a group.
pub fn group_samples(samples: Vec<Sample>) -> Vec<PageGroup> {
    let mut groups: IndexMap<GroupKey, Vec<Sample>> = IndexMap::new();
    for sample in samples {
        groups
            .entry(GroupKey::for_name(&sample.page.name))
            .or_default()
            .push(sample);
    }
    groups
        .into_iter()
        .map(|(key, samples)| PageGroup { key, samples })
        .collect()
}

/// Groups pages that come without stat deltas.
pub fn group_pages(pages: Vec<Page>) -> Vec<PageGroup> {
    group_samples(pages.into_iter().map(|page| Sample::new(page, None)).collect())
}

/// Arithmetic mean; 0 for no values.
pub fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}
