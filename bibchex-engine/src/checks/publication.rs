//! Journal, publisher and date checks
//!
//! Includes the two document-wide reducer families:
//! - [`FuzzySimilarity`]: two observed names score above `similarity_threshold`
//! - [`MutualAbbrev`]: one observed name looks like an abbreviation of another
//!
//! Both compare every pair of observed names. Pairs are split into chunks by
//! the [`PairwisePartitioner`] and evaluated on the run's worker pool; output
//! is in pair order, so it does not depend on the chunk count.

use super::{Capability, CheckPlugin, RunContext};
use crate::error::CheckError;
use crate::partition::{chunk_count, PairwisePartitioner};
use crate::types::{Entry, Finding, PartialDate};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use tracing::debug;

const REDUCER: &[Capability] = &[
    Capability::PerEntry,
    Capability::Resettable,
    Capability::GlobalReducer,
];

const JOURNAL_FIELDS: &[&str] = &["booktitle", "journal"];
const PUBLISHER_FIELDS: &[&str] = &["organization", "publisher"];

/// Word is abbreviated: contains a dot or is mostly capitals
pub fn is_abbreviation(word: &str) -> bool {
    if word.contains('.') {
        return true;
    }
    let upper = word.chars().filter(|c| c.is_uppercase()).count();
    let lower = word.chars().filter(|c| c.is_lowercase()).count();
    upper > lower
}

pub fn contains_abbreviation(s: &str) -> bool {
    s.split_whitespace().any(is_abbreviation)
}

/// Journal or booktitle contains an abbreviated word
pub struct JournalAbbrev;

#[async_trait]
impl CheckPlugin for JournalAbbrev {
    fn name(&self) -> &'static str {
        "journal_abbrev"
    }

    fn enabled_by_default(&self) -> bool {
        false
    }

    async fn check(&self, entry: &Entry, _ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        Ok(JOURNAL_FIELDS
            .iter()
            .filter_map(|f| entry.field(f))
            .filter(|v| contains_abbreviation(v))
            .map(|v| {
                Finding::new(
                    "abbreviated_journal",
                    format!("Publication title '{v}' seems to contain an abbreviation"),
                )
            })
            .collect())
    }
}

/// Publisher given where an organization is preferred
pub struct PreferOrganization;

#[async_trait]
impl CheckPlugin for PreferOrganization {
    fn name(&self) -> &'static str {
        "prefer_organization"
    }

    async fn check(&self, entry: &Entry, _ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        if entry.non_empty_field("publisher").is_some() && entry.non_empty_field("organization").is_none() {
            return Ok(vec![Finding::new(
                self.name(),
                "Entry should prefer organization over publisher.",
            )]);
        }
        Ok(Vec::new())
    }
}

/// `day`/`month` (or, unless `prefer_date_or_year`, `year`) used instead of `date`
pub struct PreferDate;

#[async_trait]
impl CheckPlugin for PreferDate {
    fn name(&self) -> &'static str {
        "prefer_date"
    }

    async fn check(&self, entry: &Entry, ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        if entry.has_field("date") {
            return Ok(Vec::new());
        }

        let present = |keys: &[&str]| keys.iter().any(|k| entry.non_empty_field(k).is_some());
        let year_ok = ctx.options().get_bool("prefer_date_or_year", Some(entry), true)?;

        if present(&["month", "day"]) || (!year_ok && present(&["year"])) {
            return Ok(vec![Finding::new(
                self.name(),
                "The 'date' field is preferred over the 'day/month/year' fields.",
            )]);
        }
        Ok(Vec::new())
    }
}

/// `date` is not `Y`, `Y-M` or `Y-M-D`
pub struct DateParseable;

#[async_trait]
impl CheckPlugin for DateParseable {
    fn name(&self) -> &'static str {
        "date_parseable"
    }

    async fn check(&self, entry: &Entry, _ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        let Some(date) = entry.non_empty_field("date") else {
            return Ok(Vec::new());
        };
        if PartialDate::parse(date).is_some() {
            return Ok(Vec::new());
        }
        Ok(vec![Finding::new(self.name(), "Unparseable date")
            .with_details(format!("The date string '{date}' could not be parsed."))])
    }
}

/// Record the entry's values of `fields` in the plugin's accumulator
async fn observe(plugin: &str, fields: &[&str], entry: &Entry, ctx: &RunContext) -> Result<(), CheckError> {
    let accumulator = ctx.accumulator(plugin)?;
    for value in fields.iter().filter_map(|f| entry.non_empty_field(f)) {
        accumulator.insert(value).await;
    }
    Ok(())
}

/// Evaluate `compare` for every pair of `names` on the worker pool
///
/// Results are concatenated in pair position order.
async fn reduce_pairs<T, F>(
    ctx: &RunContext,
    plugin: &'static str,
    names: usize,
    compare: F,
) -> Result<Vec<T>, CheckError>
where
    T: Send + 'static,
    F: Fn(usize, usize) -> Vec<T> + Send + Sync + 'static,
{
    let chunks = ctx.chunk_count().unwrap_or_else(|| chunk_count(names));
    let partitioner = PairwisePartitioner::new(names, chunks);
    debug!(plugin, names, pairs = partitioner.total_pairs(), chunks, "Comparing pairs");

    let results = ctx
        .pool()
        .run_chunks(partitioner.chunk_count(), move |i| {
            partitioner
                .chunk(i)
                .flat_map(|(a, b)| compare(a, b))
                .collect::<Vec<T>>()
        })
        .await
        .map_err(|e| CheckError::plugin(plugin, format!("comparison worker failed: {e}")))?;

    Ok(results.into_iter().flatten().collect())
}

/// Fuzzy-similar journal or publisher names across the document
pub struct FuzzySimilarity {
    name: &'static str,
    label: &'static str,
    fields: &'static [&'static str],
}

impl FuzzySimilarity {
    pub fn journal() -> Self {
        Self {
            name: "journal_similarity",
            label: "Journal",
            fields: JOURNAL_FIELDS,
        }
    }

    pub fn publisher() -> Self {
        Self {
            name: "publisher_similarity",
            label: "Publisher",
            fields: PUBLISHER_FIELDS,
        }
    }
}

#[async_trait]
impl CheckPlugin for FuzzySimilarity {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capabilities(&self) -> &'static [Capability] {
        REDUCER
    }

    async fn check(&self, entry: &Entry, ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        observe(self.name, self.fields, entry, ctx).await?;
        Ok(Vec::new())
    }

    async fn complete(&self, ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        let threshold = ctx.options().get_f64("similarity_threshold", None, 95.0)?;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(CheckError::config(format!(
                "similarity_threshold must be between 0 and 100, got {threshold}"
            )));
        }

        let names = Arc::new(ctx.accumulator(self.name)?.snapshot().await);
        let similarity = ctx.similarity();
        let shared = Arc::clone(&names);

        let pairs = reduce_pairs(ctx, self.name, names.len(), move |a, b| {
            if similarity.score(&shared[a], &shared[b]) > threshold {
                vec![(a, b)]
            } else {
                Vec::new()
            }
        })
        .await?;

        Ok(pairs
            .into_iter()
            .map(|(a, b)| {
                Finding::new(
                    self.name,
                    format!(
                        "{} names '{}' and '{}' seem very similar.",
                        self.label, names[a], names[b]
                    ),
                )
            })
            .collect())
    }
}

/// Tokens of a name: split at spaces, dots, commas and camel-case humps
fn abbreviation_tokens(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for part in s.split([' ', '.', ',']).filter(|p| !p.is_empty()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for c in part.chars() {
            if c.is_uppercase() && prev_lower {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = c.is_lowercase();
            current.push(c);
        }
        if !current.is_empty() {
            tokens.push(current);
        }
    }
    tokens
}

/// Case-insensitive pattern matching any string that contains the tokens of
/// `s` in order
pub fn abbreviation_pattern(s: &str) -> Option<Regex> {
    let tokens = abbreviation_tokens(s);
    if tokens.is_empty() {
        return None;
    }
    let pattern = tokens.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join(".*");
    RegexBuilder::new(&pattern).case_insensitive(true).build().ok()
}

/// Whether `short` could abbreviate `long`
fn abbreviates(pattern: Option<&Regex>, short: &str, long: &str) -> bool {
    !short.eq_ignore_ascii_case(long) && pattern.is_some_and(|p| p.is_match(long))
}

/// Journal or publisher names that abbreviate one another
pub struct MutualAbbrev {
    name: &'static str,
    label: &'static str,
    fields: &'static [&'static str],
}

impl MutualAbbrev {
    pub fn journal() -> Self {
        Self {
            name: "journal_mutual_abbrev",
            label: "Journal",
            fields: JOURNAL_FIELDS,
        }
    }

    pub fn publisher() -> Self {
        Self {
            name: "publisher_mutual_abbrev",
            label: "Publisher",
            fields: PUBLISHER_FIELDS,
        }
    }
}

#[async_trait]
impl CheckPlugin for MutualAbbrev {
    fn name(&self) -> &'static str {
        self.name
    }

    fn capabilities(&self) -> &'static [Capability] {
        REDUCER
    }

    async fn check(&self, entry: &Entry, ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        observe(self.name, self.fields, entry, ctx).await?;
        Ok(Vec::new())
    }

    async fn complete(&self, ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        let names = Arc::new(ctx.accumulator(self.name)?.snapshot().await);
        let patterns: Arc<Vec<Option<Regex>>> = Arc::new(names.iter().map(|n| abbreviation_pattern(n)).collect());
        let shared = Arc::clone(&names);

        // (short, long) index pairs, both directions of each unordered pair
        let found = reduce_pairs(ctx, self.name, names.len(), move |a, b| {
            let mut out = Vec::new();
            if abbreviates(patterns[a].as_ref(), &shared[a], &shared[b]) {
                out.push((a, b));
            }
            if abbreviates(patterns[b].as_ref(), &shared[b], &shared[a]) {
                out.push((b, a));
            }
            out
        })
        .await?;

        Ok(found
            .into_iter()
            .map(|(short, long)| {
                Finding::new(
                    self.name,
                    format!(
                        "{} '{}' could be an abbreviation of '{}'.",
                        self.label, names[short], names[long]
                    ),
                )
            })
            .collect())
    }
}
