//! Consistency check plugins
//!
//! Each plugin declares what it can do through [`Capability`] tags:
//! - **PerEntry**: `check(entry)` reports problems of a single entry
//! - **Resettable**: `reset()` clears the plugin's accumulator before a run
//! - **GlobalReducer**: `complete()` reports document-wide problems from the
//!   accumulated state
//!
//! # Built-in checks (registration order)
//! 1. **authors**: `author_names_lastinitial`, `author_names_allcaps`,
//!    `author_names_firstinitial`, `author_names_middleinitial`
//! 2. **basic**: `doi`, `doi_url`, `dead_url`, `required_fields`
//! 3. **title**: `title_capitalization`
//! 4. **authors**: `author_initial_dotted`
//! 5. **publication**: `journal_abbrev` (off by default), `prefer_organization`
//! 6. **basic**: `forbidden_fields`
//! 7. **publication**: `prefer_date`, `date_parseable`, the mutual
//!    abbreviation reducers and the similarity reducers
//!
//! Every plugin can be switched off per entry with `check_<name> = false`.

pub mod authors;
pub mod basic;
pub mod publication;
pub mod title;

use crate::error::CheckError;
use crate::options::CheckOptions;
use crate::similarity::{PartialRatio, Similarity};
use crate::types::{Entry, Finding};
use crate::worker_pool::WorkerPool;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What a plugin takes part in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    PerEntry,
    Resettable,
    GlobalReducer,
}

/// Consistency check contract
///
/// Plugins are shared between concurrent `check` calls and hold no per-run
/// state of their own; accumulated state lives in the [`RunContext`].
#[async_trait]
pub trait CheckPlugin: Send + Sync {
    /// Plugin name; also the `check_<name>` enablement option
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::PerEntry]
    }

    /// Enablement when no option says otherwise
    fn enabled_by_default(&self) -> bool {
        true
    }

    fn has(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Check one entry
    async fn check(&self, _entry: &Entry, _ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        Ok(Vec::new())
    }

    /// Clear accumulated state; must be idempotent
    async fn reset(&self, ctx: &RunContext) -> Result<(), CheckError> {
        ctx.accumulator(self.name())?.clear().await;
        Ok(())
    }

    /// Produce document-wide findings from accumulated state
    async fn complete(&self, _ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        Ok(Vec::new())
    }
}

/// Set of strings observed during one run
///
/// Ordered, so that pair enumeration over it is stable.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    seen: Arc<Mutex<BTreeSet<String>>>,
}

impl Accumulator {
    pub async fn insert(&self, value: impl Into<String>) {
        self.seen.lock().await.insert(value.into());
    }

    pub async fn clear(&self) {
        self.seen.lock().await.clear();
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.seen.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Everything a plugin may consult during one run
pub struct RunContext {
    options: Arc<CheckOptions>,
    similarity: Arc<dyn Similarity>,
    pool: WorkerPool,
    http: reqwest::Client,
    accumulators: BTreeMap<&'static str, Accumulator>,
    chunk_count: Option<usize>,
}

impl RunContext {
    /// Context with one accumulator slot per stateful plugin of the registry
    pub fn new(registry: &CheckRegistry, options: Arc<CheckOptions>, pool: WorkerPool, http: reqwest::Client) -> Self {
        let accumulators = registry
            .plugins()
            .iter()
            .filter(|p| p.has(Capability::Resettable) || p.has(Capability::GlobalReducer))
            .map(|p| (p.name(), Accumulator::default()))
            .collect();

        Self {
            options,
            similarity: Arc::new(PartialRatio),
            pool,
            http,
            accumulators,
            chunk_count: None,
        }
    }

    pub fn with_similarity(mut self, similarity: Arc<dyn Similarity>) -> Self {
        self.similarity = similarity;
        self
    }

    /// Fix the number of comparison chunks instead of deriving it
    pub fn with_chunk_count(mut self, chunks: usize) -> Self {
        self.chunk_count = Some(chunks.max(1));
        self
    }

    pub fn options(&self) -> &CheckOptions {
        &self.options
    }

    pub fn similarity(&self) -> Arc<dyn Similarity> {
        Arc::clone(&self.similarity)
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn chunk_count(&self) -> Option<usize> {
        self.chunk_count
    }

    /// Accumulator slot of a plugin
    pub fn accumulator(&self, plugin: &str) -> Result<&Accumulator, CheckError> {
        self.accumulators
            .get(plugin)
            .ok_or_else(|| CheckError::plugin(plugin, "no accumulator slot in this run"))
    }
}

/// Ordered plugin registry
#[derive(Default, Clone)]
pub struct CheckRegistry {
    plugins: Vec<Arc<dyn CheckPlugin>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all built-in checks
    pub fn with_defaults() -> Self {
        let plugins: Vec<Arc<dyn CheckPlugin>> = vec![
            Arc::new(authors::LastNameInitial),
            Arc::new(authors::AllcapsName),
            Arc::new(authors::FirstNameInitial),
            Arc::new(authors::MiddleNameInitial),
            Arc::new(basic::Doi),
            Arc::new(basic::DoiUrl),
            Arc::new(basic::DeadUrl),
            Arc::new(basic::RequiredFields),
            Arc::new(title::TitleCapitalization),
            Arc::new(authors::InitialDotted),
            Arc::new(publication::JournalAbbrev),
            Arc::new(publication::PreferOrganization),
            Arc::new(basic::ForbiddenFields),
            Arc::new(publication::PreferDate),
            Arc::new(publication::DateParseable),
            Arc::new(publication::MutualAbbrev::journal()),
            Arc::new(publication::MutualAbbrev::publisher()),
            Arc::new(publication::FuzzySimilarity::journal()),
            Arc::new(publication::FuzzySimilarity::publisher()),
        ];
        Self { plugins }
    }

    /// Append a plugin; names must be unique
    pub fn register(&mut self, plugin: Arc<dyn CheckPlugin>) -> Result<(), CheckError> {
        if self.get(plugin.name()).is_some() {
            return Err(CheckError::config(format!(
                "check '{}' registered twice",
                plugin.name()
            )));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn plugins(&self) -> &[Arc<dyn CheckPlugin>] {
        &self.plugins
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CheckPlugin>> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Whether `plugin` runs for `entry` (`check_<name>` option)
    pub fn is_enabled(
        &self,
        plugin: &dyn CheckPlugin,
        entry: &Entry,
        options: &CheckOptions,
    ) -> Result<bool, CheckError> {
        options.get_bool(
            &format!("check_{}", plugin.name()),
            Some(entry),
            plugin.enabled_by_default(),
        )
    }
}
