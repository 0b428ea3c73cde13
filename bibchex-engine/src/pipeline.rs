//! One complete checking run
//!
//! DOI discovery, retrieval from every source, consistency checks and
//! problem filtering, in that order. Each stage is announced on the event
//! bus as a phase.

use crate::checks::CheckRegistry;
use crate::engine::ConsistencyEngine;
use crate::error::RunError;
use crate::options::CheckOptions;
use crate::orchestrator::{RetrievalFailure, RetrievalOrchestrator, RetrievalOutcome};
use crate::progress::ProgressTracker;
use crate::sources::{self, http, DoiResolver, SourceAdapter};
use crate::types::{Entry, Problem, Suggestion};
use crate::worker_pool::WorkerPool;
use bibchex_common::config::TomlConfig;
use bibchex_common::events::MessageLevel;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub const PHASE_DOI_DISCOVERY: &str = "DoiDiscovery";
pub const PHASE_RETRIEVAL: &str = "Retrieval";
pub const PHASE_CHECKS: &str = "ConsistencyChecks";

/// Everything a run produces
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckReport {
    pub suggestions: Vec<Suggestion>,
    pub retrieval_errors: Vec<RetrievalFailure>,
    pub problems: Vec<Problem>,
    pub global_problems: Vec<Problem>,
}

impl CheckReport {
    /// One-line summary for logs
    pub fn display_string(&self) -> String {
        format!(
            "{} problems, {} global problems, {} suggestions, {} retrieval errors",
            self.problems.len(),
            self.global_problems.len(),
            self.suggestions.len(),
            self.retrieval_errors.len()
        )
    }
}

/// Run pipeline
pub struct Checker {
    engine: ConsistencyEngine,
    options: Arc<CheckOptions>,
    orchestrator: RetrievalOrchestrator,
    progress: ProgressTracker,
    pool: WorkerPool,
    http: reqwest::Client,
    sources: Vec<Arc<dyn SourceAdapter>>,
    resolver: Option<Arc<dyn DoiResolver>>,
}

impl Checker {
    /// Offline checker with the given checks; add sources with [`Checker::with_sources`]
    pub fn new(
        registry: CheckRegistry,
        options: Arc<CheckOptions>,
        pool: WorkerPool,
        http: reqwest::Client,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            engine: ConsistencyEngine::new(registry),
            options,
            orchestrator: RetrievalOrchestrator::new(crate::orchestrator::DEFAULT_MAX_IN_FLIGHT, progress.clone()),
            progress,
            pool,
            http,
            sources: Vec::new(),
            resolver: None,
        }
    }

    /// Checker with the built-in checks and, unless `offline`, the configured sources
    pub fn from_config(config: &TomlConfig, offline: bool, progress: ProgressTracker) -> Result<Self, RunError> {
        config.validate()?;
        let options = Arc::new(CheckOptions::from_table(&config.checks)?);
        let pool = WorkerPool::with_available_parallelism().map_err(|e| RunError::Setup(e.to_string()))?;
        let http = http::build_client(config.retrieval.mailto.as_deref()).map_err(|e| RunError::Setup(e.to_string()))?;

        let checker = Self::new(CheckRegistry::with_defaults(), Arc::clone(&options), pool, http, progress)
            .with_max_in_flight(config.retrieval.max_in_flight);

        if offline {
            info!("Offline mode: skipping DOI discovery and retrieval");
            return Ok(checker);
        }

        let (sources, crossref) = sources::build_sources(config, options)?;
        let resolver: Arc<dyn DoiResolver> = crossref;
        Ok(checker.with_sources(sources, Some(resolver)))
    }

    /// Cap on concurrently running retrieval tasks
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.orchestrator = RetrievalOrchestrator::new(max_in_flight, self.progress.clone());
        self
    }

    pub fn with_sources(mut self, sources: Vec<Arc<dyn SourceAdapter>>, resolver: Option<Arc<dyn DoiResolver>>) -> Self {
        self.sources = sources;
        self.resolver = resolver;
        self
    }

    pub fn engine(&self) -> &ConsistencyEngine {
        &self.engine
    }

    /// Check a document
    pub async fn run(&self, entries: Vec<Entry>) -> Result<CheckReport, RunError> {
        let started = Instant::now();

        let mut keys = BTreeSet::new();
        for entry in &entries {
            if !keys.insert(entry.id()) {
                return Err(RunError::DuplicateEntry(entry.id().to_string()));
            }
        }

        let mut entries: Vec<Arc<Entry>> = entries.into_iter().map(Arc::new).collect();
        let mut report = CheckReport::default();

        if let Some(resolver) = &self.resolver {
            self.progress.phase_started(PHASE_DOI_DISCOVERY);
            let discovery = self.orchestrator.find_dois(&entries, Arc::clone(resolver)).await;
            entries = discovery.entries;
            report.retrieval_errors.extend(discovery.errors);
            self.progress.phase_completed(PHASE_DOI_DISCOVERY);
        }

        if !self.sources.is_empty() {
            self.progress.phase_started(PHASE_RETRIEVAL);
            let results = self.orchestrator.retrieve_all(&entries, &self.sources).await;
            let outcome = RetrievalOutcome::flatten(results);
            report.suggestions = outcome.suggestions;
            report.retrieval_errors.extend(outcome.errors);
            self.progress.phase_completed(PHASE_RETRIEVAL);
        }

        for failure in &report.retrieval_errors {
            warn!(entry = %failure.entry_id, source = %failure.source, error = %failure.message, "Retrieval failed");
        }

        self.progress.phase_started(PHASE_CHECKS);
        let ctx = self
            .engine
            .context(Arc::clone(&self.options), self.pool.clone(), self.http.clone());
        let results = match self.engine.run(&entries, &ctx).await {
            Ok(results) => results,
            Err(e) => {
                self.progress
                    .message(PHASE_CHECKS, MessageLevel::Error, e.to_string());
                return Err(e.into());
            }
        };
        self.progress.phase_completed(PHASE_CHECKS);

        let before = results.problems.len();
        report.problems = results
            .problems
            .into_iter()
            .filter(|p| !Self::ignored(&entries, p))
            .collect();
        report.global_problems = results.global_problems;

        info!(
            entries = entries.len(),
            ignored = before - report.problems.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run complete: {}",
            report.display_string()
        );

        Ok(report)
    }

    /// Whether the problem's entry opted out of its kind
    fn ignored(entries: &[Arc<Entry>], problem: &Problem) -> bool {
        let Some(id) = problem.entry_id.as_deref() else {
            return false;
        };
        entries
            .iter()
            .find(|e| e.id() == id)
            .is_some_and(|e| e.ignores_problem(&problem.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::basic;
    use crate::error::RetrievalError;
    use crate::sources::Retrieval;
    use async_trait::async_trait;
    use bibchex_common::events::{EventBus, ProgressEvent};

    fn offline(registry: CheckRegistry, progress: ProgressTracker) -> Checker {
        Checker::new(
            registry,
            Arc::new(CheckOptions::default()),
            WorkerPool::new(1).unwrap(),
            reqwest::Client::new(),
            progress,
        )
    }

    struct TitleSource;

    #[async_trait]
    impl SourceAdapter for TitleSource {
        fn name(&self) -> &'static str {
            "titles"
        }

        fn subtask(&self) -> &'static str {
            "TitleQuery"
        }

        async fn query(&self, entry: &Entry) -> Retrieval {
            if entry.id() == "broken" {
                return Retrieval::failed(RetrievalError::Provider("HTTP status 500".into()));
            }
            let mut suggestion = Suggestion::new(self.name(), entry);
            suggestion.add_field("title", format!("Title of {}", entry.id()));
            Retrieval::found(suggestion)
        }
    }

    struct FixedResolver;

    #[async_trait]
    impl DoiResolver for FixedResolver {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn subtask(&self) -> &'static str {
            "FixedDOI"
        }

        async fn resolve_doi(&self, entry: &Entry) -> Result<Option<String>, RetrievalError> {
            Ok(Some(format!("10.1000/{}", entry.id())))
        }
    }

    #[tokio::test]
    async fn test_duplicate_keys_rejected() {
        let checker = offline(CheckRegistry::with_defaults(), ProgressTracker::detached());
        let entries = vec![Entry::builder("a").build(), Entry::builder("a").build()];
        assert!(matches!(
            checker.run(entries).await,
            Err(RunError::DuplicateEntry(key)) if key == "a"
        ));
    }

    #[tokio::test]
    async fn test_ignore_problems_option() {
        let mut registry = CheckRegistry::new();
        registry.register(Arc::new(basic::Doi)).unwrap();
        let checker = offline(registry, ProgressTracker::detached());

        let entries = vec![
            Entry::builder("a").build(),
            Entry::builder("b").field("bibchex-ignore-problems", "doi").build(),
        ];
        let report = checker.run(entries).await.unwrap();

        assert_eq!(report.problems.len(), 1);
        assert_eq!(report.problems[0].entry_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_discovered_doi_reaches_checks() {
        let mut registry = CheckRegistry::new();
        registry.register(Arc::new(basic::Doi)).unwrap();
        let checker = offline(registry, ProgressTracker::detached())
            .with_sources(vec![Arc::new(TitleSource)], Some(Arc::new(FixedResolver)));

        let entries = vec![Entry::builder("x").build(), Entry::builder("broken").build()];
        let report = checker.run(entries).await.unwrap();

        assert_eq!(report.problems[0].details, "Suggested DOIs: [\"10.1000/x\"]");
        assert_eq!(report.suggestions.len(), 1);
        assert_eq!(report.suggestions[0].first("title"), Some("Title of x"));
        assert_eq!(report.retrieval_errors.len(), 1);
        assert_eq!(report.retrieval_errors[0].entry_id, "broken");
        assert_eq!(report.retrieval_errors[0].message, "Provider error: HTTP status 500");
    }

    #[tokio::test]
    async fn test_phases_announced() {
        let bus = EventBus::new(256);
        let mut rx = bus.subscribe();
        let checker = offline(CheckRegistry::new(), ProgressTracker::new(bus))
            .with_sources(vec![Arc::new(TitleSource)], None);

        checker.run(vec![Entry::builder("a").build()]).await.unwrap();

        let mut phases = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::PhaseStarted { phase, .. } = event {
                phases.push(phase);
            }
        }
        assert_eq!(phases, vec![PHASE_RETRIEVAL, PHASE_CHECKS]);
    }

    #[tokio::test]
    async fn test_report_serializes() {
        let checker = offline(CheckRegistry::with_defaults(), ProgressTracker::detached());
        let report = checker
            .run(vec![Entry::builder("a").field("date", "May 2019").build()])
            .await
            .unwrap();

        let json = serde_json::to_value(&report).unwrap();
        let problems = json["problems"].as_array().unwrap();
        assert!(problems.iter().any(|p| p["source"] == "date_parseable" && p["entry_id"] == "a"));
        assert!(json["global_problems"].as_array().unwrap().is_empty());
    }
}
