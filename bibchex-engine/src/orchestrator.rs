//! Retrieval fan-out across sources and entries
//!
//! One task per (source, entry) pair, spawned onto the runtime so that a
//! panicking adapter only loses its own result. Results are correlated by
//! position: result `i` belongs to task `i` in source-major order, whatever
//! order the tasks complete in.
//!
//! The in-flight cap applies per source. A task sleeping on its source's
//! rate limiter or retry delay only holds a slot of that source, so a
//! throttled provider never starves the others.

use crate::error::RetrievalError;
use crate::progress::ProgressTracker;
use crate::sources::{DoiResolver, Retrieval, SourceAdapter};
use crate::types::{Entry, Suggestion};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Default cap on concurrently running tasks of one source
pub const DEFAULT_MAX_IN_FLIGHT: usize = 128;

/// Result of one (entry, source) task
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub entry_id: String,
    pub source: String,
    pub retrieval: Retrieval,
}

/// A retrieval error with its provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalFailure {
    pub entry_id: String,
    pub source: String,
    pub error: RetrievalError,
    pub message: String,
}

impl RetrievalFailure {
    pub fn new(entry_id: &str, source: &str, error: RetrievalError) -> Self {
        Self {
            entry_id: entry_id.to_string(),
            source: source.to_string(),
            message: error.to_string(),
            error,
        }
    }
}

/// Flattened view of a fan-out round
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalOutcome {
    /// All suggestions, in task order
    pub suggestions: Vec<Suggestion>,
    /// All errors, in task order
    pub errors: Vec<RetrievalFailure>,
}

impl RetrievalOutcome {
    pub fn flatten(results: Vec<RetrievalResult>) -> Self {
        let mut outcome = Self::default();
        for result in results {
            outcome.suggestions.extend(result.retrieval.suggestions);
            if let Some(error) = result.retrieval.error {
                outcome
                    .errors
                    .push(RetrievalFailure::new(&result.entry_id, &result.source, error));
            }
        }
        outcome
    }
}

/// Entries after DOI discovery
#[derive(Debug, Clone, Default)]
pub struct DoiDiscovery {
    /// Same order as the input; entries with found DOIs are enriched copies
    pub entries: Vec<Arc<Entry>>,
    pub errors: Vec<RetrievalFailure>,
}

/// Schedules retrieval tasks
#[derive(Clone)]
pub struct RetrievalOrchestrator {
    max_in_flight: usize,
    progress: ProgressTracker,
}

impl RetrievalOrchestrator {
    pub fn new(max_in_flight: usize, progress: ProgressTracker) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            progress,
        }
    }

    /// Fresh in-flight gate for one source of one round
    fn gate(&self) -> Arc<Semaphore> {
        Arc::new(Semaphore::new(self.max_in_flight))
    }

    /// Query every source for every entry
    ///
    /// Always returns `sources.len() * entries.len()` results.
    pub async fn retrieve_all(
        &self,
        entries: &[Arc<Entry>],
        sources: &[Arc<dyn SourceAdapter>],
    ) -> Vec<RetrievalResult> {
        info!(
            entries = entries.len(),
            sources = sources.len(),
            "Starting retrieval fan-out"
        );

        let mut handles = Vec::with_capacity(entries.len() * sources.len());
        for source in sources {
            self.progress.increase(source.subtask(), entries.len());
            let gate = self.gate();
            for entry in entries {
                let task_source = Arc::clone(source);
                let task_entry = Arc::clone(entry);
                let semaphore = Arc::clone(&gate);
                let progress = self.progress.clone();

                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let retrieval = task_source.query(&task_entry).await;
                    progress.finish(task_source.subtask());
                    retrieval
                });
                handles.push((source.name(), Arc::clone(entry), handle));
            }
        }

        let (tags, joins): (Vec<_>, Vec<_>) = handles
            .into_iter()
            .map(|(source, entry, handle)| ((source, entry), handle))
            .unzip();

        join_all(joins)
            .await
            .into_iter()
            .zip(tags)
            .map(|(joined, (source, entry))| {
                let retrieval = joined.unwrap_or_else(|e| {
                    warn!(source, entry = %entry.id(), error = %e, "Retrieval task failed");
                    Retrieval::failed(RetrievalError::TaskFailed(e.to_string()))
                });
                if let Some(err) = &retrieval.error {
                    debug!(source, entry = %entry.id(), error = %err, "Retrieval error");
                }
                RetrievalResult {
                    entry_id: entry.id().to_string(),
                    source: source.to_string(),
                    retrieval,
                }
            })
            .collect()
    }

    /// Look up DOIs for entries that lack one and did not opt out
    pub async fn find_dois(
        &self,
        entries: &[Arc<Entry>],
        resolver: Arc<dyn DoiResolver>,
    ) -> DoiDiscovery {
        let candidates: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.doi().is_none() && !e.nodoi())
            .map(|(i, _)| i)
            .collect();

        info!(resolver = resolver.name(), candidates = candidates.len(), "Searching DOIs");
        self.progress.increase(resolver.subtask(), candidates.len());
        let gate = self.gate();

        let handles: Vec<_> = candidates
            .iter()
            .map(|&i| {
                let entry = Arc::clone(&entries[i]);
                let resolver = Arc::clone(&resolver);
                let semaphore = Arc::clone(&gate);
                let progress = self.progress.clone();
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let result = resolver.resolve_doi(&entry).await;
                    progress.finish(resolver.subtask());
                    result
                })
            })
            .collect();

        let mut discovery = DoiDiscovery {
            entries: entries.to_vec(),
            errors: Vec::new(),
        };

        for (joined, i) in join_all(handles).await.into_iter().zip(candidates) {
            let entry = &entries[i];
            match joined {
                Ok(Ok(Some(doi))) => {
                    discovery.entries[i] = Arc::new(entry.with_suggested_dois([doi]));
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => discovery
                    .errors
                    .push(RetrievalFailure::new(entry.id(), resolver.name(), e)),
                Err(e) => discovery.errors.push(RetrievalFailure::new(
                    entry.id(),
                    resolver.name(),
                    RetrievalError::TaskFailed(e.to_string()),
                )),
            }
        }

        discovery
    }
}

impl Default for RetrievalOrchestrator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT, ProgressTracker::detached())
    }
}
