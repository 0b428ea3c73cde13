//! Retrieval fan-out: result correlation, failure isolation and pacing

use async_trait::async_trait;
use bibchex_common::events::{EventBus, ProgressEvent};
use bibchex_engine::orchestrator::{RetrievalOrchestrator, RetrievalOutcome};
use bibchex_engine::progress::ProgressTracker;
use bibchex_engine::rate_limit::{RateLimitConfig, RateLimiter};
use bibchex_engine::sources::{Retrieval, SourceAdapter};
use bibchex_engine::{Entry, RetrievalError, Suggestion};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn entries(n: usize) -> Vec<Arc<Entry>> {
    (0..n)
        .map(|i| Arc::new(Entry::builder(format!("entry{i}")).build()))
        .collect()
}

/// Suggests the entry's own key as title
struct Echo;

#[async_trait]
impl SourceAdapter for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn subtask(&self) -> &'static str {
        "EchoQuery"
    }

    async fn query(&self, entry: &Entry) -> Retrieval {
        let mut s = Suggestion::new(self.name(), entry);
        s.add_field("title", entry.id());
        Retrieval::found(s)
    }
}

/// Fails for every entry
struct Failing;

#[async_trait]
impl SourceAdapter for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn subtask(&self) -> &'static str {
        "FailingQuery"
    }

    async fn query(&self, _entry: &Entry) -> Retrieval {
        Retrieval::failed(RetrievalError::Provider("HTTP status 503".into()))
    }
}

/// Panics on the second entry
struct Panicking;

#[async_trait]
impl SourceAdapter for Panicking {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn subtask(&self) -> &'static str {
        "PanickingQuery"
    }

    async fn query(&self, entry: &Entry) -> Retrieval {
        if entry.id() == "entry1" {
            panic!("adapter bug");
        }
        Retrieval::skipped()
    }
}

/// Takes a token from its limiter per query
struct Limited {
    limiter: RateLimiter,
}

#[async_trait]
impl SourceAdapter for Limited {
    fn name(&self) -> &'static str {
        "limited"
    }

    fn subtask(&self) -> &'static str {
        "LimitedQuery"
    }

    async fn query(&self, entry: &Entry) -> Retrieval {
        self.limiter.acquire().await;
        Retrieval::found(Suggestion::new(self.name(), entry))
    }
}

/// Unthrottled; records when each query ran
#[derive(Default)]
struct Timed {
    ran_at: Mutex<Vec<Instant>>,
}

#[async_trait]
impl SourceAdapter for Timed {
    fn name(&self) -> &'static str {
        "timed"
    }

    fn subtask(&self) -> &'static str {
        "TimedQuery"
    }

    async fn query(&self, entry: &Entry) -> Retrieval {
        if let Ok(mut ran_at) = self.ran_at.lock() {
            ran_at.push(Instant::now());
        }
        Retrieval::found(Suggestion::new(self.name(), entry))
    }
}

fn source_of_kind(kind: u8) -> Arc<dyn SourceAdapter> {
    match kind {
        0 => Arc::new(Echo),
        1 => Arc::new(Failing),
        _ => Arc::new(Panicking),
    }
}

#[tokio::test]
async fn test_one_result_per_entry_and_source() {
    let orchestrator = RetrievalOrchestrator::new(4, ProgressTracker::detached());
    let sources: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(Echo), Arc::new(Failing), Arc::new(Panicking)];
    let entries = entries(3);

    let results = orchestrator.retrieve_all(&entries, &sources).await;

    assert_eq!(results.len(), entries.len() * sources.len());

    let tags: Vec<(&str, &str)> = results
        .iter()
        .map(|r| (r.source.as_str(), r.entry_id.as_str()))
        .collect();
    assert_eq!(tags[0], ("echo", "entry0"));
    assert_eq!(tags[3], ("failing", "entry0"));
    assert_eq!(tags[7], ("panicking", "entry1"));

    assert_eq!(results[1].retrieval.suggestions[0].first("title"), Some("entry1"));
    assert!(matches!(results[4].retrieval.error, Some(RetrievalError::Provider(_))));
    assert!(matches!(results[7].retrieval.error, Some(RetrievalError::TaskFailed(_))));
    assert_eq!(results[8].retrieval, Retrieval::skipped());
}

#[tokio::test]
async fn test_flattened_errors_keep_provenance() {
    let orchestrator = RetrievalOrchestrator::new(2, ProgressTracker::detached());
    let sources: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(Echo), Arc::new(Failing)];

    let outcome = RetrievalOutcome::flatten(orchestrator.retrieve_all(&entries(2), &sources).await);

    assert_eq!(outcome.suggestions.len(), 2);
    assert_eq!(outcome.errors.len(), 2);
    assert_eq!(outcome.errors[1].entry_id, "entry1");
    assert_eq!(outcome.errors[1].source, "failing");
    assert_eq!(outcome.errors[1].message, "Provider error: HTTP status 503");
}

#[tokio::test]
async fn test_progress_counts_reach_total() {
    let bus = EventBus::new(256);
    let mut rx = bus.subscribe();
    let progress = ProgressTracker::new(bus);
    let orchestrator = RetrievalOrchestrator::new(8, progress.clone());
    let sources: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(Echo)];

    orchestrator.retrieve_all(&entries(5), &sources).await;

    let stats = progress.stats("EchoQuery");
    assert_eq!((stats.done, stats.total), (5, 5));
    assert_eq!(stats.display_string("EchoQuery"), "EchoQuery 5 of 5");

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        if let ProgressEvent::SubtaskProgress { done, total, .. } = event {
            last = Some((done, total));
        }
    }
    assert_eq!(last, Some((5, 5)));
}

#[tokio::test]
async fn test_no_subscriber_does_not_block() {
    // Capacity far below the number of events
    let orchestrator = RetrievalOrchestrator::new(8, ProgressTracker::new(EventBus::new(1)));
    let sources: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(Echo)];

    let results = orchestrator.retrieve_all(&entries(50), &sources).await;
    assert_eq!(results.len(), 50);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_bucket_paces_queries() {
    let interval = Duration::from_secs(60);
    let source = Limited {
        limiter: RateLimiter::new("limited", RateLimitConfig::new(2, interval)),
    };
    let sources: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(source)];
    let orchestrator = RetrievalOrchestrator::default();

    let start = Instant::now();
    let results = orchestrator.retrieve_all(&entries(5), &sources).await;

    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.retrieval.error.is_none()));
    assert!(start.elapsed() >= interval);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_source_does_not_starve_others() {
    let interval = Duration::from_secs(60);
    let slow: Arc<dyn SourceAdapter> = Arc::new(Limited {
        limiter: RateLimiter::new("limited", RateLimitConfig::new(1, interval)),
    });
    let timed = Arc::new(Timed::default());
    let fast: Arc<dyn SourceAdapter> = timed.clone();
    // Slow source first, so its tasks are the first to ask for a slot
    let sources = vec![slow, fast];
    let orchestrator = RetrievalOrchestrator::new(4, ProgressTracker::detached());

    let start = Instant::now();
    let results = orchestrator.retrieve_all(&entries(20), &sources).await;

    assert_eq!(results.len(), 40);
    assert!(start.elapsed() >= interval * 19);

    let ran_at = timed.ran_at.lock().unwrap();
    assert_eq!(ran_at.len(), 20);
    assert!(ran_at.iter().all(|t| t.duration_since(start) < Duration::from_secs(1)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_one_correlated_result_per_task(
        n in 0usize..12,
        kinds in prop::collection::vec(0u8..3, 0..5),
        cap in 1usize..8,
    ) {
        let sources: Vec<Arc<dyn SourceAdapter>> = kinds.iter().map(|k| source_of_kind(*k)).collect();
        let entries = entries(n);
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let orchestrator = RetrievalOrchestrator::new(cap, ProgressTracker::detached());

        let results = runtime.block_on(orchestrator.retrieve_all(&entries, &sources));

        prop_assert_eq!(results.len(), n * sources.len());
        for (i, result) in results.iter().enumerate() {
            let (s, e) = (i / n, i % n);
            prop_assert_eq!(result.source.as_str(), sources[s].name());
            prop_assert_eq!(result.entry_id.as_str(), entries[e].id());

            match (kinds[s], entries[e].id()) {
                (0, _) => {
                    prop_assert_eq!(result.retrieval.suggestions.len(), 1);
                }
                (1, _) => {
                    prop_assert!(matches!(result.retrieval.error, Some(RetrievalError::Provider(_))));
                }
                (_, "entry1") => {
                    prop_assert!(matches!(result.retrieval.error, Some(RetrievalError::TaskFailed(_))));
                }
                _ => {
                    prop_assert_eq!(&result.retrieval, &Retrieval::skipped());
                }
            }
        }
    }
}
