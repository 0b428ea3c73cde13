//! Metadata sources
//!
//! Every source implements [`SourceAdapter`] so the orchestrator can fan
//! queries out uniformly. Sources shipped with bibchex, in query order:
//!
//! 1. DataCite (`datacite`): DOI lookup in the DataCite registry
//! 2. Crossref (`crossref`): DOI lookup, plus DOI discovery via [`DoiResolver`]
//! 3. Meta (`meta`): `<meta>` tags scraped from the entry's landing page
//! 4. ISBN (`isbn`): Google Books and Open Library lookups by ISBN
//!
//! # Example
//! ```rust,ignore
//! use bibchex_engine::sources::{SourceAdapter, Retrieval};
//!
//! pub struct StaticSource;
//!
//! #[async_trait::async_trait]
//! impl SourceAdapter for StaticSource {
//!     fn name(&self) -> &'static str { "static" }
//!     fn subtask(&self) -> &'static str { "StaticQuery" }
//!
//!     async fn query(&self, entry: &Entry) -> Retrieval {
//!         Retrieval::skipped()
//!     }
//! }
//! ```

pub mod crossref;
pub mod datacite;
pub mod http;
pub mod isbn;
pub mod meta;

use crate::error::{RetrievalError, RunError};
use crate::options::CheckOptions;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::types::{Entry, Person, Suggestion};
use async_trait::async_trait;
use bibchex_common::config::{duration_from_secs, RetrySettings, TomlConfig};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use crossref::CrossrefSource;
pub use datacite::DataCiteSource;
pub use isbn::IsbnSource;
pub use meta::MetaSource;

/// Outcome of one source query for one entry
///
/// A query may produce several suggestions (the ISBN source asks two
/// providers) and still report an error for the part that failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieval {
    pub suggestions: Vec<Suggestion>,
    pub error: Option<RetrievalError>,
}

impl Retrieval {
    /// Required input was absent; nothing to report
    pub fn skipped() -> Self {
        Self::default()
    }

    pub fn found(suggestion: Suggestion) -> Self {
        Self {
            suggestions: vec![suggestion],
            error: None,
        }
    }

    pub fn failed(error: RetrievalError) -> Self {
        Self {
            suggestions: Vec::new(),
            error: Some(error),
        }
    }

    /// Collapse a single-provider result
    pub fn from_result(result: Result<Option<Suggestion>, RetrievalError>) -> Self {
        match result {
            Ok(Some(s)) => Self::found(s),
            Ok(None) => Self::skipped(),
            Err(e) => Self::failed(e),
        }
    }
}

/// Uniform query contract for metadata sources
///
/// Implementations skip silently when the entry lacks the input they need,
/// gate every request on their own [`RateLimiter`], and turn provider
/// failures into a [`RetrievalError`] instead of panicking or propagating.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source name, used as suggestion and error provenance
    fn name(&self) -> &'static str;

    /// Progress subtask name ("CrossrefQuery")
    fn subtask(&self) -> &'static str;

    /// Query the source for one entry
    async fn query(&self, entry: &Entry) -> Retrieval;
}

/// DOI discovery for entries that do not carry one
#[async_trait]
pub trait DoiResolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Progress subtask name ("CrossrefDOI")
    fn subtask(&self) -> &'static str;

    /// Find a DOI for the entry, `Ok(None)` if no candidate matches
    async fn resolve_doi(&self, entry: &Entry) -> Result<Option<String>, RetrievalError>;
}

/// Provider failure as seen by the retry loop
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Upstream signalled rate limiting (HTTP 403/429)
    Throttled,
    /// Any other failure; not retried
    Failed(RetrievalError),
}

impl From<RetrievalError> for ProviderError {
    fn from(err: RetrievalError) -> Self {
        ProviderError::Failed(err)
    }
}

/// Exponential retry budget for throttled requests
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 20,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// Policy from the `[retrieval.retry]` section
    pub fn from_settings(settings: &RetrySettings) -> bibchex_common::Result<Self> {
        Ok(Self {
            max_retries: settings.max_retries,
            initial_delay: duration_from_secs("retrieval.retry.initial_delay_secs", settings.initial_delay_secs)?,
            max_delay: duration_from_secs("retrieval.retry.max_delay_secs", settings.max_delay_secs)?,
        })
    }
}

/// Run a rate-limited request, retrying while the provider throttles us
///
/// Each attempt takes a token from `limiter`. A throttling response triggers
/// `limiter.backoff()` and a sleep that starts at `initial_delay` and doubles
/// up to `max_delay`. After `max_retries` retries the call gives up with
/// [`RetrievalError::TooManyRetries`]. Other failures return immediately.
pub async fn retry_throttled<T, F, Fut>(
    source: &str,
    limiter: &RateLimiter,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, RetrievalError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut retries = 0u32;
    let mut delay = policy.initial_delay;

    loop {
        limiter.acquire().await;

        match op().await {
            Ok(value) => return Ok(value),
            Err(ProviderError::Failed(err)) => return Err(err),
            Err(ProviderError::Throttled) => {
                limiter.backoff().await;
                if retries >= policy.max_retries {
                    warn!(source, retries, "Retry budget exhausted");
                    return Err(RetrievalError::TooManyRetries);
                }
                retries += 1;
                warn!(source, retry = retries, delay_ms = delay.as_millis() as u64, "Throttled, retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2).min(policy.max_delay);
            }
        }
    }
}

/// Split a display name into given and family name
///
/// Accepts "Last, First" and "First Middle Last".
pub fn person_from_name(name: &str) -> Person {
    let name = name.trim();
    if let Some((last, first)) = name.split_once(',') {
        return Person::new(first.trim(), last.trim());
    }
    match name.rsplit_once(char::is_whitespace) {
        Some((first, last)) => Person::new(first.trim(), last.trim()),
        None => Person::new("", name),
    }
}

/// Default rate limit for a source
pub fn default_rate_limit(source: &str) -> RateLimitConfig {
    match source {
        // Crossref public pool
        crossref::NAME => RateLimitConfig::new(50, Duration::from_secs(1)),
        _ => RateLimitConfig::default(),
    }
}

fn limiter_for(config: &TomlConfig, source: &str) -> bibchex_common::Result<Arc<RateLimiter>> {
    let rate_limit = default_rate_limit(source).with_overrides(source, &config.source(source).rate_limit)?;
    Ok(Arc::new(RateLimiter::new(source, rate_limit)))
}

/// Build the enabled sources, in query order, plus the Crossref DOI resolver
pub fn build_sources(
    config: &TomlConfig,
    options: Arc<CheckOptions>,
) -> Result<(Vec<Arc<dyn SourceAdapter>>, Arc<CrossrefSource>), RunError> {
    let retry = RetryPolicy::from_settings(&config.retrieval.retry)?;
    let client =
        http::build_client(config.retrieval.mailto.as_deref()).map_err(|e| RunError::Setup(e.to_string()))?;

    let mut crossref = CrossrefSource::new(client.clone(), limiter_for(config, crossref::NAME)?, retry.clone())
        .with_options(options)
        .with_plus_token(config.retrieval.crossref_plus.clone());
    if let Some(url) = config.source(crossref::NAME).base_url {
        crossref = crossref.with_base_url(url);
    }
    let crossref = Arc::new(crossref);

    let mut sources: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    if config.source(datacite::NAME).enabled {
        let mut source = DataCiteSource::new(client.clone(), limiter_for(config, datacite::NAME)?, retry.clone());
        if let Some(url) = config.source(datacite::NAME).base_url {
            source = source.with_base_url(url);
        }
        sources.push(Arc::new(source));
    }

    if config.source(crossref::NAME).enabled {
        sources.push(crossref.clone());
    }

    if config.source(meta::NAME).enabled {
        let mut source = MetaSource::new(client.clone(), limiter_for(config, meta::NAME)?, retry.clone());
        if let Some(url) = config.source(meta::NAME).base_url {
            source = source.with_doi_resolver_url(url);
        }
        sources.push(Arc::new(source));
    }

    if config.source(isbn::NAME).enabled {
        let mut source = IsbnSource::new(client, limiter_for(config, isbn::NAME)?, retry);
        if let Some(url) = config.source(isbn::NAME).base_url {
            source = source.with_base_urls(url.clone(), url);
        }
        sources.push(Arc::new(source));
    }

    info!(
        sources = ?sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
        "Retrieval sources configured"
    );

    Ok((sources, crossref))
}
