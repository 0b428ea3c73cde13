//! Crossref REST API client
//!
//! Two jobs:
//! - [`SourceAdapter`]: fetch `/works/{doi}` for the entry's probable DOI and
//!   map the record onto entry fields
//! - [`DoiResolver`]: find a DOI for an entry without one, searching with
//!   progressively fewer terms until a title matches

use super::http::{is_throttling, json_body, json_str, json_strings, status_error, transport_error};
use super::{retry_throttled, DoiResolver, ProviderError, Retrieval, RetryPolicy, SourceAdapter};
use crate::error::RetrievalError;
use crate::options::CheckOptions;
use crate::rate_limit::RateLimiter;
use crate::similarity::{PartialRatio, Similarity};
use crate::types::{is_doi_url, Entry, Suggestion};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub const NAME: &str = "crossref";
pub const DEFAULT_BASE_URL: &str = "https://api.crossref.org";

/// Candidates inspected per search step
const SEARCH_ROWS: usize = 10;
const DEFAULT_FUZZY_THRESHOLD: f64 = 90.0;

/// Crossref work type to BibTeX entry types, most likely first
fn map_type(crossref_type: &str) -> Option<&'static [&'static str]> {
    let types: &'static [&'static str] = match crossref_type {
        "journal-article" => &["article"],
        "book-chapter" => &["inproceedings", "inbook", "incollection"],
        "book" | "monograph" | "dissertation" => &["book"],
        "proceedings-article" => &["inproceedings", "article"],
        "report" => &["article", "misc"],
        _ => return None,
    };
    Some(types)
}

/// Crossref field to entry field
const FIELD_MAPPING: &[(&str, &str)] = &[
    ("DOI", "doi"),
    ("ISBN", "isbn"),
    ("ISSN", "issn"),
    ("page", "pages"),
    ("publisher", "publisher"),
    ("title", "title"),
    ("volume", "volume"),
];

/// Relaxation step of the DOI search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStep {
    /// Title and full author names
    TitleAndAuthors,
    /// Title and surnames
    TitleAndSurnames,
    /// Title only
    TitleOnly,
}

impl SearchStep {
    pub const ALL: [SearchStep; 3] = [
        SearchStep::TitleAndAuthors,
        SearchStep::TitleAndSurnames,
        SearchStep::TitleOnly,
    ];

    /// Search parameters for an entry with the given title
    pub fn params(&self, entry: &Entry, title: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![("query.bibliographic", title.to_string())];

        let authors: Vec<String> = match self {
            SearchStep::TitleAndAuthors => entry.authors().iter().map(|p| p.full_name()).collect(),
            SearchStep::TitleAndSurnames => entry.authors().iter().map(|p| p.last.clone()).collect(),
            SearchStep::TitleOnly => Vec::new(),
        };
        if !authors.is_empty() {
            params.push(("query.author", authors.join(" ")));
        }

        params.push(("sort", "relevance".to_string()));
        params.push(("order", "desc".to_string()));
        params.push(("rows", SEARCH_ROWS.to_string()));
        params
    }
}

/// Crossref API client
pub struct CrossrefSource {
    client: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    options: Arc<CheckOptions>,
    plus_token: Option<String>,
    similarity: Arc<dyn Similarity>,
}

impl CrossrefSource {
    pub fn new(client: reqwest::Client, limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            limiter,
            retry,
            options: Arc::new(CheckOptions::default()),
            plus_token: None,
            similarity: Arc::new(PartialRatio),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Options consulted for `doi_fuzzy_threshold`
    pub fn with_options(mut self, options: Arc<CheckOptions>) -> Self {
        self.options = options;
        self
    }

    /// Crossref Plus API token
    pub fn with_plus_token(mut self, token: Option<String>) -> Self {
        self.plus_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.plus_token {
            Some(token) => request.header("Crossref-Plus-API-Token", format!("Bearer {token}")),
            None => request,
        }
    }

    /// Fetch a work record; `Ok(None)` for unknown DOIs
    async fn fetch_work(&self, doi: &str) -> Result<Option<Value>, ProviderError> {
        let url = format!("{}/works/{}", self.base_url, urlencoding::encode(doi));
        debug!(doi = %doi, url = %url, "Querying Crossref API");

        let response = self.get(&url).send().await.map_err(transport_error)?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if is_throttling(status) {
            return Err(ProviderError::Throttled);
        }
        if !status.is_success() {
            return Err(status_error(status));
        }

        let body = json_body(response).await?;
        Ok(body.get("message").cloned())
    }

    /// One search request; returns the ranked items
    async fn search(&self, params: &[(&'static str, String)]) -> Result<Vec<Value>, ProviderError> {
        let url = format!("{}/works", self.base_url);
        let response = self
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();

        if is_throttling(status) {
            return Err(ProviderError::Throttled);
        }
        if !status.is_success() {
            return Err(status_error(status));
        }

        let body = json_body(response).await?;
        Ok(body
            .pointer("/message/items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Map a work record onto a suggestion
    fn to_suggestion(&self, entry: &Entry, work: &Value) -> Suggestion {
        let mut s = Suggestion::new(NAME, entry);

        if let Some(work_type) = json_str(work, "type") {
            match map_type(work_type) {
                Some(types) => {
                    for t in types {
                        s.add_field("entrytype", *t);
                    }
                }
                None => warn!(work_type = %work_type, "Unknown Crossref work type"),
            }
        }

        for person in work.get("author").and_then(Value::as_array).into_iter().flatten() {
            s.add_author(
                json_str(person, "given").unwrap_or_default(),
                json_str(person, "family").unwrap_or_default(),
            );
        }
        for person in work.get("editor").and_then(Value::as_array).into_iter().flatten() {
            s.add_editor(
                json_str(person, "given").unwrap_or_default(),
                json_str(person, "family").unwrap_or_default(),
            );
        }

        if let Some(url) = json_str(work, "URL") {
            if !is_doi_url(url) {
                s.add_field("url", url);
            }
        }

        let container_field = match entry.entry_type() {
            "inproceedings" => "booktitle",
            _ => "journal",
        };
        for value in work.get("container-title").map(json_strings).unwrap_or_default() {
            s.add_field(container_field, value);
        }

        for (from, to) in FIELD_MAPPING {
            for value in work.get(*from).map(json_strings).unwrap_or_default() {
                s.add_field(*to, value);
            }
        }

        s
    }

    /// First candidate whose title is close enough to the entry's title
    fn pick_candidate(&self, title: &str, items: &[Value], threshold: f64) -> Option<String> {
        let title = title.to_lowercase();
        items.iter().take(SEARCH_ROWS).find_map(|item| {
            let doi = json_str(item, "DOI")?;
            let titles = item.get("title").map(json_strings).unwrap_or_default();
            titles
                .iter()
                .any(|candidate| self.similarity.score(&title, &candidate.to_lowercase()) >= threshold)
                .then(|| doi.to_string())
        })
    }
}

#[async_trait]
impl SourceAdapter for CrossrefSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn subtask(&self) -> &'static str {
        "CrossrefQuery"
    }

    async fn query(&self, entry: &Entry) -> Retrieval {
        let Some(doi) = entry.probable_doi() else {
            return Retrieval::skipped();
        };

        let result = retry_throttled(NAME, &self.limiter, &self.retry, || self.fetch_work(doi)).await;
        Retrieval::from_result(result.map(|work| work.map(|w| self.to_suggestion(entry, &w))))
    }
}

#[async_trait]
impl DoiResolver for CrossrefSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn subtask(&self) -> &'static str {
        "CrossrefDOI"
    }

    async fn resolve_doi(&self, entry: &Entry) -> Result<Option<String>, RetrievalError> {
        let Some(title) = entry.non_empty_field("title") else {
            return Ok(None);
        };
        let threshold = self
            .options
            .get_f64("doi_fuzzy_threshold", Some(entry), DEFAULT_FUZZY_THRESHOLD)
            .map_err(|e| RetrievalError::Option(e.to_string()))?;

        for step in SearchStep::ALL {
            let params = step.params(entry, title);
            let items = retry_throttled(NAME, &self.limiter, &self.retry, || self.search(&params)).await?;

            if let Some(doi) = self.pick_candidate(title, &items, threshold) {
                debug!(entry = %entry.id(), doi = %doi, step = ?step, "DOI candidate found");
                return Ok(Some(doi));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RateLimitConfig;
    use serde_json::json;

    fn source() -> CrossrefSource {
        CrossrefSource::new(
            reqwest::Client::new(),
            Arc::new(RateLimiter::new(NAME, RateLimitConfig::default())),
            RetryPolicy::default(),
        )
    }

    #[test]
    fn test_search_step_params() {
        let entry = Entry::builder("x").author("John", "Doe").build();

        let full = SearchStep::TitleAndAuthors.params(&entry, "Testtitle");
        assert!(full.contains(&("query.author", "John Doe".to_string())));

        let surnames = SearchStep::TitleAndSurnames.params(&entry, "Testtitle");
        assert!(surnames.contains(&("query.author", "Doe".to_string())));

        let title_only = SearchStep::TitleOnly.params(&entry, "Testtitle");
        assert!(title_only.iter().all(|(k, _)| *k != "query.author"));
        assert_eq!(title_only[0], ("query.bibliographic", "Testtitle".to_string()));
    }

    #[test]
    fn test_pick_candidate_fuzzy_and_case_insensitive() {
        let items = vec![
            json!({"title": ["foo"], "DOI": "1234"}),
            json!({"title": ["Bar"], "DOI": "abcd"}),
            json!({"title": ["This is almost the correct titel"], "DOI": "fuzzy"}),
            json!({"title": "CASE SHOULD BE IRRELEVANT", "DOI": "case"}),
        ];
        let cs = source();

        assert_eq!(cs.pick_candidate("Bar", &items, 90.0), Some("abcd".to_string()));
        assert_eq!(
            cs.pick_candidate("This is almost the correct title", &items, 90.0),
            Some("fuzzy".to_string())
        );
        assert_eq!(
            cs.pick_candidate("case should be irrelevant", &items, 90.0),
            Some("case".to_string())
        );
        assert_eq!(cs.pick_candidate("Unrelated", &items, 90.0), None);
    }

    #[test]
    fn test_work_mapping() {
        let entry = Entry::builder("x").entry_type("inproceedings").build();
        let work = json!({
            "type": "proceedings-article",
            "DOI": "10.1000/1234",
            "URL": "http://dx.doi.org/10.1000/1234",
            "container-title": ["Proceedings of SODA"],
            "author": [{"given": "Donald", "family": "Knuth"}],
            "page": "1-10",
        });

        let s = source().to_suggestion(&entry, &work);

        assert_eq!(s.fields["entrytype"], vec!["inproceedings", "article"]);
        assert_eq!(s.first("booktitle"), Some("Proceedings of SODA"));
        assert_eq!(s.first("pages"), Some("1-10"));
        assert_eq!(s.first("doi"), Some("10.1000/1234"));
        assert!(!s.fields.contains_key("url"));
        assert_eq!(s.authors[0].last, "Knuth");
    }
}
