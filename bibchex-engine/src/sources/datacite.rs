//! DataCite REST API client

use super::http::{is_throttling, json_str, json_strings, transport_error};
use super::{retry_throttled, ProviderError, Retrieval, RetryPolicy, SourceAdapter};
use crate::error::RetrievalError;
use crate::rate_limit::RateLimiter;
use crate::types::{Entry, Suggestion};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub const NAME: &str = "datacite";
pub const DEFAULT_BASE_URL: &str = "https://api.datacite.org";

pub struct DataCiteSource {
    client: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl DataCiteSource {
    pub fn new(client: reqwest::Client, limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            limiter,
            retry,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Fetch the attributes of a DOI record
    ///
    /// DataCite only knows DOIs minted through it, so any non-success status
    /// or an `errors` payload means "not ours" rather than a failure.
    async fn fetch(&self, doi: &str) -> Result<Option<Value>, ProviderError> {
        let url = format!("{}/dois/{}", self.base_url, urlencoding::encode(doi));
        debug!(doi = %doi, url = %url, "Querying DataCite API");

        let response = self.client.get(&url).send().await.map_err(transport_error)?;
        let status = response.status();

        if is_throttling(status) {
            return Err(ProviderError::Throttled);
        }
        if !status.is_success() {
            return Ok(None);
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!(doi = %doi, error = %e, "DataCite response did not contain JSON");
                return Ok(None);
            }
        };
        if body.get("errors").is_some() {
            return Ok(None);
        }

        body.pointer("/data/attributes")
            .cloned()
            .map(Some)
            .ok_or_else(|| ProviderError::Failed(RetrievalError::parse("missing data.attributes")))
    }
}

/// Map DataCite attributes onto a suggestion
fn to_suggestion(entry: &Entry, attrs: &Value) -> Suggestion {
    let mut s = Suggestion::new(NAME, entry);

    for creator in attrs.get("creators").and_then(Value::as_array).into_iter().flatten() {
        if let (Some(given), Some(family)) = (json_str(creator, "givenName"), json_str(creator, "familyName")) {
            s.add_author(given, family);
        }
    }

    for contributor in attrs.get("contributors").and_then(Value::as_array).into_iter().flatten() {
        if json_str(contributor, "contributorType") != Some("Editor") {
            continue;
        }
        if let (Some(given), Some(family)) =
            (json_str(contributor, "givenName"), json_str(contributor, "familyName"))
        {
            s.add_editor(given, family);
        }
    }

    if let Some(title) = attrs.pointer("/titles/0/title").and_then(Value::as_str) {
        s.add_field("title", title);
    }

    for (from, to) in [("publisher", "publisher"), ("publicationYear", "year"), ("url", "url")] {
        for value in attrs.get(from).map(json_strings).unwrap_or_default() {
            s.add_field(to, value);
        }
    }

    if let Some(container) = attrs.get("container") {
        let container_field = match json_str(container, "type") {
            Some("Journal") => Some("journal"),
            Some("Book Series") => Some("booktitle"),
            _ => None,
        };

        if let Some(field) = container_field {
            if let Some(title) = json_str(container, "title") {
                s.add_field(field, title);
            }
            for (from, to) in [("volume", "volume"), ("issue", "issue")] {
                for value in container.get(from).map(json_strings).unwrap_or_default() {
                    s.add_field(to, value);
                }
            }
            if json_str(container, "identifierType") == Some("ISSN") {
                if let Some(issn) = json_str(container, "identifier") {
                    s.add_field("issn", issn);
                }
            }
            if let (Some(first), Some(last)) = (
                container.get("firstPage").map(json_strings).and_then(|v| v.into_iter().next()),
                container.get("lastPage").map(json_strings).and_then(|v| v.into_iter().next()),
            ) {
                s.add_field("pages", format!("{first}--{last}"));
            }
        }
    }

    if let Some(bibtex_type) = attrs.pointer("/types/bibtex").and_then(Value::as_str) {
        s.add_field("entrytype", bibtex_type);
    }

    s
}

#[async_trait]
impl SourceAdapter for DataCiteSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn subtask(&self) -> &'static str {
        "DataCiteQuery"
    }

    async fn query(&self, entry: &Entry) -> Retrieval {
        let Some(doi) = entry.probable_doi() else {
            return Retrieval::skipped();
        };

        let result = retry_throttled(NAME, &self.limiter, &self.retry, || self.fetch(doi)).await;
        Retrieval::from_result(result.map(|attrs| attrs.map(|a| to_suggestion(entry, &a))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_mapping() {
        let entry = Entry::builder("x").build();
        let attrs = json!({
            "creators": [
                {"givenName": "Ada", "familyName": "Lovelace"},
                {"name": "Some Consortium"}
            ],
            "contributors": [
                {"contributorType": "Editor", "givenName": "Charles", "familyName": "Babbage"},
                {"contributorType": "DataCurator", "givenName": "X", "familyName": "Y"}
            ],
            "titles": [{"title": "Notes"}],
            "publisher": "Zenodo",
            "publicationYear": 1843,
            "container": {
                "type": "Journal",
                "title": "Scientific Memoirs",
                "volume": "3",
                "identifierType": "ISSN",
                "identifier": "1234-5678",
                "firstPage": "666",
                "lastPage": "731"
            },
            "types": {"bibtex": "article"}
        });

        let s = to_suggestion(&entry, &attrs);

        assert_eq!(s.authors.len(), 1);
        assert_eq!(s.editors.len(), 1);
        assert_eq!(s.first("title"), Some("Notes"));
        assert_eq!(s.first("year"), Some("1843"));
        assert_eq!(s.first("journal"), Some("Scientific Memoirs"));
        assert_eq!(s.first("issn"), Some("1234-5678"));
        assert_eq!(s.first("pages"), Some("666--731"));
        assert_eq!(s.first("entrytype"), Some("article"));
    }
}
