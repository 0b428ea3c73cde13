//! ISBN lookups at Google Books and Open Library
//!
//! Both providers are asked in parallel and each contributes its own
//! suggestion (`isbn_goob`, `isbn_openl`). A failing provider does not hide
//! the other one's result.

use super::http::{is_throttling, json_body, json_str, json_strings, status_error, transport_error};
use super::{person_from_name, retry_throttled, ProviderError, Retrieval, RetryPolicy, SourceAdapter};
use crate::error::RetrievalError;
use crate::rate_limit::RateLimiter;
use crate::types::{Entry, Suggestion};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub const NAME: &str = "isbn";
pub const GOOGLE_BOOKS_URL: &str = "https://www.googleapis.com";
pub const OPEN_LIBRARY_URL: &str = "https://openlibrary.org";

/// ISBN providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GoogleBooks,
    OpenLibrary,
}

impl Provider {
    /// Suggestion source name
    pub fn source_name(&self) -> &'static str {
        match self {
            Provider::GoogleBooks => "isbn_goob",
            Provider::OpenLibrary => "isbn_openl",
        }
    }
}

/// Strip separators; `None` unless 10 or 13 digits (last may be `X`)
///
/// Only the shape is checked, not the check digit.
pub fn normalize_isbn(isbn: &str) -> Option<String> {
    let digits: String = isbn
        .chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if !digits.is_ascii() {
        return None;
    }
    let (body, last) = digits.split_at(digits.len().checked_sub(1)?);
    let shape_ok = matches!(digits.len(), 10 | 13)
        && body.chars().all(|c| c.is_ascii_digit())
        && last.chars().all(|c| c.is_ascii_digit() || c == 'X');
    shape_ok.then_some(digits)
}

pub struct IsbnSource {
    client: reqwest::Client,
    google_url: String,
    openlibrary_url: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl IsbnSource {
    pub fn new(client: reqwest::Client, limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self {
            client,
            google_url: GOOGLE_BOOKS_URL.to_string(),
            openlibrary_url: OPEN_LIBRARY_URL.to_string(),
            limiter,
            retry,
        }
    }

    pub fn with_base_urls(mut self, google: impl Into<String>, openlibrary: impl Into<String>) -> Self {
        self.google_url = google.into().trim_end_matches('/').to_string();
        self.openlibrary_url = openlibrary.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json(&self, url: &str, params: &[(&str, String)]) -> Result<Value, ProviderError> {
        let response = self
            .client
            .get(url)
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
        json_body(response).await
    }

    async fn lookup(&self, provider: Provider, entry: &Entry, isbn: &str) -> Result<Option<Suggestion>, RetrievalError> {
        debug!(isbn = %isbn, provider = provider.source_name(), "Querying ISBN provider");
        let (url, params) = match provider {
            Provider::GoogleBooks => (
                format!("{}/books/v1/volumes", self.google_url),
                vec![("q", format!("isbn:{isbn}"))],
            ),
            Provider::OpenLibrary => (
                format!("{}/api/books", self.openlibrary_url),
                vec![
                    ("bibkeys", format!("ISBN:{isbn}")),
                    ("format", "json".to_string()),
                    ("jscmd", "data".to_string()),
                ],
            ),
        };

        let body = retry_throttled(NAME, &self.limiter, &self.retry, || self.get_json(&url, &params)).await?;

        Ok(match provider {
            Provider::GoogleBooks => from_google_books(entry, &body)?,
            Provider::OpenLibrary => from_open_library(entry, &body, isbn),
        })
    }
}

fn from_google_books(entry: &Entry, body: &Value) -> Result<Option<Suggestion>, RetrievalError> {
    let items = body.get("items").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    let info = match items {
        [] => return Ok(None),
        [only] => only
            .get("volumeInfo")
            .ok_or_else(|| RetrievalError::parse("volume without volumeInfo"))?,
        _ => {
            return Err(RetrievalError::Provider(
                "ISBN search did not return exactly one result".to_string(),
            ))
        }
    };

    let mut s = Suggestion::new(Provider::GoogleBooks.source_name(), entry);
    if let Some(title) = json_str(info, "title") {
        s.add_field("title", title);
    }
    for author in info.get("authors").map(json_strings).unwrap_or_default() {
        let person = person_from_name(&author);
        s.add_author(person.first, person.last);
    }
    if let Some(publisher) = json_str(info, "publisher") {
        s.add_field("publisher", publisher);
    }
    if let Some(year) = json_str(info, "publishedDate").and_then(|d| d.get(..4)) {
        s.add_field("year", year);
    }
    for id in info.get("industryIdentifiers").and_then(Value::as_array).into_iter().flatten() {
        if json_str(id, "type") == Some("ISBN_13") {
            if let Some(isbn) = json_str(id, "identifier") {
                s.add_field("isbn", isbn);
            }
        }
    }
    Ok(Some(s))
}

fn from_open_library(entry: &Entry, body: &Value, isbn: &str) -> Option<Suggestion> {
    let record = body.get(format!("ISBN:{isbn}"))?;

    let mut s = Suggestion::new(Provider::OpenLibrary.source_name(), entry);
    if let Some(title) = json_str(record, "title") {
        s.add_field("title", title);
    }
    for author in record.get("authors").and_then(Value::as_array).into_iter().flatten() {
        if let Some(name) = json_str(author, "name") {
            let person = person_from_name(name);
            s.add_author(person.first, person.last);
        }
    }
    for publisher in record.get("publishers").and_then(Value::as_array).into_iter().flatten() {
        if let Some(name) = json_str(publisher, "name") {
            s.add_field("publisher", name);
        }
    }
    if let Some(date) = json_str(record, "publish_date") {
        if let Some(year) = date.split_whitespace().find(|w| w.len() == 4 && w.chars().all(|c| c.is_ascii_digit())) {
            s.add_field("year", year);
        }
    }
    for value in record.pointer("/identifiers/isbn_13").map(json_strings).unwrap_or_default() {
        s.add_field("isbn", value);
    }
    Some(s)
}

#[async_trait]
impl SourceAdapter for IsbnSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn subtask(&self) -> &'static str {
        "ISBNQuery"
    }

    async fn query(&self, entry: &Entry) -> Retrieval {
        let Some(raw) = entry.non_empty_field("isbn") else {
            return Retrieval::skipped();
        };
        let Some(isbn) = normalize_isbn(raw) else {
            return Retrieval::failed(RetrievalError::Provider(format!("{raw} is not a valid ISBN.")));
        };

        let (google, openlibrary) = futures::join!(
            self.lookup(Provider::GoogleBooks, entry, &isbn),
            self.lookup(Provider::OpenLibrary, entry, &isbn),
        );

        let mut retrieval = Retrieval::skipped();
        let mut failures = Vec::new();
        for (provider, result) in [(Provider::GoogleBooks, google), (Provider::OpenLibrary, openlibrary)] {
            match result {
                Ok(Some(s)) => retrieval.suggestions.push(s),
                Ok(None) => {}
                Err(e) => failures.push(format!("{}: {e}", provider.source_name())),
            }
        }
        if !failures.is_empty() {
            retrieval.error = Some(RetrievalError::Provider(failures.join("; ")));
        }
        retrieval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_isbn() {
        assert_eq!(normalize_isbn("978-3-16-148410-0").as_deref(), Some("9783161484100"));
        assert_eq!(normalize_isbn("0-306-40615-x").as_deref(), Some("030640615X"));
        assert_eq!(normalize_isbn("12345"), None);
        assert_eq!(normalize_isbn(""), None);
        assert_eq!(normalize_isbn("97831614841X0"), None);
    }

    #[test]
    fn test_google_books_mapping() {
        let entry = Entry::builder("x").build();
        let body = json!({
            "totalItems": 1,
            "items": [{"volumeInfo": {
                "title": "The Art of Computer Programming",
                "authors": ["Donald E. Knuth"],
                "publisher": "Addison-Wesley",
                "publishedDate": "1997-07-01",
                "industryIdentifiers": [
                    {"type": "ISBN_10", "identifier": "0201896834"},
                    {"type": "ISBN_13", "identifier": "9780201896831"}
                ]
            }}]
        });

        let s = from_google_books(&entry, &body).unwrap().unwrap();
        assert_eq!(s.source, "isbn_goob");
        assert_eq!(s.first("year"), Some("1997"));
        assert_eq!(s.first("isbn"), Some("9780201896831"));
        assert_eq!(s.authors[0].last, "Knuth");

        assert_eq!(from_google_books(&entry, &json!({"totalItems": 0})).unwrap(), None);
    }

    #[test]
    fn test_open_library_mapping() {
        let entry = Entry::builder("x").build();
        let body = json!({"ISBN:9780201896831": {
            "title": "The Art of Computer Programming",
            "authors": [{"name": "Donald Knuth"}],
            "publishers": [{"name": "Addison-Wesley"}],
            "publish_date": "July 1997"
        }});

        let s = from_open_library(&entry, &body, "9780201896831").unwrap();
        assert_eq!(s.source, "isbn_openl");
        assert_eq!(s.first("publisher"), Some("Addison-Wesley"));
        assert_eq!(s.first("year"), Some("1997"));
        assert!(from_open_library(&entry, &json!({}), "9780201896831").is_none());
    }
}
