//! Landing page `<meta>` tag scraper
//!
//! Publisher landing pages carry Highwire (`citation_*`) and Dublin Core
//! (`dc.*`) meta tags. The page is the DOI link when a DOI is known, else
//! the entry's URL. `http-equiv="refresh"` redirects are followed for a
//! bounded number of hops.

use super::http::transport_error;
use super::{person_from_name, retry_throttled, ProviderError, Retrieval, RetryPolicy, SourceAdapter};
use crate::error::RetrievalError;
use crate::rate_limit::RateLimiter;
use crate::types::{is_doi_url, Entry, PartialDate, Person, Suggestion};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub const NAME: &str = "meta";
pub const DEFAULT_DOI_RESOLVER: &str = "https://dx.doi.org";

/// Refresh redirects followed before giving up
pub const MAX_REDIRECTS: usize = 5;

static META_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<meta\b([^>]*)>").expect("valid regex"));
static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)([a-zA-Z_:.-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).expect("valid regex")
});
static REFRESH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*\d+\s*;\s*url\s*=\s*['"]?(?P<url>[^'"]*)['"]?\s*$"#).expect("valid regex")
});
static HTTP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^https?://").expect("valid regex"));

/// Meta tag name to entry field
fn map_tag(name: &str) -> Option<&'static str> {
    let field = match name {
        "dc.title" | "citation_title" => "title",
        "citation_publication_date" | "dc.issued" => "date",
        "citation_doi" | "dc.identifier" => "doi",
        "citation_author" | "dc.creator" => "author",
        "citation_volume" => "volume",
        "citation_issn" => "issn",
        "citation_publisher" => "publisher",
        "citation_journal_title" => "journal",
        "citation_conference_title" => "booktitle",
        _ => return None,
    };
    Some(field)
}

/// What a page told us
#[derive(Debug, Default, PartialEq)]
pub struct PageMeta {
    /// Target of a refresh redirect, unresolved
    pub refresh: Option<String>,
    pub fields: Vec<(String, String)>,
    pub authors: Vec<Person>,
}

/// Extract mapped meta tags and any refresh redirect from an HTML page
pub fn parse_page(html: &str) -> Result<PageMeta, RetrievalError> {
    let mut page = PageMeta::default();

    for tag in META_TAG_RE.captures_iter(html) {
        let mut name = None;
        let mut content = None;
        let mut is_refresh = false;

        for attr in ATTR_RE.captures_iter(&tag[1]) {
            let key = attr[1].to_lowercase();
            let value = attr
                .get(2)
                .or_else(|| attr.get(3))
                .or_else(|| attr.get(4))
                .map(|m| decode_entities(m.as_str()))
                .unwrap_or_default();
            match key.as_str() {
                "name" => name = Some(value.to_lowercase()),
                "content" => content = Some(value),
                "http-equiv" => is_refresh = value.eq_ignore_ascii_case("refresh"),
                _ => {}
            }
        }

        let Some(content) = content else { continue };

        if is_refresh {
            let caps = REFRESH_RE
                .captures(&content)
                .ok_or_else(|| RetrievalError::parse("Did not understand meta refresh redirect"))?;
            page.refresh = Some(caps["url"].trim().to_string());
            return Ok(page);
        }

        match name.as_deref().and_then(map_tag) {
            Some("author") => page.authors.push(person_from_name(&content)),
            Some("date") => match PartialDate::parse(&content) {
                Some(date) => {
                    page.fields.push(("year".to_string(), date.year.to_string()));
                    if let Some(month) = date.month {
                        page.fields.push(("month".to_string(), month.to_string()));
                    }
                    if let Some(day) = date.day {
                        page.fields.push(("day".to_string(), day.to_string()));
                    }
                }
                None => page.fields.push(("date".to_string(), content)),
            },
            Some(field) => page.fields.push((field.to_string(), content)),
            None => {}
        }
    }

    Ok(page)
}

/// Decode character references in an attribute value
///
/// Numeric references (`&#8211;`, `&#x2013;`) and the XML entities are
/// handled by quick-xml, plus a few HTML entities seen in citation tags.
/// A value that does not decode (a bare `&`) is kept verbatim.
fn decode_entities(s: &str) -> String {
    quick_xml::escape::unescape_with(s, html_entity)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

fn html_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "nbsp" => "\u{a0}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        _ => return None,
    })
}

/// Resolve a redirect target against the page it came from
pub fn resolve_redirect(base: &str, target: &str) -> Result<String, RetrievalError> {
    let base = Url::parse(base).map_err(RetrievalError::parse)?;
    base.join(target)
        .map(String::from)
        .map_err(RetrievalError::parse)
}

pub struct MetaSource {
    client: reqwest::Client,
    doi_resolver: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl MetaSource {
    pub fn new(client: reqwest::Client, limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self {
            client,
            doi_resolver: DEFAULT_DOI_RESOLVER.to_string(),
            limiter,
            retry,
        }
    }

    /// Base URL DOI links are built from
    pub fn with_doi_resolver_url(mut self, url: impl Into<String>) -> Self {
        self.doi_resolver = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Landing page to scrape, if any
    pub fn start_url(&self, entry: &Entry) -> Option<String> {
        if let Some(doi) = entry.probable_doi() {
            return Some(format!("{}/{}", self.doi_resolver, doi));
        }

        let url = entry.non_empty_field("url")?.trim();
        if is_doi_url(url) {
            return None;
        }
        if HTTP_RE.is_match(url) {
            Some(url.to_string())
        } else {
            Some(format!("http://{url}"))
        }
    }

    /// Fetch a page; returns the final URL (after HTTP redirects) and the body
    async fn fetch_page(&self, url: &str) -> Result<(String, String), ProviderError> {
        debug!(url = %url, "Fetching landing page");
        let response = self.client.get(url).send().await.map_err(transport_error)?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::Throttled);
        }
        if status != StatusCode::OK {
            return Err(ProviderError::Failed(RetrievalError::Provider(format!(
                "Accessing URL {url} returns status {}",
                status.as_u16()
            ))));
        }

        let final_url = response.url().to_string();
        let body = response.text().await.map_err(transport_error)?;
        Ok((final_url, body))
    }

    async fn scrape(&self, entry: &Entry, start: String) -> Result<Option<Suggestion>, RetrievalError> {
        let mut url = start;

        for _ in 0..=MAX_REDIRECTS {
            let (final_url, html) =
                retry_throttled(NAME, &self.limiter, &self.retry, || self.fetch_page(&url)).await?;
            let page = parse_page(&html)?;

            if let Some(target) = page.refresh {
                url = resolve_redirect(&final_url, &target)?;
                debug!(entry = %entry.id(), url = %url, "Following meta refresh");
                continue;
            }

            let mut s = Suggestion::new(NAME, entry);
            for (field, value) in page.fields {
                s.add_field(field, value);
            }
            for person in page.authors {
                s.add_author(person.first, person.last);
            }
            return Ok(Some(s));
        }

        Err(RetrievalError::Provider(format!(
            "More than {MAX_REDIRECTS} meta refresh redirects"
        )))
    }
}

#[async_trait]
impl SourceAdapter for MetaSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn subtask(&self) -> &'static str {
        "MetaQuery"
    }

    async fn query(&self, entry: &Entry) -> Retrieval {
        let Some(url) = self.start_url(entry) else {
            return Retrieval::skipped();
        };
        Retrieval::from_result(self.scrape(entry, url).await)
    }
}
