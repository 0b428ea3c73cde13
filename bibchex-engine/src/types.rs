//! Core data types for bibchex-engine
//!
//! - [`Entry`]: one bibliographic record, immutable once built
//! - [`Suggestion`]: field values a source proposes for an entry
//! - [`Finding`] / [`Problem`]: what consistency checks report
//!
//! Entries come from a parsing collaborator. Here they are built either with
//! [`Entry::builder`] or deserialized from JSON:
//!
//! ```json
//! {
//!   "id": "knuth84",
//!   "type": "article",
//!   "fields": { "title": "Literate Programming", "journal": "The Computer Journal" },
//!   "authors": [{ "first": "Donald E.", "last": "Knuth" }]
//! }
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Prefix of fields that carry per-entry tool options instead of data
const OPTION_PREFIX: &str = "bibchex-";

/// Matches doi.org links and captures the DOI
static DOI_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://(dx\.)?doi\.org/(?P<doi>.+)$").expect("valid regex"));

/// Whether a URL points to a doi.org resolver
pub fn is_doi_url(url: &str) -> bool {
    DOI_URL_RE.is_match(url)
}

/// Parse a boolean entry option ("1", "true", "yes", case-insensitive)
pub fn parse_bool(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

static PARTIAL_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<y>\d{4})(?:[-/](?P<m>\d{1,2})(?:[-/](?P<d>\d{1,2}))?)?$").expect("valid regex")
});

/// Date with optional month and day ("2019", "2019-05", "2019-05-03")
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl PartialDate {
    /// Parse `Y`, `Y-M` or `Y-M-D` (`/` also accepted as separator)
    ///
    /// Month and day must form a real calendar date.
    pub fn parse(s: &str) -> Option<Self> {
        let caps = PARTIAL_DATE_RE.captures(s.trim())?;
        let year: i32 = caps["y"].parse().ok()?;
        let month: Option<u32> = caps.name("m").and_then(|m| m.as_str().parse().ok());
        let day: Option<u32> = caps.name("d").and_then(|d| d.as_str().parse().ok());

        chrono::NaiveDate::from_ymd_opt(year, month.unwrap_or(1), day.unwrap_or(1))?;
        Some(Self { year, month, day })
    }
}

/// Author or editor name split into given and family part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub first: String,
    pub last: String,
}

impl Person {
    pub fn new(first: impl Into<String>, last: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            last: last.into(),
        }
    }

    /// "First Last", or just the last name if there is no given name
    pub fn full_name(&self) -> String {
        if self.first.is_empty() {
            self.last.clone()
        } else {
            format!("{} {}", self.first, self.last)
        }
    }
}

/// Serialized form of an entry, as produced by the parsing collaborator
#[derive(Debug, Deserialize)]
struct RawEntry {
    id: String,
    #[serde(rename = "type", default = "default_entry_type")]
    entry_type: String,
    #[serde(default)]
    fields: BTreeMap<String, String>,
    #[serde(default)]
    authors: Vec<Person>,
    #[serde(default)]
    editors: Vec<Person>,
    #[serde(default)]
    options: BTreeMap<String, String>,
}

fn default_entry_type() -> String {
    "misc".to_string()
}

/// One bibliographic record
///
/// Field names and option names are lower-cased on construction. Fields named
/// `bibchex-<option>` are moved into the option map. The DOI implied by a
/// doi.org `url` is deduced once, here, when no `doi` field is present.
///
/// Nothing in the engine mutates an entry. DOI discovery produces an enriched
/// copy through [`Entry::with_suggested_dois`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawEntry")]
pub struct Entry {
    id: String,
    entry_type: String,
    fields: BTreeMap<String, String>,
    authors: Vec<Person>,
    editors: Vec<Person>,
    options: BTreeMap<String, String>,
    deduced_doi: Option<String>,
    suggested_dois: Vec<String>,
    ignored_problems: BTreeSet<String>,
}

impl From<RawEntry> for Entry {
    fn from(raw: RawEntry) -> Self {
        let mut fields = BTreeMap::new();
        let mut options: BTreeMap<String, String> = raw
            .options
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();

        for (key, value) in raw.fields {
            let key = key.to_lowercase();
            match key.strip_prefix(OPTION_PREFIX) {
                Some(option) => {
                    options.insert(option.to_string(), value);
                }
                None => {
                    fields.insert(key, value);
                }
            }
        }

        let has_doi = fields.get("doi").is_some_and(|doi| !doi.trim().is_empty());
        let deduced_doi = if has_doi {
            None
        } else {
            fields
                .get("url")
                .and_then(|url| DOI_URL_RE.captures(url.trim()))
                .map(|caps| caps["doi"].to_string())
        };

        let ignored_problems = options
            .get("ignore-problems")
            .map(|list| {
                list.split(';')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Entry {
            id: raw.id,
            entry_type: raw.entry_type.to_lowercase(),
            fields,
            authors: raw.authors,
            editors: raw.editors,
            options,
            deduced_doi,
            suggested_dois: Vec::new(),
            ignored_problems,
        }
    }
}

impl Entry {
    /// Start building an entry with the given key
    pub fn builder(id: impl Into<String>) -> EntryBuilder {
        EntryBuilder {
            raw: RawEntry {
                id: id.into(),
                entry_type: default_entry_type(),
                fields: BTreeMap::new(),
                authors: Vec::new(),
                editors: Vec::new(),
                options: BTreeMap::new(),
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entry_type(&self) -> &str {
        &self.entry_type
    }

    /// Field value, looked up by lower-case name
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Non-empty field value
    pub fn non_empty_field(&self, name: &str) -> Option<&str> {
        self.field(name).filter(|v| !v.trim().is_empty())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn authors(&self) -> &[Person] {
        &self.authors
    }

    pub fn editors(&self) -> &[Person] {
        &self.editors
    }

    /// Per-entry option override, without the `bibchex-` prefix
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    /// DOI from the `doi` field, or deduced from a doi.org URL
    ///
    /// A blank `doi` field counts as absent.
    pub fn doi(&self) -> Option<&str> {
        self.non_empty_field("doi")
            .map(str::trim)
            .or(self.deduced_doi.as_deref())
    }

    /// Whether the entry carries a non-blank `doi` field
    pub fn has_doi_field(&self) -> bool {
        self.non_empty_field("doi").is_some()
    }

    /// DOI deduced from the URL (only set when the `doi` field is missing or blank)
    pub fn deduced_doi(&self) -> Option<&str> {
        self.deduced_doi.as_deref()
    }

    /// DOIs proposed by DOI discovery
    pub fn suggested_dois(&self) -> &[String] {
        &self.suggested_dois
    }

    /// Best DOI guess: the known DOI, else the most frequently suggested one
    ///
    /// Ties go to the suggestion seen first.
    pub fn probable_doi(&self) -> Option<&str> {
        if let Some(doi) = self.doi() {
            return Some(doi);
        }

        let mut best: Option<(&str, usize)> = None;
        for candidate in self.suggested_dois.iter().filter(|d| !d.trim().is_empty()) {
            let count = self
                .suggested_dois
                .iter()
                .filter(|d| *d == candidate)
                .count();
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((candidate.as_str(), count));
            }
        }
        best.map(|(doi, _)| doi)
    }

    /// Whether DOI discovery is disabled for this entry (`bibchex-nodoi`)
    pub fn nodoi(&self) -> bool {
        self.option("nodoi").is_some_and(parse_bool)
    }

    /// Whether the entry asks to suppress problems of this kind
    pub fn ignores_problem(&self, kind: &str) -> bool {
        self.ignored_problems.contains(&kind.to_lowercase())
    }

    /// Copy of this entry carrying additional suggested DOIs
    pub fn with_suggested_dois(&self, dois: impl IntoIterator<Item = String>) -> Entry {
        let mut enriched = self.clone();
        enriched.suggested_dois.extend(dois);
        enriched
    }
}

/// Builder for [`Entry`], mostly used by tests and the JSON loader's callers
pub struct EntryBuilder {
    raw: RawEntry,
}

impl EntryBuilder {
    pub fn entry_type(mut self, entry_type: impl Into<String>) -> Self {
        self.raw.entry_type = entry_type.into();
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.raw.fields.insert(name.into(), value.into());
        self
    }

    pub fn author(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.raw.authors.push(Person::new(first, last));
        self
    }

    pub fn editor(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.raw.editors.push(Person::new(first, last));
        self
    }

    pub fn option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.raw.options.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> Entry {
        Entry::from(self.raw)
    }
}

/// Field values a source proposes for one entry
///
/// A field may carry several values (e.g. Crossref returns title lists).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    /// Producing source ("crossref", "isbn_openl", ...)
    pub source: String,
    /// Entry the suggestion is for
    pub entry_id: String,
    pub fields: BTreeMap<String, Vec<String>>,
    pub authors: Vec<Person>,
    pub editors: Vec<Person>,
}

impl Suggestion {
    pub fn new(source: impl Into<String>, entry: &Entry) -> Self {
        Self {
            source: source.into(),
            entry_id: entry.id().to_string(),
            fields: BTreeMap::new(),
            authors: Vec::new(),
            editors: Vec::new(),
        }
    }

    /// Append a value to a field; blank values are dropped
    pub fn add_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if value.trim().is_empty() {
            return;
        }
        self.fields.entry(key.into()).or_default().push(value);
    }

    pub fn add_author(&mut self, first: impl Into<String>, last: impl Into<String>) {
        self.authors.push(Person::new(first, last));
    }

    pub fn add_editor(&mut self, first: impl Into<String>, last: impl Into<String>) {
        self.editors.push(Person::new(first, last));
    }

    /// First value of a field
    pub fn first(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.authors.is_empty() && self.editors.is_empty()
    }
}

/// One issue reported by a check, before it is attributed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub kind: String,
    pub message: String,
    pub details: String,
}

impl Finding {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            details: String::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

/// A finding attributed to a check and (unless document-wide) an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    /// `None` for document-wide problems
    pub entry_id: Option<String>,
    /// Name of the reporting check
    pub source: String,
    pub kind: String,
    pub message: String,
    pub details: String,
}

impl Problem {
    pub fn for_entry(entry_id: &str, source: &str, finding: Finding) -> Self {
        Self {
            entry_id: Some(entry_id.to_string()),
            source: source.to_string(),
            kind: finding.kind,
            message: finding.message,
            details: finding.details,
        }
    }

    pub fn global(source: &str, finding: Finding) -> Self {
        Self {
            entry_id: None,
            source: source.to_string(),
            kind: finding.kind,
            message: finding.message,
            details: finding.details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doi_deduced_from_url() {
        let entry = Entry::builder("DOIfromURL")
            .field("url", "https://dx.doi.org/10.1000/1234")
            .build();

        assert_eq!(entry.deduced_doi(), Some("10.1000/1234"));
        assert_eq!(entry.doi(), Some("10.1000/1234"));
        assert_eq!(entry.field("doi"), None);
    }

    #[test]
    fn test_doi_field_wins_over_url() {
        let entry = Entry::builder("withDOI")
            .field("doi", "10.1000/field")
            .field("url", "https://doi.org/10.1000/url")
            .build();

        assert_eq!(entry.deduced_doi(), None);
        assert_eq!(entry.doi(), Some("10.1000/field"));
    }

    #[test]
    fn test_blank_doi_field_counts_as_missing() {
        let blank = Entry::builder("blank").field("doi", "  ").build();
        assert!(!blank.has_doi_field());
        assert_eq!(blank.doi(), None);
        assert_eq!(blank.probable_doi(), None);

        let with_url = Entry::builder("blankWithURL")
            .field("doi", "")
            .field("url", "https://doi.org/10.1000/url")
            .build();
        assert_eq!(with_url.doi(), Some("10.1000/url"));

        let padded = Entry::builder("padded").field("doi", " 10.1000/x ").build();
        assert_eq!(padded.doi(), Some("10.1000/x"));
    }

    #[test]
    fn test_probable_doi_majority_vote() {
        let entry = Entry::builder("x").build().with_suggested_dois(vec![
            "10.1/a".to_string(),
            "10.1/b".to_string(),
            "10.1/b".to_string(),
        ]);
        assert_eq!(entry.probable_doi(), Some("10.1/b"));

        let tie = Entry::builder("y")
            .build()
            .with_suggested_dois(vec!["10.1/first".to_string(), "10.1/second".to_string()]);
        assert_eq!(tie.probable_doi(), Some("10.1/first"));
    }

    #[test]
    fn test_option_fields_are_lifted() {
        let entry = Entry::builder("x")
            .field("Title", "Something")
            .field("bibchex-nodoi", "yes")
            .field("bibchex-ignore-problems", "Missing_DOI; doi_url")
            .build();

        assert_eq!(entry.field("title"), Some("Something"));
        assert!(!entry.has_field("bibchex-nodoi"));
        assert!(entry.nodoi());
        assert!(entry.ignores_problem("missing_doi"));
        assert!(entry.ignores_problem("DOI_URL"));
        assert!(!entry.ignores_problem("dead_url"));
    }

    #[test]
    fn test_entry_from_json() {
        let entry: Entry = serde_json::from_str(
            r#"{
                "id": "knuth84",
                "type": "Article",
                "fields": { "Journal": "The Computer Journal" },
                "authors": [{ "first": "Donald E.", "last": "Knuth" }]
            }"#,
        )
        .unwrap();

        assert_eq!(entry.entry_type(), "article");
        assert_eq!(entry.field("journal"), Some("The Computer Journal"));
        assert_eq!(entry.authors()[0].full_name(), "Donald E. Knuth");
        assert!(entry.editors().is_empty());
    }

    #[test]
    fn test_partial_date() {
        assert_eq!(
            PartialDate::parse("2019"),
            Some(PartialDate { year: 2019, month: None, day: None })
        );
        assert_eq!(PartialDate::parse("2019-05").unwrap().month, Some(5));
        assert_eq!(PartialDate::parse("2019/05/03").unwrap().day, Some(3));
        assert_eq!(PartialDate::parse("2019-13"), None);
        assert_eq!(PartialDate::parse("2019-02-30"), None);
        assert_eq!(PartialDate::parse("May 2019"), None);
    }

    #[test]
    fn test_suggestion_drops_blank_values() {
        let entry = Entry::builder("x").build();
        let mut s = Suggestion::new("crossref", &entry);
        s.add_field("title", "  ");
        assert!(s.is_empty());
        s.add_field("title", "A");
        s.add_field("title", "B");
        assert_eq!(s.first("title"), Some("A"));
        assert_eq!(s.fields["title"].len(), 2);
    }
}
