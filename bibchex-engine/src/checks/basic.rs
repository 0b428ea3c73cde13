//! Field presence and identifier checks

use super::{CheckPlugin, RunContext};
use crate::error::CheckError;
use crate::types::{is_doi_url, Entry, Finding};
use async_trait::async_trait;
use tracing::debug;

/// Entry has no `doi` field, or a blank one
pub struct Doi;

#[async_trait]
impl CheckPlugin for Doi {
    fn name(&self) -> &'static str {
        "doi"
    }

    async fn check(&self, entry: &Entry, _ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        if entry.has_doi_field() {
            return Ok(Vec::new());
        }

        let details = if let Some(doi) = entry.doi() {
            format!("Suggested DOI: {doi}")
        } else if !entry.suggested_dois().is_empty() {
            format!("Suggested DOIs: {:?}", entry.suggested_dois())
        } else {
            String::new()
        };

        Ok(vec![Finding::new(self.name(), "Missing DOI").with_details(details)])
    }
}

/// `url` is a doi.org link
pub struct DoiUrl;

#[async_trait]
impl CheckPlugin for DoiUrl {
    fn name(&self) -> &'static str {
        "doi_url"
    }

    async fn check(&self, entry: &Entry, _ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        Ok(match entry.field("url") {
            Some(url) if is_doi_url(url.trim()) => vec![Finding::new(self.name(), "URL points to doi.org")],
            _ => Vec::new(),
        })
    }
}

/// `url` does not answer with a 2xx/3xx status
pub struct DeadUrl;

#[async_trait]
impl CheckPlugin for DeadUrl {
    fn name(&self) -> &'static str {
        "dead_url"
    }

    async fn check(&self, entry: &Entry, ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        let Some(url) = entry.non_empty_field("url") else {
            return Ok(Vec::new());
        };

        match ctx.http().get(url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if (200..400).contains(&status) {
                    Ok(Vec::new())
                } else {
                    Ok(vec![Finding::new(self.name(), "URL seems inaccessible").with_details(format!(
                        "Accessing URL '{url}' gives status code {status}"
                    ))])
                }
            }
            Err(e) => {
                debug!(entry = %entry.id(), url = %url, error = %e, "URL check failed to connect");
                Ok(vec![Finding::new(self.name(), "Could not connect to host")
                    .with_details(format!("Could not connect to the host for URL {url}."))])
            }
        }
    }
}

/// Whether a field counts as present; `author`/`editor` mean the people lists
fn has_field_or_people(entry: &Entry, field: &str) -> bool {
    match field {
        "author" => !entry.authors().is_empty(),
        "editor" => !entry.editors().is_empty(),
        _ => entry.has_field(field),
    }
}

/// Fields listed in option `required` are missing
pub struct RequiredFields;

#[async_trait]
impl CheckPlugin for RequiredFields {
    fn name(&self) -> &'static str {
        "required_fields"
    }

    async fn check(&self, entry: &Entry, ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        let required = ctx.options().get_str_list("required", Some(entry), &[])?;
        Ok(required
            .iter()
            .map(|f| f.to_lowercase())
            .filter(|f| !has_field_or_people(entry, f))
            .map(|f| Finding::new(self.name(), format!("Required field '{f}' missing")))
            .collect())
    }
}

/// Fields listed in option `forbidden_fields` are present
pub struct ForbiddenFields;

#[async_trait]
impl CheckPlugin for ForbiddenFields {
    fn name(&self) -> &'static str {
        "forbidden_fields"
    }

    async fn check(&self, entry: &Entry, ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        let forbidden = ctx.options().get_str_list("forbidden_fields", Some(entry), &[])?;
        Ok(forbidden
            .iter()
            .map(|f| f.to_lowercase())
            .filter(|f| has_field_or_people(entry, f))
            .map(|f| Finding::new(self.name(), format!("Forbidden field '{f}' present")))
            .collect())
    }
}
