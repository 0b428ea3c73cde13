//! Author and editor name checks
//!
//! Each check runs over authors and editors alike; messages name the role.

use super::{CheckPlugin, RunContext};
use crate::error::CheckError;
use crate::types::{Entry, Finding, Person};
use async_trait::async_trait;

fn has_lower(s: &str) -> bool {
    s.chars().any(char::is_lowercase)
}

fn upper_count(s: &str) -> usize {
    s.chars().filter(|c| c.is_uppercase()).count()
}

/// Apply `f` to every author, then every editor, collecting its messages
fn each_person<I>(entry: &Entry, mut f: impl FnMut(&'static str, &Person) -> I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let authors = entry.authors().iter().map(|p| ("Author", p));
    let editors = entry.editors().iter().map(|p| ("Editor", p));
    authors.chain(editors).flat_map(|(role, p)| f(role, p)).collect()
}

fn findings(kind: &str, messages: Vec<String>) -> Vec<Finding> {
    messages.into_iter().map(|m| Finding::new(kind, m)).collect()
}

/// Initials dotted (or not) as option `author_initial_want_dotted` asks
pub struct InitialDotted;

#[async_trait]
impl CheckPlugin for InitialDotted {
    fn name(&self) -> &'static str {
        "author_initial_dotted"
    }

    async fn check(&self, entry: &Entry, ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        let want_dotted = ctx
            .options()
            .get_bool("author_initial_want_dotted", Some(entry), true)?;

        let messages = each_person(entry, |role, person| {
            person
                .first
                .split(' ')
                .chain(person.last.split(' '))
                .filter(|w| !w.is_empty() && !has_lower(w))
                .filter_map(|initial| {
                    if want_dotted && !initial.ends_with('.') {
                        Some(format!(
                            "{role} {} {} seems to have an undotted initial.",
                            person.first, person.last
                        ))
                    } else if !want_dotted && initial.contains('.') {
                        Some(format!(
                            "{role} {} {} seems to have a dotted initial.",
                            person.first, person.last
                        ))
                    } else {
                        None
                    }
                })
                .collect::<Vec<_>>()
        });
        Ok(findings(self.name(), messages))
    }
}

/// Given or family name written in capitals
pub struct AllcapsName;

#[async_trait]
impl CheckPlugin for AllcapsName {
    fn name(&self) -> &'static str {
        "author_names_allcaps"
    }

    async fn check(&self, entry: &Entry, _ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        // A single capital is an initial, not all-caps
        let allcaps = |name: &str| !has_lower(name) && upper_count(name) > 1;
        let messages = each_person(entry, |role, person| {
            let first = allcaps(&person.first).then(|| {
                format!(
                    "{role} '{} {}' seems to have an all-caps first name.",
                    person.first, person.last
                )
            });
            let last = allcaps(&person.last).then(|| {
                format!(
                    "{role} '{} {}' seems to have an all-caps last name.",
                    person.first, person.last
                )
            });
            first.into_iter().chain(last)
        });
        Ok(findings(self.name(), messages))
    }
}

/// First given name abbreviated or in capitals
pub struct FirstNameInitial;

#[async_trait]
impl CheckPlugin for FirstNameInitial {
    fn name(&self) -> &'static str {
        "author_names_firstinitial"
    }

    async fn check(&self, entry: &Entry, _ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        let messages = each_person(entry, |role, p| {
            let first = p.first.split(' ').find(|t| !t.is_empty())?;
            (!has_lower(first)).then(|| {
                format!(
                    "{role} '{} {}' seems to have a first name that is in abbreviated or all-caps.",
                    p.first, p.last
                )
            })
        });
        Ok(findings(self.name(), messages))
    }
}

/// Middle names abbreviated or in capitals
pub struct MiddleNameInitial;

#[async_trait]
impl CheckPlugin for MiddleNameInitial {
    fn name(&self) -> &'static str {
        "author_names_middleinitial"
    }

    async fn check(&self, entry: &Entry, _ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        let messages = each_person(entry, |role, p| {
            let tokens: Vec<&str> = p.first.split(' ').filter(|t| !t.is_empty()).collect();
            if tokens.len() < 2 {
                return None;
            }
            let middle = tokens[1..].join(" ");
            (!has_lower(&middle)).then(|| {
                format!(
                    "{role} '{} {}' seems to have a middle name that is in abbreviated or all-caps.",
                    p.first, p.last
                )
            })
        });
        Ok(findings(self.name(), messages))
    }
}

/// Family name abbreviated or in capitals
pub struct LastNameInitial;

#[async_trait]
impl CheckPlugin for LastNameInitial {
    fn name(&self) -> &'static str {
        "author_names_lastinitial"
    }

    async fn check(&self, entry: &Entry, _ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        let messages = each_person(entry, |role, p| {
            (!has_lower(&p.last)).then(|| {
                format!(
                    "{role} '{} {}' seems to have a last name that is in abbreviated or all-caps.",
                    p.first, p.last
                )
            })
        });
        Ok(findings(self.name(), messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::CheckRegistry;
    use crate::options::CheckOptions;
    use crate::worker_pool::WorkerPool;
    use std::sync::Arc;

    fn ctx(options: &str) -> RunContext {
        let table: toml::Table = toml::from_str(options).unwrap();
        RunContext::new(
            &CheckRegistry::with_defaults(),
            Arc::new(CheckOptions::from_table(&table).unwrap()),
            WorkerPool::new(1).unwrap(),
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn test_initial_dotted() {
        let entry = Entry::builder("a")
            .author("Donald E", "Knuth")
            .editor("A. M.", "Turing")
            .build();

        let dotted = InitialDotted.check(&entry, &ctx("")).await.unwrap();
        assert_eq!(dotted.len(), 1);
        assert!(dotted[0].message.starts_with("Author Donald E Knuth"));

        let undotted = InitialDotted
            .check(&entry, &ctx("author_initial_want_dotted = false\n"))
            .await
            .unwrap();
        assert_eq!(undotted.len(), 2);
        assert!(undotted.iter().all(|f| f.message.starts_with("Editor")));
    }

    #[tokio::test]
    async fn test_allcaps() {
        let entry = Entry::builder("a")
            .author("DONALD", "Knuth")
            .author("D.", "KNUTH")
            .editor("ADA", "LOVELACE")
            .build();
        let found = AllcapsName.check(&entry, &ctx("")).await.unwrap();
        assert_eq!(found.len(), 4);
        assert!(found[0].message.contains("all-caps first name"));
        assert!(found[1].message.contains("all-caps last name"));
        assert_eq!(found[2].message, "Editor 'ADA LOVELACE' seems to have an all-caps first name.");
        assert_eq!(found[3].message, "Editor 'ADA LOVELACE' seems to have an all-caps last name.");
    }

    #[tokio::test]
    async fn test_initial_checks() {
        let entry = Entry::builder("a")
            .author("D. Ervin", "Knuth")
            .author("Donald E.", "K")
            .author("", "Plato")
            .build();
        let ctx = ctx("");

        assert_eq!(FirstNameInitial.check(&entry, &ctx).await.unwrap().len(), 1);
        assert_eq!(MiddleNameInitial.check(&entry, &ctx).await.unwrap().len(), 1);
        let last = LastNameInitial.check(&entry, &ctx).await.unwrap();
        assert_eq!(last.len(), 1);
        assert!(last[0].message.contains("'Donald E. K'"));
    }
}
