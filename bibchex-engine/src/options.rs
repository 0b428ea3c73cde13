//! Entry-scoped check options
//!
//! Options come from the `[checks]` table of the config file. A value is
//! resolved per entry, first match wins:
//!
//! 1. The entry's own option override (`bibchex-<key>` field)
//! 2. The first `[[checks.sub]]` table whose selector matches the entry
//! 3. The top-level `[checks]` key
//! 4. The caller's default
//!
//! ```toml
//! [checks]
//! required = ["title", "author"]
//!
//! [[checks.sub]]
//! select_field = "entrytype"
//! select_re = "^book$"
//! required = ["title", "publisher"]
//! ```
//!
//! The pseudo-field `entrytype` selects on the entry type. `select_re` must
//! match at the start of the value. Sub tables nest: a `[[checks.sub.sub]]`
//! table is consulted before the keys of its parent sub table.

use crate::error::CheckError;
use crate::types::{parse_bool, Entry};
use regex::Regex;

type Result<T> = std::result::Result<T, CheckError>;

/// A `[[checks.sub]]` table with its compiled selector
///
/// A sub table may carry `sub` tables of its own; they refine it the same
/// way it refines its parent.
#[derive(Debug, Clone)]
struct SubConfig {
    field: String,
    pattern: Regex,
    options: CheckOptions,
}

impl SubConfig {
    /// Selector matches at the start of the field value
    fn matches(&self, entry: &Entry) -> bool {
        let value = if self.field == "entrytype" {
            Some(entry.entry_type())
        } else {
            entry.field(&self.field)
        };
        value.is_some_and(|v| self.pattern.is_match(v))
    }
}

/// Check options with per-entry resolution
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    top: toml::Table,
    subs: Vec<SubConfig>,
}

impl CheckOptions {
    /// Build from the raw `[checks]` table
    ///
    /// Fails if a `sub` table lacks a selector or carries an invalid regex.
    pub fn from_table(table: &toml::Table) -> Result<Self> {
        Self::parse(table, "checks")
    }

    fn parse(table: &toml::Table, path: &str) -> Result<Self> {
        let mut top = table.clone();
        let mut subs = Vec::new();

        if let Some(raw_subs) = top.remove("sub") {
            let toml::Value::Array(raw_subs) = raw_subs else {
                return Err(CheckError::config(format!("{path}.sub must be an array of tables")));
            };
            for (i, raw) in raw_subs.into_iter().enumerate() {
                let sub_path = format!("{path}.sub[{i}]");
                let toml::Value::Table(mut values) = raw else {
                    return Err(CheckError::config(format!("{sub_path} is not a table")));
                };
                let field = take_string(&mut values, "select_field", &sub_path)?;
                let re = take_string(&mut values, "select_re", &sub_path)?;
                // Anchored at the start, like a prefix match
                let pattern = Regex::new(&format!("^(?:{re})")).map_err(|e| {
                    CheckError::config(format!("{sub_path}.select_re is invalid: {e}"))
                })?;
                subs.push(SubConfig {
                    field: field.to_lowercase(),
                    pattern,
                    options: Self::parse(&values, &sub_path)?,
                });
            }
        }

        Ok(Self { top, subs })
    }

    /// Resolve the raw value for a key, or `None` if nothing sets it
    fn lookup<'a>(&'a self, key: &str, entry: Option<&'a Entry>) -> Option<Raw<'a>> {
        if let Some(v) = entry.and_then(|e| e.option(key)) {
            return Some(Raw::EntryOption(v));
        }
        self.lookup_table(key, entry).map(Raw::Toml)
    }

    /// Matching sub tables first, depth first in file order, then this level
    fn lookup_table(&self, key: &str, entry: Option<&Entry>) -> Option<&toml::Value> {
        entry
            .and_then(|entry| {
                self.subs
                    .iter()
                    .filter(|s| s.matches(entry))
                    .find_map(|s| s.options.lookup_table(key, Some(entry)))
            })
            .or_else(|| self.top.get(key))
    }

    pub fn get_bool(&self, key: &str, entry: Option<&Entry>, default: bool) -> Result<bool> {
        match self.lookup(key, entry) {
            None => Ok(default),
            Some(Raw::EntryOption(s)) => Ok(parse_bool(s)),
            Some(Raw::Toml(toml::Value::Boolean(b))) => Ok(*b),
            Some(Raw::Toml(other)) => Err(type_error(key, "a boolean", other)),
        }
    }

    pub fn get_f64(&self, key: &str, entry: Option<&Entry>, default: f64) -> Result<f64> {
        match self.lookup(key, entry) {
            None => Ok(default),
            Some(Raw::EntryOption(s)) => s.trim().parse().map_err(|_| {
                CheckError::config(format!("option '{key}' must be a number, got '{s}'"))
            }),
            Some(Raw::Toml(toml::Value::Float(f))) => Ok(*f),
            Some(Raw::Toml(toml::Value::Integer(i))) => Ok(*i as f64),
            Some(Raw::Toml(other)) => Err(type_error(key, "a number", other)),
        }
    }

    pub fn get_str(&self, key: &str, entry: Option<&Entry>, default: &str) -> Result<String> {
        match self.lookup(key, entry) {
            None => Ok(default.to_string()),
            Some(Raw::EntryOption(s)) => Ok(s.to_string()),
            Some(Raw::Toml(toml::Value::String(s))) => Ok(s.clone()),
            Some(Raw::Toml(other)) => Err(type_error(key, "a string", other)),
        }
    }

    /// List option; an entry override is split on `;`
    pub fn get_str_list(
        &self,
        key: &str,
        entry: Option<&Entry>,
        default: &[&str],
    ) -> Result<Vec<String>> {
        match self.lookup(key, entry) {
            None => Ok(default.iter().map(|s| s.to_string()).collect()),
            Some(Raw::EntryOption(s)) => Ok(s
                .split(';')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()),
            Some(Raw::Toml(toml::Value::Array(items))) => items
                .iter()
                .map(|item| match item {
                    toml::Value::String(s) => Ok(s.clone()),
                    other => Err(type_error(key, "a list of strings", other)),
                })
                .collect(),
            Some(Raw::Toml(other)) => Err(type_error(key, "a list of strings", other)),
        }
    }
}

enum Raw<'a> {
    EntryOption(&'a str),
    Toml(&'a toml::Value),
}

fn take_string(values: &mut toml::Table, key: &str, path: &str) -> Result<String> {
    match values.remove(key) {
        Some(toml::Value::String(s)) => Ok(s),
        _ => Err(CheckError::config(format!("{path} needs a string '{key}'"))),
    }
}

fn type_error(key: &str, expected: &str, got: &toml::Value) -> CheckError {
    CheckError::config(format!(
        "option '{key}' must be {expected}, got {}",
        got.type_str()
    ))
}
