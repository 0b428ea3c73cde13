use super::{CheckPlugin, RunContext};
use crate::error::CheckError;
use crate::types::{Entry, Finding};
use async_trait::async_trait;

/// Words with several capitals that are not protected by braces
///
/// BibTeX styles may lower-case titles; `{DNA}` survives, `DNA` does not.
pub struct TitleCapitalization;

#[async_trait]
impl CheckPlugin for TitleCapitalization {
    fn name(&self) -> &'static str {
        "title_capitalization"
    }

    async fn check(&self, entry: &Entry, _ctx: &RunContext) -> Result<Vec<Finding>, CheckError> {
        let title = entry.field("title").unwrap_or_default();

        Ok(title
            .split([' ', '-'])
            .filter(|w| !w.is_empty())
            .filter(|w| w.chars().filter(|c| c.is_uppercase()).count() > 1)
            .filter(|w| !(w.starts_with('{') && w.ends_with('}')))
            .map(|word| {
                Finding::new("unbraced_acronym", format!("Capitalization of '{word}' in the title is lost"))
                    .with_details(format!(
                        "The word '{word}' in the title contains multiple capital letters, indicating \
                         that capitalization is important. To preserve capitalization, the word \
                         should be in curly braces."
                    ))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::CheckRegistry;
    use crate::options::CheckOptions;
    use crate::worker_pool::WorkerPool;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unbraced_acronyms() {
        let ctx = RunContext::new(
            &CheckRegistry::new(),
            Arc::new(CheckOptions::default()),
            WorkerPool::new(1).unwrap(),
            reqwest::Client::new(),
        );
        let entry = Entry::builder("a")
            .field("title", "Sequencing DNA with {RNA}-Seq and CRISPR-Cas9")
            .build();

        let found = TitleCapitalization.check(&entry, &ctx).await.unwrap();
        let words: Vec<_> = found.iter().map(|f| f.message.as_str()).collect();

        assert_eq!(
            words,
            vec![
                "Capitalization of 'DNA' in the title is lost",
                "Capitalization of 'CRISPR' in the title is lost",
            ]
        );
        assert!(found.iter().all(|f| f.kind == "unbraced_acronym"));
    }
}
