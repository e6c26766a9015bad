use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One historical version of an article, as harvested and as persisted.
///
/// On disk the timestamp is stored as Unix epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

/// A revision after normalization; the unit of the final corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanedRevision {
    pub timestamp: i64,
    pub content: String,
}

/// Revision record of the dump-export variant. The timestamp is kept in the
/// API's string form because the export schema expects it verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRevision {
    pub id: u64,
    pub timestamp: String,
    pub user: String,
    pub user_id: u64,
    pub content: String,
}

/// One page of API results.
#[derive(Debug, Clone)]
pub struct RevisionPage<R> {
    pub revisions: Vec<R>,
    /// `None` on the terminal page
    pub continuation: Option<String>,
    /// Revisions removed from this page for missing required fields
    pub dropped: u64,
}

impl<R> RevisionPage<R> {
    pub fn is_last(&self) -> bool {
        self.continuation.is_none()
    }
}

/// Article identity shared by every artifact name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub lang: String,
    pub title: String,
}

impl Article {
    pub fn new(lang: &str, title: &str) -> Self {
        Self {
            lang: lang.to_string(),
            title: title.to_string(),
        }
    }

    /// `<article>_<lang>.json`
    pub fn collection_file(&self) -> String {
        format!("{}_{}.json", self.file_stem(), self.lang)
    }

    /// `<article>_<lang>_clean.json`
    pub fn clean_file(&self) -> String {
        format!("{}_{}_clean.json", self.file_stem(), self.lang)
    }

    /// `<article>_<lang>.xml`
    pub fn dump_file(&self) -> String {
        format!("{}_{}.xml", self.file_stem(), self.lang)
    }

    /// Titles may contain `/` (subpages); keep file names flat.
    fn file_stem(&self) -> String {
        self.title.replace(['/', '\\'], "_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn revision_persists_epoch_seconds() {
        let rev = Revision {
            timestamp: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            content: "Hello [1] 2020 world".to_string(),
        };
        let json = serde_json::to_string(&rev).unwrap();
        assert_eq!(
            json,
            r#"{"timestamp":1577836800,"content":"Hello [1] 2020 world"}"#
        );
    }

    #[test]
    fn revision_reads_back_from_epoch() {
        let rev: Revision =
            serde_json::from_str(r#"{"timestamp":1577836800,"content":"x"}"#).unwrap();
        assert_eq!(rev.timestamp.timestamp(), 1577836800);
    }

    #[test]
    fn article_file_names() {
        let article = Article::new("en", "Ladilla_Rusa");
        assert_eq!(article.collection_file(), "Ladilla_Rusa_en.json");
        assert_eq!(article.clean_file(), "Ladilla_Rusa_en_clean.json");
        assert_eq!(article.dump_file(), "Ladilla_Rusa_en.xml");
    }

    #[test]
    fn article_file_names_flatten_subpages() {
        let article = Article::new("en", "AC/DC");
        assert_eq!(article.collection_file(), "AC_DC_en.json");
    }

    #[test]
    fn last_page_has_no_continuation() {
        let page: RevisionPage<Revision> = RevisionPage {
            revisions: Vec::new(),
            continuation: None,
            dropped: 0,
        };
        assert!(page.is_last());
    }
}
