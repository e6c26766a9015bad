//! Pagination over the revision API.
//!
//! [`Harvester`] turns the remote, unbounded history of one article into a
//! lazy sequence of [`RevisionPage`]s, following `rvcontinue` tokens until the
//! server stops returning one. Each record type declares the fields it needs
//! through [`HarvestRecord`]; revisions missing any of them are dropped and
//! counted, never reported as errors.

use crate::api::{ApiError, ApiRevision, BatchRequest, QueryResponse, RevisionApi};
use crate::config::{API_TIMESTAMP_FORMAT, DEFAULT_BATCH_SIZE};
use crate::models::{DumpRevision, Revision, RevisionPage};
use chrono::NaiveDateTime;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error("batch {batch}: request failed")]
    Request {
        batch: u64,
        #[source]
        source: ApiError,
    },
    #[error("batch {batch}: response is not valid JSON")]
    MalformedResponse {
        batch: u64,
        #[source]
        source: serde_json::Error,
    },
    #[error("batch {batch}: API error `{code}`: {info}")]
    Api {
        batch: u64,
        code: String,
        info: String,
    },
    #[error("batch {batch}: response is missing `{key}`")]
    MissingKey { batch: u64, key: &'static str },
    #[error("batch {batch}: article `{title}` does not exist")]
    MissingArticle { batch: u64, title: String },
    #[error("batch {batch}: unparseable revision timestamp `{value}`")]
    Timestamp { batch: u64, value: String },
}

/// A record that can be built from a wire revision.
pub trait HarvestRecord: Sized {
    /// `rvprop` fields this record needs
    const FIELDS: &'static str;

    /// `Ok(None)` when a required field is absent. `Err` carries the
    /// offending timestamp when one is present but unparseable.
    fn from_api(rev: ApiRevision) -> Result<Option<Self>, String>;
}

impl HarvestRecord for Revision {
    const FIELDS: &'static str = "timestamp|content";

    fn from_api(rev: ApiRevision) -> Result<Option<Self>, String> {
        let (Some(timestamp), Some(content)) = (rev.timestamp, rev.content) else {
            return Ok(None);
        };
        let timestamp = parse_timestamp(&timestamp).ok_or(timestamp)?;
        Ok(Some(Revision { timestamp, content }))
    }
}

impl HarvestRecord for DumpRevision {
    const FIELDS: &'static str = "ids|timestamp|user|userid|content";

    fn from_api(rev: ApiRevision) -> Result<Option<Self>, String> {
        match (rev.revid, rev.timestamp, rev.user, rev.userid, rev.content) {
            (Some(id), Some(timestamp), Some(user), Some(user_id), Some(content)) => {
                Ok(Some(DumpRevision {
                    id,
                    timestamp,
                    user,
                    user_id,
                    content,
                }))
            }
            _ => Ok(None),
        }
    }
}

pub fn parse_timestamp(value: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    NaiveDateTime::parse_from_str(value, API_TIMESTAMP_FORMAT)
        .ok()
        .map(|dt| dt.and_utc())
}

/// Identity of the harvested page as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub page_id: Option<u64>,
    pub title: Option<String>,
}

/// Decodes one response body into a page of records.
pub fn parse_batch<R: HarvestRecord>(
    body: &str,
    batch: u64,
    requested_title: &str,
) -> Result<(RevisionPage<R>, PageInfo), HarvestError> {
    let response: QueryResponse = serde_json::from_str(body)
        .map_err(|source| HarvestError::MalformedResponse { batch, source })?;

    if let Some(error) = response.error {
        return Err(HarvestError::Api {
            batch,
            code: error.code,
            info: error.info,
        });
    }

    let query = response.query.ok_or(HarvestError::MissingKey {
        batch,
        key: "query",
    })?;
    let page = query
        .pages
        .and_then(|pages| pages.into_values().next())
        .ok_or(HarvestError::MissingKey {
            batch,
            key: "query.pages",
        })?;

    if page.missing.is_some() {
        return Err(HarvestError::MissingArticle {
            batch,
            title: page.title.unwrap_or_else(|| requested_title.to_string()),
        });
    }

    let raw = page.revisions.ok_or(HarvestError::MissingKey {
        batch,
        key: "revisions",
    })?;

    let continuation = match response.continuation {
        Some(cont) => Some(cont.rvcontinue.ok_or(HarvestError::MissingKey {
            batch,
            key: "continue.rvcontinue",
        })?),
        None => None,
    };

    let mut revisions = Vec::with_capacity(raw.len());
    let mut dropped = 0u64;
    for rev in raw {
        match R::from_api(rev) {
            Ok(Some(record)) => revisions.push(record),
            Ok(None) => dropped += 1,
            Err(value) => return Err(HarvestError::Timestamp { batch, value }),
        }
    }

    if dropped > 0 {
        debug!(batch, dropped, "Dropped incomplete revisions");
    }

    let info = PageInfo {
        page_id: page.pageid,
        title: page.title,
    };
    Ok((
        RevisionPage {
            revisions,
            continuation,
            dropped,
        },
        info,
    ))
}

/// Lazy, finite iterator of revision pages for one article, oldest first.
///
/// The iterator is fused after the terminal page or the first error.
pub struct Harvester<A, R> {
    api: A,
    title: String,
    batch_size: u32,
    lead_only: bool,
    delay: Duration,
    continuation: Option<String>,
    batch: u64,
    done: bool,
    page_info: Option<PageInfo>,
    _record: PhantomData<fn() -> R>,
}

impl<A: RevisionApi, R: HarvestRecord> Harvester<A, R> {
    pub fn new(api: A, title: &str) -> Self {
        Self {
            api,
            title: title.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            lead_only: false,
            delay: Duration::ZERO,
            continuation: None,
            batch: 0,
            done: false,
            page_info: None,
            _record: PhantomData,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Pause before every request except the first
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn lead_only(mut self, lead_only: bool) -> Self {
        self.lead_only = lead_only;
        self
    }

    /// Page id and canonical title, known once the first batch arrived
    pub fn page_info(&self) -> Option<&PageInfo> {
        self.page_info.as_ref()
    }

    /// Batches requested so far
    pub fn batches(&self) -> u64 {
        self.batch
    }

    fn fetch_next(&mut self) -> Result<RevisionPage<R>, HarvestError> {
        self.batch += 1;
        let batch = self.batch;

        let request = BatchRequest {
            title: &self.title,
            fields: R::FIELDS,
            limit: self.batch_size,
            lead_only: self.lead_only,
            continuation: self.continuation.as_deref(),
        };
        let body = self
            .api
            .fetch(&request)
            .map_err(|source| HarvestError::Request { batch, source })?;

        let (page, info) = parse_batch::<R>(&body, batch, &self.title)?;
        if self.page_info.is_none() {
            self.page_info = Some(info);
        }
        self.continuation.clone_from(&page.continuation);

        debug!(
            batch,
            revisions = page.revisions.len(),
            dropped = page.dropped,
            last = page.is_last(),
            "Fetched revision batch"
        );
        Ok(page)
    }
}

impl<A: RevisionApi, R: HarvestRecord> Iterator for Harvester<A, R> {
    type Item = Result<RevisionPage<R>, HarvestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.batch > 0 && !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let result = self.fetch_next();
        match &result {
            Ok(page) if !page.is_last() => {}
            _ => self.done = true,
        }
        Some(result)
    }
}
