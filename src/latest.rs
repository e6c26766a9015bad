//! Latest-revision plain text for many articles at once.
//!
//! Uses the TextExtracts API, which renders the current revision server-side,
//! so no markup cleaning is needed. Titles are sent in batches of
//! [`EXTRACTS_BATCH_LIMIT`]; batches run through a bounded, ordered stream.

use crate::config::EXTRACTS_BATCH_LIMIT;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),
    #[error("server returned HTTP status {0}")]
    Status(u16),
    #[error("response is not valid JSON")]
    MalformedResponse(#[source] serde_json::Error),
    #[error("API error `{code}`: {info}")]
    Api { code: String, info: String },
    #[error("response is missing `{0}`")]
    MissingKey(&'static str),
}

/// Source of raw extracts responses.
pub trait ExtractsApi {
    fn fetch(
        &self,
        params: Vec<(&'static str, String)>,
    ) -> impl Future<Output = Result<String, LookupError>>;
}

pub struct HttpExtractsApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExtractsApi {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }
}

impl ExtractsApi for HttpExtractsApi {
    async fn fetch(&self, params: Vec<(&'static str, String)>) -> Result<String, LookupError> {
        trace!(url = %self.base_url, "Requesting extracts batch");
        let response = self.client.get(&self.base_url).query(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}

pub fn extract_params(titles: &[String], intro_only: bool) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("action", "query".to_string()),
        ("format", "json".to_string()),
        ("prop", "extracts".to_string()),
        ("explaintext", "1".to_string()),
        ("exlimit", EXTRACTS_BATCH_LIMIT.to_string()),
        ("titles", titles.join("|")),
    ];
    // The API treats any value as true, so the flag is only sent when wanted
    if intro_only {
        params.push(("exintro", "1".to_string()));
    }
    params
}

#[derive(Debug, Deserialize)]
struct ExtractsResponse {
    query: Option<ExtractsQuery>,
    error: Option<ExtractsErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ExtractsErrorBody {
    code: String,
    #[serde(default)]
    info: String,
}

#[derive(Debug, Deserialize)]
struct ExtractsQuery {
    #[serde(default)]
    normalized: Vec<Normalization>,
    #[serde(default)]
    pages: BTreeMap<String, ExtractPage>,
}

#[derive(Debug, Deserialize)]
struct Normalization {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct ExtractPage {
    title: String,
    extract: Option<String>,
}

/// Maps each requested title to its extract. The server reports canonical
/// titles (`Ladilla_Rusa` → `Ladilla Rusa`); results are keyed by the form
/// that was asked for. Pages without an extract are left out.
pub fn parse_extracts(
    body: &str,
    requested: &[String],
) -> Result<BTreeMap<String, String>, LookupError> {
    let response: ExtractsResponse =
        serde_json::from_str(body).map_err(LookupError::MalformedResponse)?;
    if let Some(error) = response.error {
        return Err(LookupError::Api {
            code: error.code,
            info: error.info,
        });
    }
    let query = response.query.ok_or(LookupError::MissingKey("query"))?;

    let mut requested_as: HashMap<&str, Vec<&str>> = HashMap::new();
    for n in &query.normalized {
        requested_as.entry(n.to.as_str()).or_default().push(n.from.as_str());
    }

    let mut extracts = BTreeMap::new();
    for page in query.pages.values() {
        let Some(extract) = &page.extract else {
            debug!(title = %page.title, "No extract for page");
            continue;
        };
        let keys = requested_as
            .get(page.title.as_str())
            .cloned()
            .unwrap_or_else(|| vec![page.title.as_str()]);
        for key in keys {
            if requested.iter().any(|t| t == key) {
                extracts.insert(key.to_string(), extract.clone());
            }
        }
    }
    Ok(extracts)
}

/// Fetches the latest plain text of every title. At most `concurrency`
/// batches are in flight; results are merged in batch order.
pub async fn lookup_latest<A: ExtractsApi>(
    api: &A,
    titles: &[String],
    intro_only: bool,
    concurrency: usize,
) -> Result<BTreeMap<String, String>, LookupError> {
    let mut batches = stream::iter(titles.chunks(EXTRACTS_BATCH_LIMIT))
        .map(|batch| async move {
            let body = api.fetch(extract_params(batch, intro_only)).await?;
            parse_extracts(&body, batch)
        })
        .buffered(concurrency.max(1));

    let mut extracts = BTreeMap::new();
    while let Some(batch) = batches.next().await {
        extracts.extend(batch?);
    }
    debug!(requested = titles.len(), found = extracts.len(), "Extracts lookup complete");
    Ok(extracts)
}
