//! Revision API boundary: request parameters, the wire format of
//! `action=query&prop=revisions` responses, and the HTTP transport.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),
    #[error("server returned HTTP status {0}")]
    Status(u16),
}

/// Parameters of one revision batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest<'a> {
    pub title: &'a str,
    /// `rvprop` value, e.g. `timestamp|content`
    pub fields: &'a str,
    pub limit: u32,
    pub lead_only: bool,
    pub continuation: Option<&'a str>,
}

impl BatchRequest<'_> {
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("action", "query".to_string()),
            ("format", "json".to_string()),
            ("prop", "revisions".to_string()),
            ("titles", self.title.to_string()),
            ("rvprop", self.fields.to_string()),
            ("rvlimit", self.limit.to_string()),
            // "newer" lists oldest first
            ("rvdir", "newer".to_string()),
        ];
        if self.lead_only {
            params.push(("rvsection", "0".to_string()));
        }
        if let Some(token) = self.continuation {
            params.push(("rvcontinue", token.to_string()));
        }
        params
    }
}

/// Source of raw revision batches. Implemented over HTTP in production and by
/// scripted fixtures in tests.
pub trait RevisionApi {
    /// Performs one request and returns the undecoded response body.
    fn fetch(&mut self, request: &BatchRequest<'_>) -> Result<String, ApiError>;
}

impl<T: RevisionApi + ?Sized> RevisionApi for &mut T {
    fn fetch(&mut self, request: &BatchRequest<'_>) -> Result<String, ApiError> {
        (**self).fetch(request)
    }
}

pub struct HttpRevisionApi {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpRevisionApi {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }
}

impl RevisionApi for HttpRevisionApi {
    fn fetch(&mut self, request: &BatchRequest<'_>) -> Result<String, ApiError> {
        trace!(url = %self.base_url, continuation = ?request.continuation, "Requesting revision batch");
        let response = self
            .client
            .get(&self.base_url)
            .query(&request.query_params())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        Ok(response.text()?)
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    #[serde(rename = "continue")]
    pub continuation: Option<Continuation>,
    pub query: Option<Query>,
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct Continuation {
    pub rvcontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    #[serde(default)]
    pub info: String,
}

#[derive(Debug, Deserialize)]
pub struct Query {
    pub pages: Option<BTreeMap<String, ApiPage>>,
}

#[derive(Debug, Deserialize)]
pub struct ApiPage {
    pub pageid: Option<u64>,
    pub title: Option<String>,
    /// Present (as an empty string) when the title does not exist
    pub missing: Option<serde_json::Value>,
    pub revisions: Option<Vec<ApiRevision>>,
}

/// A revision as returned on the wire; every field may be absent when the
/// revision is suppressed or was not requested.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ApiRevision {
    pub revid: Option<u64>,
    pub user: Option<String>,
    pub userid: Option<u64>,
    pub timestamp: Option<String>,
    #[serde(rename = "*")]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(continuation: Option<&str>, lead_only: bool) -> BatchRequest<'_> {
        BatchRequest {
            title: "Ladilla_Rusa",
            fields: "timestamp|content",
            limit: 50,
            lead_only,
            continuation,
        }
    }

    fn param<'a>(params: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn first_request_has_no_continuation() {
        let params = request(None, false).query_params();
        assert_eq!(param(&params, "titles"), Some("Ladilla_Rusa"));
        assert_eq!(param(&params, "rvprop"), Some("timestamp|content"));
        assert_eq!(param(&params, "rvlimit"), Some("50"));
        assert_eq!(param(&params, "rvdir"), Some("newer"));
        assert_eq!(param(&params, "rvcontinue"), None);
        assert_eq!(param(&params, "rvsection"), None);
    }

    #[test]
    fn continuation_and_section_are_attached() {
        let params = request(Some("20200101000000|42"), true).query_params();
        assert_eq!(param(&params, "rvcontinue"), Some("20200101000000|42"));
        assert_eq!(param(&params, "rvsection"), Some("0"));
    }

    #[test]
    fn response_decodes_content_star_key() {
        let body = r#"{
            "continue": {"rvcontinue": "20200101000000|42", "continue": "||"},
            "query": {"pages": {"123": {"pageid": 123, "ns": 0, "title": "X",
                "revisions": [{"revid": 7, "user": "A", "userid": 1,
                    "timestamp": "2020-01-01T00:00:00Z", "contentformat": "text/x-wiki",
                    "*": "text"}]}}}
        }"#;
        let response: QueryResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            response.continuation.unwrap().rvcontinue.as_deref(),
            Some("20200101000000|42")
        );
        let pages = response.query.unwrap().pages.unwrap();
        let page = pages.get("123").unwrap();
        let rev = &page.revisions.as_ref().unwrap()[0];
        assert_eq!(rev.revid, Some(7));
        assert_eq!(rev.content.as_deref(), Some("text"));
    }

    #[test]
    fn response_decodes_api_error() {
        let body = r#"{"error": {"code": "badvalue", "info": "Unrecognized value"}}"#;
        let response: QueryResponse = serde_json::from_str(body).unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, "badvalue");
        assert!(response.query.is_none());
    }

    #[test]
    fn hidden_content_decodes_as_none() {
        let rev: ApiRevision =
            serde_json::from_str(r#"{"timestamp": "2020-01-01T00:00:00Z", "texthidden": ""}"#)
                .unwrap();
        assert!(rev.content.is_none());
    }
}
