use std::time::Duration;

/// Revisions requested per API call. Content-bearing revision queries are
/// capped at 50 by the server for anonymous clients.
pub const DEFAULT_BATCH_SIZE: u32 = 50;

/// Revisions per chunk handed to the normalization pool
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Fixed pause between consecutive revision requests
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 100;

/// Per-request HTTP deadline
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Titles per `prop=extracts` request (the extension's `exlimit` maximum)
pub const EXTRACTS_BATCH_LIMIT: usize = 20;

/// In-flight extract batches for the latest-revision lookup
pub const DEFAULT_LOOKUP_CONCURRENCY: usize = 1;

pub const DEFAULT_USER_AGENT: &str =
    "revhist/0.1 (https://github.com/revhist/revhist; revision history harvester)";

/// Section headers cut from cleaned text, applied in this order.
pub const BOILERPLATE_MARKERS: [&str; 3] = ["Notes\n", "External links\n", "References\n"];

/// Timestamp layout returned by the revision API
pub const API_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Buffer size for collection readers and writers
pub const IO_BUFFER_SIZE: usize = 256 * 1024;

/// Runtime settings for pass 1 (and the dump variant).
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub lang: String,
    pub title: String,
    pub output_dir: String,
    /// Overrides `https://{lang}.wikipedia.org/w/api.php`
    pub api_url: Option<String>,
    pub batch_size: u32,
    pub request_delay: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    /// Only request section 0 of each revision
    pub lead_only: bool,
}

impl HarvestConfig {
    pub fn new(lang: &str, title: &str, output_dir: &str) -> Self {
        Self {
            lang: lang.to_string(),
            title: title.to_string(),
            output_dir: output_dir.to_string(),
            api_url: None,
            batch_size: DEFAULT_BATCH_SIZE,
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            lead_only: false,
        }
    }

    pub fn api_url(&self) -> String {
        match &self.api_url {
            Some(url) => url.clone(),
            None => api_url_for(&self.lang),
        }
    }
}

/// Runtime settings for pass 2.
#[derive(Debug, Clone)]
pub struct CleanConfig {
    pub chunk_size: usize,
    /// Worker threads; `None` means available parallelism
    pub workers: Option<usize>,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: None,
        }
    }
}

pub fn api_url_for(lang: &str) -> String {
    format!("https://{}.wikipedia.org/w/api.php", lang)
}
