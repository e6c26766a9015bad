//! Fixed-size worker pool for chunk normalization.
//!
//! A chunk is sorted by timestamp, normalized in parallel and reassembled in
//! input order before the next chunk is accepted. Results land in slots
//! indexed by position, so completion order never leaks into the output.

use crate::clean::TextNormalizer;
use crate::markup::{MarkupStripper, StripError, WikitextStripper};
use crate::models::{CleanedRevision, Revision};
use rayon::prelude::*;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("failed to start worker pool")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("revision at position {position} of chunk (timestamp {timestamp}) could not be normalized")]
    Revision {
        position: usize,
        timestamp: i64,
        #[source]
        source: StripError,
    },
}

pub struct WorkerPool<S = WikitextStripper> {
    pool: rayon::ThreadPool,
    normalizer: TextNormalizer<S>,
}

impl<S: MarkupStripper> WorkerPool<S> {
    /// `None` uses one worker per available core. Requests above that are
    /// capped to it.
    pub fn new(normalizer: TextNormalizer<S>, workers: Option<usize>) -> Result<Self, NormalizeError> {
        let limit = default_workers();
        let threads = workers.unwrap_or(limit).clamp(1, limit);
        if let Some(requested) = workers.filter(|&n| n > limit) {
            warn!(requested, workers = limit, "Worker count capped to available parallelism");
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("revhist-clean-{}", i))
            .build()?;
        debug!(workers = threads, "Worker pool started");
        Ok(Self { pool, normalizer })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Normalizes one chunk. Output position `i` is the `i`-th revision of the
    /// chunk after a stable sort by timestamp. Any failure discards the whole
    /// chunk and reports the earliest failing position.
    pub fn clean_chunk(&self, mut chunk: Vec<Revision>) -> Result<Vec<CleanedRevision>, NormalizeError> {
        chunk.sort_by_key(|revision| revision.timestamp);

        let normalizer = &self.normalizer;
        let mut slots: Vec<Result<String, StripError>> = Vec::with_capacity(chunk.len());
        self.pool.install(|| {
            chunk
                .par_iter()
                .map(|revision| normalizer.normalize(&revision.content))
                .collect_into_vec(&mut slots);
        });

        let mut cleaned = Vec::with_capacity(chunk.len());
        for (position, (revision, slot)) in chunk.into_iter().zip(slots).enumerate() {
            let timestamp = revision.timestamp.timestamp();
            match slot {
                Ok(content) => cleaned.push(CleanedRevision { timestamp, content }),
                Err(source) => {
                    return Err(NormalizeError::Revision {
                        position,
                        timestamp,
                        source,
                    })
                }
            }
        }
        Ok(cleaned)
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
