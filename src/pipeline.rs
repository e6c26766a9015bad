//! The two passes.
//!
//! Pass 1 streams every page from the harvester into the on-disk collection.
//! Pass 2 reads that collection back in chunks, cleans each chunk on the
//! worker pool and streams the results into a temporary file beside the
//! final corpus. The temporary file is renamed into place only after the last
//! chunk succeeded.

use crate::api::{HttpRevisionApi, RevisionApi};
use crate::clean::TextNormalizer;
use crate::collection::{ChunkedReader, CollectionWriter};
use crate::config::{CleanConfig, HarvestConfig, IO_BUFFER_SIZE};
use crate::harvest::Harvester;
use crate::markup::MarkupStripper;
use crate::models::{Article, Revision};
use crate::pool::WorkerPool;
use crate::stats::{CleanStats, HarvestStats};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Result of pass 1
#[derive(Debug)]
pub struct HarvestOutcome {
    pub path: PathBuf,
    pub stats: HarvestStats,
}

/// Result of pass 2
#[derive(Debug)]
pub struct CleanOutcome {
    pub path: PathBuf,
    pub stats: CleanStats,
}

pub fn run_harvest(config: &HarvestConfig) -> Result<HarvestOutcome> {
    let api = HttpRevisionApi::new(&config.api_url(), &config.user_agent, config.request_timeout)
        .context("Failed to build HTTP client")?;
    harvest_with(api, config)
}

/// Pass 1 against any revision source.
pub fn harvest_with<A: RevisionApi>(api: A, config: &HarvestConfig) -> Result<HarvestOutcome> {
    let article = Article::new(&config.lang, &config.title);
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create output directory: {}", config.output_dir))?;
    let path = Path::new(&config.output_dir).join(article.collection_file());

    let file = File::create(&path)
        .with_context(|| format!("Failed to create collection file: {:?}", path))?;
    let mut writer = CollectionWriter::new(BufWriter::with_capacity(IO_BUFFER_SIZE, file));

    let harvester = Harvester::<_, Revision>::new(api, &config.title)
        .with_batch_size(config.batch_size)
        .with_delay(config.request_delay)
        .lead_only(config.lead_only);

    info!(title = %config.title, lang = %config.lang, path = ?path, "Harvesting revisions");
    let pb = make_spinner(&format!("Harvesting {}", config.title));
    let mut stats = HarvestStats::new();

    for page in harvester {
        let page = page.with_context(|| {
            format!("Failed to harvest revisions of {} ({})", config.title, config.lang)
        })?;
        let total = writer
            .write_page(&page.revisions)
            .with_context(|| format!("Failed to write collection file: {:?}", path))?;
        stats.record_page(page.revisions.len() as u64, page.dropped);
        pb.set_message(format!("Harvesting {}: {} revisions", config.title, total));
    }

    writer
        .finish()
        .with_context(|| format!("Failed to close collection file: {:?}", path))?;
    pb.finish_and_clear();

    info!(
        pages = stats.pages_fetched,
        revisions = stats.revisions_written,
        dropped = stats.revisions_dropped,
        "Harvest complete"
    );
    Ok(HarvestOutcome { path, stats })
}

/// `<article>_<lang>.json` → `<article>_<lang>_clean.json`, same directory.
pub fn clean_path_for(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{}_clean.json", stem))
}

pub fn run_clean(input: &Path, config: &CleanConfig) -> Result<CleanOutcome> {
    let output = clean_path_for(input);
    clean_with(input, &output, TextNormalizer::default(), config)
}

/// Pass 2 with any markup stripper. `output` does not exist unless every
/// chunk was cleaned.
pub fn clean_with<S: MarkupStripper>(
    input: &Path,
    output: &Path,
    normalizer: TextNormalizer<S>,
    config: &CleanConfig,
) -> Result<CleanOutcome> {
    let reader = ChunkedReader::open(input, config.chunk_size)
        .with_context(|| format!("Failed to open collection: {:?}", input))?;
    let pool = WorkerPool::new(normalizer, config.workers).context("Failed to start worker pool")?;

    let tmp = NamedTempFile::new_in(parent_dir(output))
        .with_context(|| format!("Failed to create temporary file for: {:?}", output))?;
    let mut writer = CollectionWriter::new(BufWriter::with_capacity(IO_BUFFER_SIZE, tmp));

    info!(input = ?input, workers = pool.workers(), chunk_size = config.chunk_size, "Cleaning collection");
    let pb = make_spinner("Cleaning revisions");
    let mut stats = CleanStats::new();

    for (index, chunk) in reader.enumerate() {
        let chunk = chunk.with_context(|| format!("Failed to read collection: {:?}", input))?;
        let bytes_in: usize = chunk.iter().map(|r| r.content.len()).sum();

        let cleaned = pool
            .clean_chunk(chunk)
            .with_context(|| format!("Failed to clean chunk {} of {:?}", index, input))?;
        let bytes_out: usize = cleaned.iter().map(|r| r.content.len()).sum();

        let total = writer
            .write_page(&cleaned)
            .with_context(|| format!("Failed to write cleaned corpus for: {:?}", output))?;
        stats.record_chunk(cleaned.len() as u64, bytes_in as u64, bytes_out as u64);
        debug!(chunk = index, revisions = cleaned.len(), "Chunk cleaned");
        pb.set_message(format!("Cleaning revisions: {}", total));
    }

    writer
        .finish()
        .with_context(|| format!("Failed to close cleaned corpus for: {:?}", output))?;
    pb.finish_and_clear();

    let tmp = writer
        .into_inner()?
        .into_inner()
        .map_err(|e| e.into_error())
        .with_context(|| format!("Failed to flush cleaned corpus for: {:?}", output))?;
    tmp.persist(output)
        .with_context(|| format!("Failed to publish cleaned corpus: {:?}", output))?;

    info!(
        chunks = stats.chunks_processed,
        revisions = stats.revisions_cleaned,
        path = ?output,
        "Clean complete"
    );
    Ok(CleanOutcome {
        path: output.to_path_buf(),
        stats,
    })
}

/// Directory a temporary sibling of `path` is created in
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

pub(crate) fn make_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(msg.to_string());
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_sits_beside_input() {
        assert_eq!(
            clean_path_for(Path::new("out/Ladilla_Rusa_es.json")),
            PathBuf::from("out/Ladilla_Rusa_es_clean.json")
        );
        assert_eq!(
            clean_path_for(Path::new("X_en.json")),
            PathBuf::from("X_en_clean.json")
        );
    }

    #[test]
    fn parent_dir_of_bare_file_is_cwd() {
        assert_eq!(parent_dir(Path::new("file.json")), Path::new("."));
        assert_eq!(parent_dir(Path::new("a/b.json")), Path::new("a"));
    }
}
