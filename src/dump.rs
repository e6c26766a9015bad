//! MediaWiki XML export of a full revision history.
//!
//! Alternative to pass 1: revisions are harvested with ids and contributors
//! and written as a single-page export document that dump-based tools can
//! consume. The document is streamed one API page at a time into a temporary
//! file and renamed into place once `</mediawiki>` is written.

use crate::api::{HttpRevisionApi, RevisionApi};
use crate::config::{HarvestConfig, IO_BUFFER_SIZE};
use crate::harvest::Harvester;
use crate::models::{Article, DumpRevision};
use crate::pipeline::{make_spinner, parent_dir};
use crate::stats::HarvestStats;
use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

const EXPORT_NS: &str = "http://www.mediawiki.org/xml/export-0.10/";
const EXPORT_SCHEMA: &str =
    "http://www.mediawiki.org/xml/export-0.10/ http://www.mediawiki.org/xml/export-0.10.xsd";
const EXPORT_VERSION: &str = "0.10";

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("XML write failed")]
    Xml(#[from] quick_xml::Error),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("export document has no open page")]
    NoPage,
}

/// `<siteinfo>` block of the export header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteInfo {
    pub lang: String,
    pub sitename: String,
    pub dbname: String,
    pub base: String,
    pub generator: String,
}

impl SiteInfo {
    pub fn for_lang(lang: &str) -> Self {
        Self {
            lang: lang.to_string(),
            sitename: "Wikipedia".to_string(),
            dbname: format!("{}wiki", lang),
            base: format!("https://{}.wikipedia.org/wiki/", lang),
            generator: format!("revhist {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Streaming writer for a one-page export document.
pub struct DumpWriter<W: Write> {
    xml: Writer<W>,
    page_open: bool,
    revisions: u64,
}

impl<W: Write> DumpWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            xml: Writer::new_with_indent(out, b' ', 2),
            page_open: false,
            revisions: 0,
        }
    }

    pub fn revisions(&self) -> u64 {
        self.revisions
    }

    /// Writes the document header, the site info and the page identity.
    pub fn start_page(&mut self, site: &SiteInfo, title: &str, page_id: u64) -> Result<(), DumpError> {
        self.xml
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        let root = BytesStart::new("mediawiki").with_attributes([
            ("xmlns", EXPORT_NS),
            ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
            ("xsi:schemaLocation", EXPORT_SCHEMA),
            ("version", EXPORT_VERSION),
            ("xml:lang", site.lang.as_str()),
        ]);
        self.xml.write_event(Event::Start(root))?;

        self.xml.write_event(Event::Start(BytesStart::new("siteinfo")))?;
        self.text_element("sitename", &site.sitename)?;
        self.text_element("dbname", &site.dbname)?;
        self.text_element("base", &site.base)?;
        self.text_element("generator", &site.generator)?;
        self.text_element("case", "first-letter")?;
        self.xml.write_event(Event::End(BytesEnd::new("siteinfo")))?;

        self.xml.write_event(Event::Start(BytesStart::new("page")))?;
        self.text_element("title", title)?;
        self.text_element("ns", "0")?;
        self.text_element("id", &page_id.to_string())?;
        self.page_open = true;
        Ok(())
    }

    pub fn write_revision(&mut self, rev: &DumpRevision) -> Result<(), DumpError> {
        if !self.page_open {
            return Err(DumpError::NoPage);
        }
        self.xml.write_event(Event::Start(BytesStart::new("revision")))?;
        self.text_element("id", &rev.id.to_string())?;
        self.text_element("timestamp", &rev.timestamp)?;

        self.xml.write_event(Event::Start(BytesStart::new("contributor")))?;
        self.text_element("username", &rev.user)?;
        self.text_element("id", &rev.user_id.to_string())?;
        self.xml.write_event(Event::End(BytesEnd::new("contributor")))?;

        self.text_element("model", "wikitext")?;
        self.text_element("format", "text/x-wiki")?;

        let bytes = rev.content.len().to_string();
        let text = BytesStart::new("text")
            .with_attributes([("bytes", bytes.as_str()), ("xml:space", "preserve")]);
        self.xml.write_event(Event::Start(text))?;
        self.xml.write_event(Event::Text(BytesText::new(&rev.content)))?;
        self.xml.write_event(Event::End(BytesEnd::new("text")))?;

        self.xml.write_event(Event::End(BytesEnd::new("revision")))?;
        self.revisions += 1;
        Ok(())
    }

    /// Closes the page and the document and returns the flushed sink.
    pub fn finish(mut self) -> Result<W, DumpError> {
        if !self.page_open {
            return Err(DumpError::NoPage);
        }
        self.xml.write_event(Event::End(BytesEnd::new("page")))?;
        self.xml.write_event(Event::End(BytesEnd::new("mediawiki")))?;
        let mut out = self.xml.into_inner();
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(out)
    }

    fn text_element(&mut self, name: &str, value: &str) -> Result<(), DumpError> {
        self.xml.write_event(Event::Start(BytesStart::new(name)))?;
        self.xml.write_event(Event::Text(BytesText::new(value)))?;
        self.xml.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct DumpOutcome {
    pub path: PathBuf,
    pub page_id: u64,
    pub stats: HarvestStats,
}

pub fn run_dump(config: &HarvestConfig) -> Result<DumpOutcome> {
    let api = HttpRevisionApi::new(&config.api_url(), &config.user_agent, config.request_timeout)
        .context("Failed to build HTTP client")?;
    dump_with(api, config)
}

pub fn dump_with<A: RevisionApi>(api: A, config: &HarvestConfig) -> Result<DumpOutcome> {
    let article = Article::new(&config.lang, &config.title);
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create output directory: {}", config.output_dir))?;
    let path = Path::new(&config.output_dir).join(article.dump_file());

    let tmp = NamedTempFile::new_in(parent_dir(&path))
        .with_context(|| format!("Failed to create temporary file for: {:?}", path))?;
    let mut writer = DumpWriter::new(BufWriter::with_capacity(IO_BUFFER_SIZE, tmp));

    let mut harvester = Harvester::<_, DumpRevision>::new(api, &config.title)
        .with_batch_size(config.batch_size)
        .with_delay(config.request_delay)
        .lead_only(config.lead_only);

    info!(title = %config.title, lang = %config.lang, path = ?path, "Exporting revision history");
    let pb = make_spinner(&format!("Exporting {}", config.title));
    let site = SiteInfo::for_lang(&config.lang);
    let mut stats = HarvestStats::new();
    let mut page_id = 0;

    while let Some(page) = harvester.next() {
        let page = page.with_context(|| {
            format!("Failed to harvest revisions of {} ({})", config.title, config.lang)
        })?;

        if stats.pages_fetched == 0 {
            let info = harvester.page_info();
            page_id = info.and_then(|i| i.page_id).unwrap_or_default();
            let title = info
                .and_then(|i| i.title.clone())
                .unwrap_or_else(|| config.title.clone());
            writer
                .start_page(&site, &title, page_id)
                .with_context(|| format!("Failed to write export header: {:?}", path))?;
        }

        for rev in &page.revisions {
            writer
                .write_revision(rev)
                .with_context(|| format!("Failed to write revision {} to {:?}", rev.id, path))?;
        }
        stats.record_page(page.revisions.len() as u64, page.dropped);
        pb.set_message(format!("Exporting {}: {} revisions", config.title, writer.revisions()));
    }

    let tmp = writer
        .finish()
        .with_context(|| format!("Failed to close export document: {:?}", path))?
        .into_inner()
        .map_err(|e| e.into_error())
        .with_context(|| format!("Failed to flush export document: {:?}", path))?;
    tmp.persist(&path)
        .with_context(|| format!("Failed to publish export document: {:?}", path))?;
    pb.finish_and_clear();

    info!(
        page_id,
        revisions = stats.revisions_written,
        dropped = stats.revisions_dropped,
        "Export complete"
    );
    Ok(DumpOutcome {
        path,
        page_id,
        stats,
    })
}
