//! Revhist: wiki revision-history harvesting and cleaning pipeline
//!
//! This crate turns the complete edit history of one wiki article into a
//! time-ordered corpus of cleaned plain text:
//!
//! 1. **Harvest Pass** -- Page through the revision API oldest first, following
//!    continuation tokens, and stream every revision into a JSON array on disk
//! 2. **Clean Pass** -- Read the array back in fixed-size chunks, normalize each
//!    chunk on a worker pool, and stream the ordered results into the final
//!    corpus, which is published atomically
//!
//! Two side paths share the same building blocks:
//!
//! - **Dump export** -- Harvest with ids and contributors and write a MediaWiki
//!   XML export document instead of the JSON array
//! - **Latest lookup** -- Fetch the current plain text of many articles through
//!   the extracts API, twenty titles per request
//!
//! # Architecture
//!
//! - **Bounded memory** -- Only one API page or one chunk is held at a time;
//!   histories of many gigabytes never need to fit in RAM
//! - **Terminal marker** -- The collection is only valid once its closing `]`
//!   is written, so an interrupted harvest is rejected by the reader
//! - **Ordered gather** -- Workers fill position-indexed slots; output order
//!   never depends on which worker finishes first
//! - **Atomic publish** -- Final artifacts are written to a temporary sibling
//!   and renamed into place
//!
//! # Key Modules
//!
//! - [`api`] -- Revision API request parameters, wire types and HTTP transport
//! - [`harvest`] -- Paginated harvester yielding one page of revisions at a time
//! - [`collection`] -- Streaming JSON array writer and chunked reader
//! - [`markup`] -- Wikitext to plain text rendering
//! - [`clean`] -- Text normalization (markers, numeric tokens, citations)
//! - [`pool`] -- Fixed-size worker pool with order-preserving gather
//! - [`pipeline`] -- The harvest and clean passes
//! - [`dump`] -- MediaWiki XML export
//! - [`latest`] -- Batched latest-revision lookup
//! - [`models`] -- Revision records and artifact naming
//! - [`stats`] -- Per-pass statistics
//! - [`config`] -- Defaults and runtime settings
//!
//! # Example Usage
//!
//! ```bash
//! # Harvest and clean in one go
//! revhist run -l es -t Ladilla_Rusa -o output/
//!
//! # Or pass by pass
//! revhist harvest -l es -t Ladilla_Rusa -o output/
//! revhist clean -i output/Ladilla_Rusa_es.json --workers 4
//!
//! # Export the history as a dump
//! revhist dump -l en -t Ladilla_Rusa -o output/
//!
//! # Current text of several articles
//! revhist latest -l en Ladilla_Rusa "Knower (duo)" --intro-only
//! ```

pub mod api;
pub mod clean;
pub mod collection;
pub mod config;
pub mod dump;
pub mod harvest;
pub mod latest;
pub mod markup;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod stats;
