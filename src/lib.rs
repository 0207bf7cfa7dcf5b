//! # bookbinder
//!
//! A CLI utility that downloads every chapter PDF of a paginated online book
//! and binds them into a single file.
//!
//! ## Current Features
//!
//! - Listing page crawling with chapter link extraction
//! - Streaming chapter downloads that resume by skipping existing files
//! - Duplicate-aware PDF binding with even page padding and metadata
//!
//! ## Usage
//!
//! ```bash
//! bookbinder run "Social Network Analysis" 10.1007/978-1-4614-6170-8 -o ~/Literature
//! ```

mod binder;
mod fetcher;
mod metadata;
mod orchestrator;

pub use binder::{bind, bound_file_name, BindOutcome, BindReport, Fingerprint, PdfBinder};
pub use fetcher::{
    catalog_base_address, chapter_address, chapter_file_name, extract_links, is_duplicate_group,
    is_last_page, listing_address, plan_page, sanitize_title, title_initial, ChapterLink,
    CrawlState, FetchReport, Fetcher, FetcherOptions, PlannedDownload, DEFAULT_HOST,
};
pub use metadata::{load_metadata_file, normalize_metadata_key, parse_metadata_pair, Metadata};
pub use orchestrator::{run, BookRequest, RunOutcome};
