use anyhow::{anyhow, Context, Result};
use colored::*;
use futures_util::StreamExt;
use reqwest::Client;
use scraper::{Html, Selector};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

/// Host every catalog and chapter address is resolved against.
pub const DEFAULT_HOST: &str = "http://link.springer.com";

const PDF_LINK_SELECTOR: &str = r#"a[href$=".pdf"]"#;

#[derive(Debug, Clone)]
pub struct FetcherOptions {
    pub host: String,
    pub timeout: Duration,
    /// Upper bound on listing pages visited. `None` crawls until a page has no links.
    pub max_pages: Option<u32>,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            timeout: Duration::from_secs(300),
            max_pages: None,
        }
    }
}

/// A chapter anchor found on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterLink {
    pub title: String,
    pub href: String,
}

/// Counters threaded through the paging loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlState {
    pub page: u32,
    pub sequence: u32,
    pub last_initial: Option<char>,
}

impl CrawlState {
    pub fn new() -> Self {
        Self {
            page: 1,
            sequence: 1,
            last_initial: None,
        }
    }

    pub fn next_page(self) -> Self {
        Self {
            page: self.page + 1,
            ..self
        }
    }

    pub fn slots_consumed(&self) -> u32 {
        self.sequence - 1
    }
}

impl Default for CrawlState {
    fn default() -> Self {
        Self::new()
    }
}

/// A link that survived the grouping heuristic, with its destination name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDownload {
    pub sequence: u32,
    pub title: String,
    pub href: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub pages_visited: u32,
    /// Sequence numbers handed out, including grouped and already present chapters.
    pub slots: u32,
    pub downloaded: u32,
    pub skipped_existing: u32,
    pub grouped: u32,
    pub bytes: u64,
}

pub struct Fetcher {
    client: Client,
    options: FetcherOptions,
}

impl Fetcher {
    pub fn new(options: FetcherOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(concat!("bookbinder/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self { client, options })
    }

    pub fn options(&self) -> &FetcherOptions {
        &self.options
    }

    pub fn catalog_address(&self, catalog_id: &str) -> String {
        catalog_base_address(&self.options.host, catalog_id)
    }

    /// Walks `{base_address}/page/{n}` until a page without chapter links and
    /// downloads every chapter the grouping heuristic lets through.
    pub async fn fetch(&self, base_address: &str, target_dir: &Path) -> Result<FetchReport> {
        let mut state = CrawlState::new();
        let mut report = FetchReport::default();

        loop {
            if let Some(max_pages) = self.options.max_pages {
                if state.page > max_pages {
                    warn!("Stopping after {} listing pages (page limit reached)", max_pages);
                    break;
                }
            }

            let listing_url = listing_address(base_address, state.page);
            info!("====== page {} ======", state.page);
            info!("Visiting \"{}\"", listing_url.green());

            let links = match self.fetch_listing(&listing_url).await? {
                Some(body) => extract_links(&body),
                None => Vec::new(),
            };

            if is_last_page(&links) {
                info!("No links to pdf files were found on this page");
                break;
            }
            info!("{} links to pdf files were found on this page", links.len());

            let (next_state, planned) = plan_page(state, &links);
            report.grouped += (links.len() - planned.len()) as u32;

            for item in planned {
                let path = target_dir.join(&item.file_name);
                if fs::try_exists(&path).await.unwrap_or(false) {
                    info!("Skipping: {} already exists", path.display().to_string().blue());
                    report.skipped_existing += 1;
                    continue;
                }

                let url = self.chapter_address(&item.href)?;
                report.bytes += self.download(&url, &path).await?;
                report.downloaded += 1;
            }

            report.pages_visited += 1;
            state = next_state.next_page();
        }

        report.slots = state.slots_consumed();
        info!("Number of chapters in total: {}", report.slots);
        Ok(report)
    }

    fn chapter_address(&self, href: &str) -> Result<Url> {
        chapter_address(&self.options.host, href)
    }

    /// Returns `None` when the listing answers with an error status. That case
    /// is indistinguishable from "past the last page" for this catalog layout,
    /// so the caller ends the crawl on it.
    async fn fetch_listing(&self, url: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to request listing page {}", url))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Listing page {} answered {}, treating it as the end of the catalog", url, status);
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read listing page {}", url))?;
        Ok(Some(body))
    }

    async fn download(&self, url: &Url, path: &Path) -> Result<u64> {
        info!("Downloading \"{}\" into \"{}\"", url.to_string().green(), path.display().to_string().blue());

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to request {}", url))?
            .error_for_status()
            .with_context(|| format!("Failed to download {}", url))?;

        let partial = PartialDownload::new(path);
        let mut file = fs::File::create(partial.path())
            .await
            .with_context(|| format!("Failed to create {}", partial.path().display()))?;

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.with_context(|| format!("Download of {} was interrupted", url))?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", partial.path().display()))?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        partial.commit().await?;
        debug!("Wrote {} bytes to {}", written, path.display());
        Ok(written)
    }
}

/// A `<name>.part` file that is removed on drop unless committed.
struct PartialDownload {
    part: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PartialDownload {
    fn new(target: &Path) -> Self {
        let mut part = OsString::from(target.as_os_str());
        part.push(".part");
        Self {
            part: PathBuf::from(part),
            target: target.to_path_buf(),
            committed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.part
    }

    async fn commit(mut self) -> Result<()> {
        fs::rename(&self.part, &self.target)
            .await
            .with_context(|| format!("Failed to move download into {}", self.target.display()))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialDownload {
    fn drop(&mut self) {
        if !self.committed && std::fs::remove_file(&self.part).is_ok() {
            debug!("Removed partial download {}", self.part.display());
        }
    }
}

pub fn catalog_base_address(host: &str, catalog_id: &str) -> String {
    format!("{}/referencework/{}", host.trim_end_matches('/'), catalog_id)
}

/// Appends `href` to `host`, keeping any path the host carries. Absolute
/// hrefs are used as they are.
pub fn chapter_address(host: &str, href: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(href) {
        return Ok(url);
    }

    let host = host.trim_end_matches('/');
    let address = if href.starts_with('/') {
        format!("{}{}", host, href)
    } else {
        format!("{}/{}", host, href)
    };
    Url::parse(&address).map_err(|e| anyhow!("Invalid chapter address {}: {}", address, e))
}

pub fn listing_address(base_address: &str, page: u32) -> String {
    format!("{}/page/{}", base_address, page)
}

/// Collects every anchor whose target ends in `.pdf`, in document order.
pub fn extract_links(html: &str) -> Vec<ChapterLink> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(PDF_LINK_SELECTOR).unwrap();

    document
        .select(&selector)
        .filter_map(|element| {
            let href = element.value().attr("href")?;
            let title = match element.value().attr("title") {
                Some(title) => title.to_string(),
                None => element.text().collect::<String>().trim().to_string(),
            };
            Some(ChapterLink {
                title,
                href: href.to_string(),
            })
        })
        .collect()
}

/// A listing page without chapter links is taken to be past the end of the
/// catalog. A real page that happens to list no PDFs ends the crawl early.
pub fn is_last_page(links: &[ChapterLink]) -> bool {
    links.is_empty()
}

pub fn title_initial(title: &str) -> Option<char> {
    title.chars().next().and_then(|c| c.to_uppercase().next())
}

/// Grouping heuristic: some catalogs point every chapter sharing a first
/// letter at one combined PDF, so a title starting with the same letter as
/// the previous accepted one is assumed to be that same file. Misfires on
/// titles like "4-Cyano-1,3-Butadiynyl" filed under "C"; the binder's
/// fingerprinting drops whatever slips through.
pub fn is_duplicate_group(title: &str, last_initial: Option<char>) -> bool {
    match (title_initial(title), last_initial) {
        (Some(initial), Some(last)) => initial == last,
        _ => false,
    }
}

pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ',' | '_' | '-'))
        .collect()
}

pub fn chapter_file_name(sequence: u32, title: &str) -> String {
    format!("{:03}_{}.pdf", sequence, sanitize_title(title))
}

/// Applies the grouping heuristic to one page of links. Every link consumes a
/// sequence number whether it is kept or not.
pub fn plan_page(mut state: CrawlState, links: &[ChapterLink]) -> (CrawlState, Vec<PlannedDownload>) {
    let mut planned = Vec::with_capacity(links.len());

    for link in links {
        let sequence = state.sequence;
        state.sequence += 1;

        if is_duplicate_group(&link.title, state.last_initial) {
            debug!("Grouped with previous chapter, skipping \"{}\" ({})", link.title, link.href);
            continue;
        }

        if let Some(initial) = title_initial(&link.title) {
            state.last_initial = Some(initial);
        }
        planned.push(PlannedDownload {
            sequence,
            title: link.title.clone(),
            href: link.href.clone(),
            file_name: chapter_file_name(sequence, &link.title),
        });
    }

    (state, planned)
}
