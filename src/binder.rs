use anyhow::{anyhow, bail, Context, Result};
use colored::*;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::metadata::{info_dictionary, Metadata};

const PDF_SUFFIX: &str = ".pdf";
const MAX_TITLE_CHARS: usize = 30;
const INHERITABLE_PAGE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// MD5 of a file's raw bytes. Only compared within one bind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(data: &[u8]) -> Self {
        Self(format!("{:x}", Md5::digest(data)))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindReport {
    pub output: PathBuf,
    pub files_bound: usize,
    pub duplicates: usize,
    pub unreadable: usize,
    pub blank_pages: usize,
    pub page_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    Bound(BindReport),
    /// The destination already existed and was left untouched.
    TargetExists(PathBuf),
}

/// Accumulates pages from several documents into one page tree.
pub struct PdfBinder {
    objects: BTreeMap<ObjectId, Object>,
    page_ids: Vec<ObjectId>,
    next_id: u32,
    info: Dictionary,
}

impl PdfBinder {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            page_ids: Vec::new(),
            next_id: 1,
            info: Dictionary::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    pub fn set_metadata(&mut self, metadata: &Metadata) {
        self.info = info_dictionary(metadata);
    }

    /// Appends every page of `document` in order and returns how many were added.
    pub fn add_document(&mut self, mut document: Document) -> usize {
        inherit_page_attributes(&mut document);
        document.renumber_objects_with(self.next_id);
        self.next_id = document.max_id + 1;

        let pages = document.get_pages();
        let added = pages.len();
        self.page_ids.extend(pages.into_values());
        self.objects.extend(document.objects);

        debug!("Added {} pages, {} pages in total", added, self.page_ids.len());
        added
    }

    /// Appends an empty page with the same size as the last page added.
    pub fn add_blank_page(&mut self) {
        let media_box = self
            .page_ids
            .last()
            .and_then(|id| self.objects.get(id))
            .and_then(|page| page.as_dict().ok())
            .and_then(|page| page.get(b"MediaBox").ok())
            .cloned()
            .unwrap_or_else(a4_media_box);

        let content_id = (self.next_id, 0);
        let page_id = (self.next_id + 1, 0);
        self.next_id += 2;

        self.objects
            .insert(content_id, Object::Stream(Stream::new(Dictionary::new(), Vec::new())));
        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set("MediaBox", media_box);
        page.set("Resources", Dictionary::new());
        page.set("Contents", Object::Reference(content_id));
        self.objects.insert(page_id, Object::Dictionary(page));
        self.page_ids.push(page_id);
    }

    /// Serializes the bound document. Fails if `output_path` already exists.
    pub async fn save(self, output_path: &Path) -> Result<()> {
        if self.page_ids.is_empty() {
            return Err(anyhow!("No pages added to bind"));
        }

        info!("Finalizing bound PDF with {} total pages", self.page_ids.len());

        let mut bound = Document::with_version("1.5");
        bound.objects.extend(self.objects);
        bound.max_id = self.next_id - 1;

        let pages_id = bound.new_object_id();
        let kids: Vec<Object> = self.page_ids.iter().map(|&id| Object::Reference(id)).collect();
        let mut pages = Dictionary::new();
        pages.set("Type", Object::Name(b"Pages".to_vec()));
        pages.set("Count", Object::Integer(self.page_ids.len() as i64));
        pages.set("Kids", Object::Array(kids));
        bound.objects.insert(pages_id, Object::Dictionary(pages));

        for &page_id in &self.page_ids {
            if let Ok(page) = bound.get_dictionary_mut(page_id) {
                page.set("Parent", Object::Reference(pages_id));
            }
        }

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(pages_id));
        let catalog_id = bound.add_object(catalog);
        bound.trailer.set("Root", Object::Reference(catalog_id));

        if !self.info.is_empty() {
            let info_id = bound.add_object(self.info);
            bound.trailer.set("Info", Object::Reference(info_id));
        }

        // Drops the source catalogs and page tree nodes.
        let pruned = bound.prune_objects();
        debug!("Pruned {} unreachable objects", pruned.len());
        bound.compress();

        let mut data = Vec::new();
        bound
            .save_to(&mut data)
            .map_err(|e| anyhow!("Failed to serialize bound PDF: {}", e))?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(output_path)
            .await
            .with_context(|| format!("Failed to create {}", output_path.display()))?;
        file.write_all(&data)
            .await
            .with_context(|| format!("Failed to write bound PDF to {}", output_path.display()))?;
        file.flush().await?;

        Ok(())
    }
}

impl Default for PdfBinder {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates `title` to 30 characters and adds the `.pdf` suffix if missing.
pub fn bound_file_name(title: &str) -> String {
    let truncated: String = title.chars().take(MAX_TITLE_CHARS).collect();
    if truncated.ends_with(PDF_SUFFIX) {
        truncated
    } else {
        format!("{}{}", truncated, PDF_SUFFIX)
    }
}

/// Binds every unique PDF in `directory` into `directory/<title>.pdf`.
pub async fn bind(directory: &Path, title: &str, metadata: Option<&Metadata>) -> Result<BindOutcome> {
    let file_name = bound_file_name(title);
    let output = directory.join(&file_name);

    if fs::try_exists(&output).await.unwrap_or(false) {
        warn!("Target file {} already exists. Aborting concatenation of PDF files!", output.display());
        return Ok(BindOutcome::TargetExists(output));
    }

    let mut binder = PdfBinder::new();
    if let Some(metadata) = metadata {
        binder.set_metadata(metadata);
    }

    let chapters = list_pdf_files(directory).await?;
    info!("Found {} PDF files in {}", chapters.len(), directory.display().to_string().green());

    let mut seen = HashSet::new();
    let mut report = BindReport {
        output: output.clone(),
        files_bound: 0,
        duplicates: 0,
        unreadable: 0,
        blank_pages: 0,
        page_count: 0,
    };

    for path in &chapters {
        let data = fs::read(path)
            .await
            .with_context(|| format!("Failed to read PDF file {}", path.display()))?;

        let fingerprint = Fingerprint::of(&data);
        if seen.contains(&fingerprint) {
            info!("Duplicate detected: {}", path.display());
            report.duplicates += 1;
            continue;
        }

        let document = match Document::load_mem(&data) {
            Ok(document) => document,
            Err(e) => {
                warn!("Failed to parse PDF file {}: {}", path.display(), e);
                report.unreadable += 1;
                continue;
            }
        };

        let pages = binder.add_document(document);
        seen.insert(fingerprint);
        report.files_bound += 1;
        debug!("Bound {} ({} pages)", path.display(), pages);

        if pages % 2 == 1 {
            binder.add_blank_page();
            report.blank_pages += 1;
        }
    }

    if binder.page_count() == 0 {
        bail!("No PDF pages to bind in {}", directory.display());
    }

    report.page_count = binder.page_count();
    binder.save(&output).await?;

    info!(
        "Saved concatenated PDF files as '{}' in '{}'",
        file_name,
        directory.display().to_string().blue()
    );
    Ok(BindOutcome::Bound(report))
}

async fn list_pdf_files(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(directory)
        .await
        .with_context(|| format!("Failed to scan directory {}", directory.display()))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let is_pdf = entry
            .file_name()
            .to_str()
            .map_or(false, |name| name.ends_with(PDF_SUFFIX));
        if is_pdf && entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }

    // Zero-padded sequence prefixes make this catalog order.
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Copies attributes a page inherits from its page tree onto the page itself,
/// so they survive when the source tree is replaced.
fn inherit_page_attributes(document: &mut Document) {
    for page_id in document.get_pages().into_values() {
        let Ok(page) = document.get_dictionary(page_id) else {
            continue;
        };

        let mut missing: Vec<&[u8]> = INHERITABLE_PAGE_KEYS
            .iter()
            .copied()
            .filter(|key| !page.has(key))
            .collect();
        let mut inherited = Vec::new();
        let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
        let mut depth = 0;

        while let Some(node_id) = parent {
            if missing.is_empty() || depth > 64 {
                break;
            }
            let Ok(node) = document.get_dictionary(node_id) else {
                break;
            };
            missing.retain(|key| match node.get(key) {
                Ok(value) => {
                    inherited.push((key.to_vec(), value.clone()));
                    false
                }
                Err(_) => true,
            });
            parent = node.get(b"Parent").and_then(Object::as_reference).ok();
            depth += 1;
        }

        if let Ok(page) = document.get_dictionary_mut(page_id) {
            for (key, value) in inherited {
                page.set(key, value);
            }
        }
    }
}

fn a4_media_box() -> Object {
    Object::Array(vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Integer(595),
        Object::Integer(842),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_file_name() {
        assert_eq!(bound_file_name("Ultrasonic"), "Ultrasonic.pdf");
        assert_eq!(bound_file_name("Ultrasonic.pdf"), "Ultrasonic.pdf");
        assert_eq!(
            bound_file_name("My Book Title That Is Definitely Over Thirty Characters"),
            "My Book Title That Is Definite.pdf"
        );
        assert_eq!(bound_file_name("Ünïcödé Ünïcödé Ünïcödé Ünïcödé"), "Ünïcödé Ünïcödé Ünïcödé Ünïcöd.pdf");
    }

    #[test]
    fn test_fingerprint_equality() {
        let a = Fingerprint::of(b"%PDF-1.5 chapter");
        let b = Fingerprint::of(b"%PDF-1.5 chapter");
        let c = Fingerprint::of(b"%PDF-1.5 other chapter");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(Fingerprint::of(b"").to_string(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_blank_page_defaults_to_a4() {
        let mut binder = PdfBinder::new();
        binder.add_blank_page();
        assert_eq!(binder.page_count(), 1);

        let page = binder.objects.get(&binder.page_ids[0]).unwrap().as_dict().unwrap();
        let media_box: Vec<i64> = page
            .get(b"MediaBox")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect();
        assert_eq!(media_box, vec![0, 0, 595, 842]);
    }

    #[tokio::test]
    async fn test_save_without_pages_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = PdfBinder::new().save(&dir.path().join("out.pdf")).await;
        assert!(result.is_err());
        assert!(!dir.path().join("out.pdf").exists());
    }
}
