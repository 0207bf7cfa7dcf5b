//! Shared helpers for integration tests

#![allow(dead_code)]

use lopdf::{Dictionary, Document, Object, Stream};
use std::path::Path;

/// Builds a PDF whose page `n` has the content stream `% {label} page {n}`.
pub fn sample_pdf(label: &str, pages: usize) -> Vec<u8> {
    build_pdf(label, pages, false)
}

/// Same as [`sample_pdf`] but the MediaBox lives on the page tree node only.
pub fn sample_pdf_with_inherited_media_box(label: &str, pages: usize) -> Vec<u8> {
    build_pdf(label, pages, true)
}

fn build_pdf(label: &str, pages: usize, inherit_media_box: bool) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let media_box = Object::Array(vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Integer(612),
        Object::Integer(792),
    ]);

    let mut kids = Vec::new();
    for n in 1..=pages {
        let content = format!("% {} page {}\n", label, n).into_bytes();
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));
        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set("Parent", Object::Reference(pages_id));
        page.set("Contents", Object::Reference(content_id));
        if !inherit_media_box {
            page.set("MediaBox", media_box.clone());
        }
        kids.push(Object::Reference(doc.add_object(page)));
    }

    let mut pages_dict = Dictionary::new();
    pages_dict.set("Type", Object::Name(b"Pages".to_vec()));
    pages_dict.set("Kids", Object::Array(kids));
    pages_dict.set("Count", Object::Integer(pages as i64));
    if inherit_media_box {
        pages_dict.set("MediaBox", media_box);
    }
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut data = Vec::new();
    doc.save_to(&mut data).expect("Failed to serialize sample PDF");
    data
}

/// Page content streams of the PDF at `path`, in page order.
pub fn page_contents(path: &Path) -> Vec<String> {
    let doc = Document::load(path).expect("Failed to load PDF");
    doc.get_pages()
        .into_values()
        .map(|id| String::from_utf8_lossy(&doc.get_page_content(id).unwrap()).to_string())
        .collect()
}

/// A listing page with one anchor per `(title, href)` pair.
pub fn listing_html(links: &[(&str, &str)]) -> String {
    let anchors: String = links
        .iter()
        .map(|(title, href)| format!(r#"<li><a href="{}" title="{}">Download PDF</a></li>"#, href, title))
        .collect();
    format!(
        r#"<html><body><a href="/search">Search</a><ul class="chapters">{}</ul></body></html>"#,
        anchors
    )
}
