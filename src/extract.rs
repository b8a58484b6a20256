//! Page-level text extraction with OCR fallback.
//!
//! The [`ContentLoader`] picks one strategy per [`Format`] from the file
//! name and returns an ordered, non-empty sequence of [`Page`]s, or a
//! [`ReadError`].
//!
//! PDF pages go through the OCR policy: with `mode = on`, or with
//! `mode = auto` when a page's native text is shorter than `threshold`
//! characters, the page is rasterized and recognized. OCR output is appended
//! after the native text. A failed OCR attempt on a PDF page only logs a
//! warning; on an image input it is fatal.
//!
//! Everything here is blocking and must run off the async executor.

use std::io::Read;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{OcrConfig, OcrMode};
use crate::error::{OcrError, ReadError};
use crate::models::{Page, TextSource};
use crate::ocr::OcrEngine;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Page separator for plain-text input.
const FORM_FEED: char = '\x0c';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Pdf,
    Docx,
    Pptx,
    Html,
    PlainText,
    Image,
}

impl Format {
    /// Select a format from the file extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Result<Self, ReadError> {
        let ext = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => Ok(Format::Pdf),
            "docx" => Ok(Format::Docx),
            "pptx" => Ok(Format::Pptx),
            "html" | "htm" | "xhtml" => Ok(Format::Html),
            "txt" | "text" | "md" | "markdown" | "rst" | "csv" | "log" => Ok(Format::PlainText),
            "png" | "jpg" | "jpeg" | "tif" | "tiff" | "bmp" | "gif" | "webp" => Ok(Format::Image),
            "" => Err(ReadError::Unsupported(filename.to_string())),
            other => Err(ReadError::Unsupported(format!(".{}", other))),
        }
    }
}

/// Native text of one PDF page before the OCR policy is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct NativePage {
    pub number: u32,
    pub text: String,
    pub image_count: u32,
}

pub struct ContentLoader {
    ocr: OcrConfig,
    engine: Arc<OcrEngine>,
}

impl ContentLoader {
    pub fn new(ocr: OcrConfig, engine: Arc<OcrEngine>) -> Self {
        Self { ocr, engine }
    }

    pub fn ocr_config(&self) -> &OcrConfig {
        &self.ocr
    }

    /// Extract pages from `bytes`. `mode` overrides `[ocr] mode` for this
    /// call; `stop` is polled between pages.
    pub fn load(
        &self,
        filename: &str,
        bytes: &[u8],
        mode: OcrMode,
        stop: &dyn Fn() -> bool,
    ) -> Result<Vec<Page>, ReadError> {
        let format = Format::from_filename(filename)?;
        if bytes.is_empty() {
            return Err(ReadError::Empty);
        }
        debug!(filename, ?format, bytes = bytes.len(), "loading document");

        match format {
            Format::Pdf => {
                let native = extract_pdf_native_pages(bytes)?;
                let mut ocr_page = |number: u32| {
                    self.engine
                        .recognize_pdf_page(bytes, number, self.ocr.dpi, &self.ocr.language)
                };
                apply_ocr_policy(native, mode, self.ocr.threshold, &mut ocr_page, stop)
            }
            Format::Image => self.load_image(bytes, mode),
            Format::Docx => extract_docx(bytes),
            Format::Pptx => extract_pptx(bytes),
            Format::Html => extract_html(bytes),
            Format::PlainText => extract_plain_text(bytes),
        }
    }

    fn load_image(&self, bytes: &[u8], mode: OcrMode) -> Result<Vec<Page>, ReadError> {
        if mode == OcrMode::Off {
            return Err(ReadError::OcrRequired(OcrError::Unavailable(
                "OCR is disabled".to_string(),
            )));
        }
        let text = self
            .engine
            .recognize_image(bytes, &self.ocr.language)
            .map_err(ReadError::OcrRequired)?;
        Ok(vec![Page {
            number: 1,
            text,
            text_source: TextSource::Ocr,
            image_count: 1,
            has_images: true,
        }])
    }
}

/// Apply the per-page OCR policy to native PDF pages.
///
/// `ocr_page` receives a 1-based page number.
pub fn apply_ocr_policy(
    native: Vec<NativePage>,
    mode: OcrMode,
    threshold: usize,
    ocr_page: &mut dyn FnMut(u32) -> Result<String, OcrError>,
    stop: &dyn Fn() -> bool,
) -> Result<Vec<Page>, ReadError> {
    if native.is_empty() {
        return Err(ReadError::NoPages);
    }

    let mut pages = Vec::with_capacity(native.len());
    let mut ocr_unavailable = false;

    for page in native {
        if stop() {
            return Err(ReadError::Cancelled);
        }

        let extracted = page.text.trim().to_string();
        let needs_ocr = match mode {
            OcrMode::Off => false,
            OcrMode::On => true,
            OcrMode::Auto => extracted.chars().count() < threshold,
        };

        let mut text = extracted;
        let mut text_source = TextSource::Extract;

        if needs_ocr && !ocr_unavailable {
            match ocr_page(page.number).map(|t| t.trim().to_string()) {
                Ok(ocr_text) if !ocr_text.is_empty() => {
                    if text.is_empty() {
                        text = ocr_text;
                        text_source = TextSource::Ocr;
                    } else {
                        text.push_str("\n\n");
                        text.push_str(&ocr_text);
                        text_source = TextSource::Mixed;
                    }
                }
                Ok(_) | Err(OcrError::NoText) => {
                    warn!(page = page.number, "OCR produced no text; keeping extracted text");
                }
                Err(OcrError::Unavailable(reason)) => {
                    warn!(%reason, "OCR unavailable; continuing with extracted text only");
                    ocr_unavailable = true;
                }
                Err(e) => {
                    warn!(page = page.number, error = %e, "OCR failed; keeping extracted text");
                }
            }
        }

        pages.push(Page {
            number: page.number,
            text,
            text_source,
            image_count: page.image_count,
            has_images: page.image_count > 0,
        });
    }

    Ok(pages)
}

/// Native text and image counts for every page of a PDF.
pub fn extract_pdf_native_pages(bytes: &[u8]) -> Result<Vec<NativePage>, ReadError> {
    let doc = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            if bytes.windows(8).any(|w| w == b"/Encrypt") {
                return Err(ReadError::Encrypted);
            }
            return Err(ReadError::Corrupted(e.to_string()));
        }
    };
    if doc.is_encrypted() {
        return Err(ReadError::Encrypted);
    }

    let page_ids = doc.get_pages();
    if page_ids.is_empty() {
        return Err(ReadError::NoPages);
    }

    // pdf-extract panics on some malformed content streams.
    let texts = match std::panic::catch_unwind(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }) {
        Ok(Ok(texts)) => texts,
        Ok(Err(e)) => {
            warn!(error = %e, "native PDF text extraction failed; pages left blank");
            Vec::new()
        }
        Err(_) => {
            warn!("native PDF text extraction panicked; pages left blank");
            Vec::new()
        }
    };

    Ok(page_ids
        .into_iter()
        .enumerate()
        .map(|(i, (number, page_id))| NativePage {
            number,
            text: texts.get(i).cloned().unwrap_or_default(),
            image_count: doc
                .get_page_images(page_id)
                .map(|images| images.len() as u32)
                .unwrap_or(0),
        })
        .collect())
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ReadError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ReadError::Corrupted(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry.take(max_bytes).read_to_end(&mut out)?;
    if out.len() as u64 >= max_bytes {
        return Err(ReadError::Corrupted(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn open_zip(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, ReadError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ReadError::Corrupted(e.to_string()))
}

/// Text of an OOXML part plus the number of pictures it references.
///
/// Text comes from `<*:t>` runs; every closing `<*:p>` ends a paragraph.
fn extract_ooxml_paragraphs(xml: &[u8]) -> Result<(String, u32), ReadError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut pictures = 0u32;
    let mut in_t = false;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_t = true,
                b"pic" => pictures += 1,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"pic" => pictures += 1,
                b"tab" => current.push(' '),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ReadError::Corrupted(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok((paragraphs.join("\n\n"), pictures))
}

/// A docx carries no reliable pagination, so the body is a single page.
fn extract_docx(bytes: &[u8]) -> Result<Vec<Page>, ReadError> {
    let mut archive = open_zip(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    let (text, pictures) = extract_ooxml_paragraphs(&xml)?;
    if text.is_empty() {
        return Err(ReadError::NoReadableElements);
    }
    Ok(vec![Page {
        number: 1,
        text,
        text_source: TextSource::Extract,
        image_count: pictures,
        has_images: pictures > 0,
    }])
}

/// One page per slide, in slide-number order.
fn extract_pptx(bytes: &[u8]) -> Result<Vec<Page>, ReadError> {
    let mut archive = open_zip(bytes)?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    if slide_names.is_empty() {
        return Err(ReadError::NoPages);
    }

    let mut pages = Vec::with_capacity(slide_names.len());
    for (i, name) in slide_names.iter().enumerate() {
        let xml = read_zip_entry_bounded(&mut archive, name, MAX_XML_ENTRY_BYTES)?;
        let (text, pictures) = extract_ooxml_paragraphs(&xml)?;
        pages.push(Page {
            number: i as u32 + 1,
            text,
            text_source: TextSource::Extract,
            image_count: pictures,
            has_images: pictures > 0,
        });
    }

    if pages.iter().all(|p| p.text.is_empty()) {
        return Err(ReadError::NoReadableElements);
    }
    Ok(pages)
}

const HTML_BLOCKS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "blockquote", "pre", "td", "th", "dt", "dd",
    "figcaption",
];
const HTML_SKIP: &[&str] = &["script", "style", "template", "noscript", "svg", "nav"];

/// Block-level elements of the main content root, one paragraph each.
fn extract_html(bytes: &[u8]) -> Result<Vec<Page>, ReadError> {
    use scraper::{Html, Selector};

    let source = String::from_utf8_lossy(bytes);
    let document = Html::parse_document(&source);

    let root = ["article", "main", "body"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|sel| document.select(&sel).next())
        .unwrap_or_else(|| document.root_element());

    let mut paragraphs: Vec<String> = Vec::new();
    for element in root.descendent_elements() {
        let tag = element.value().name();
        if !HTML_BLOCKS.contains(&tag) {
            continue;
        }
        let nested_or_hidden = element.ancestors().any(|node| {
            node.value()
                .as_element()
                .map(|e| HTML_BLOCKS.contains(&e.name()) || HTML_SKIP.contains(&e.name()))
                .unwrap_or(false)
        });
        if nested_or_hidden {
            continue;
        }
        let text = collapse_whitespace(&element.text().collect::<String>());
        if !text.is_empty() {
            paragraphs.push(text);
        }
    }

    // Pages without block markup: fall back to all visible text.
    if paragraphs.is_empty() {
        let text = collapse_whitespace(&root.text().collect::<String>());
        if !text.is_empty() {
            paragraphs.push(text);
        }
    }

    if paragraphs.is_empty() {
        return Err(ReadError::NoReadableElements);
    }
    Ok(vec![Page::extracted(1, paragraphs.join("\n\n"))])
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Form feeds separate pages.
fn extract_plain_text(bytes: &[u8]) -> Result<Vec<Page>, ReadError> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.replace("\r\n", "\n");
    if text.trim().is_empty() {
        return Err(ReadError::NoReadableElements);
    }
    Ok(text
        .split(FORM_FEED)
        .enumerate()
        .map(|(i, page)| Page::extracted(i as u32 + 1, page.trim()))
        .collect())
}
