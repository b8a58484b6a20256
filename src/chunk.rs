//! Paragraph-boundary page chunker with overlap.
//!
//! Packs the paragraphs of a page sequence into [`Chunk`]s of about `size`
//! characters. Paragraphs are split on blank lines (a line holding only
//! whitespace counts as blank) and tagged with their page number so every
//! chunk carries an exact `page_start..=page_end` range. When a chunk is
//! flushed, the trailing `overlap` characters of its text seed the next
//! chunk (attributed to the flushed chunk's end page).
//!
//! The seed is always carried in full. A chunk that starts with a seed and
//! then takes a paragraph of up to `size` characters can therefore reach
//! `overlap + 2 + size` characters.
//!
//! A paragraph that alone exceeds `size` is hard-split into fixed-size
//! segments, each emitted as its own chunk.
//!
//! Lengths are measured in characters, never bytes, so multi-byte text is
//! never split inside a code point.

use std::collections::HashMap;

use crate::models::{chunk_id, Chunk, ChunkMetadata, Page, TextSource};

pub const CHUNK_SIZE: usize = 900;
pub const CHUNK_OVERLAP: usize = 150;

const SEPARATOR: &str = "\n\n";
const SEPARATOR_LEN: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(CHUNK_SIZE, CHUNK_OVERLAP)
    }
}

/// A chunk before it is bound to a document.
#[derive(Debug, Clone, PartialEq)]
struct Draft {
    text: String,
    page_start: u32,
    page_end: u32,
}

/// In-progress chunk buffer.
struct Buffer {
    text: String,
    len: usize,
    page_start: u32,
    page_end: u32,
    /// False while the buffer only holds overlap carried from the previous
    /// chunk; such a buffer is never flushed on its own.
    fresh: bool,
}

impl Buffer {
    fn empty() -> Self {
        Self {
            text: String::new(),
            len: 0,
            page_start: 0,
            page_end: 0,
            fresh: false,
        }
    }

    fn seeded(tail: &str, page: u32) -> Self {
        Self {
            text: tail.to_string(),
            len: tail.chars().count(),
            page_start: page,
            page_end: page,
            fresh: false,
        }
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn len_with(&self, para_len: usize) -> usize {
        if self.is_empty() {
            para_len
        } else {
            self.len + SEPARATOR_LEN + para_len
        }
    }

    fn push(&mut self, para: &str, para_len: usize, page: u32) {
        if self.is_empty() {
            self.page_start = page;
            self.page_end = page;
        } else {
            self.text.push_str(SEPARATOR);
            self.len += SEPARATOR_LEN;
            self.page_start = self.page_start.min(page);
            self.page_end = self.page_end.max(page);
        }
        self.text.push_str(para);
        self.len += para_len;
        self.fresh = true;
    }
}

impl Chunker {
    pub fn new(size: usize, overlap: usize) -> Self {
        Self {
            size: size.max(1),
            overlap: overlap.min(size.saturating_sub(1)),
        }
    }

    /// Chunk a document's pages. Returns an empty vec when the pages hold no
    /// non-whitespace text.
    pub fn chunk(
        &self,
        doc_id: &str,
        workspace_id: &str,
        pages: &[Page],
        created_at: i64,
    ) -> Vec<Chunk> {
        let by_number: HashMap<u32, &Page> = pages.iter().map(|p| (p.number, p)).collect();

        self.pack(pages)
            .into_iter()
            .enumerate()
            .map(|(i, draft)| {
                let index = i as i64;
                let (text_source, metadata) =
                    classify(&by_number, draft.page_start, draft.page_end);
                Chunk {
                    id: chunk_id(doc_id, index),
                    doc_id: doc_id.to_string(),
                    workspace_id: workspace_id.to_string(),
                    chunk_index: index,
                    page_start: draft.page_start,
                    page_end: draft.page_end,
                    text: draft.text,
                    text_source,
                    metadata,
                    created_at,
                }
            })
            .collect()
    }

    fn pack(&self, pages: &[Page]) -> Vec<Draft> {
        let mut out = Vec::new();
        let mut buf = Buffer::empty();

        for page in pages {
            for para in paragraphs(&page.text) {
                let para = para.as_str();
                let para_len = para.chars().count();

                if buf.len_with(para_len) <= self.size {
                    buf.push(para, para_len, page.number);
                    continue;
                }

                if para_len > self.size {
                    if buf.fresh {
                        buf = self.flush(&mut out, buf);
                    }
                    buf = self.hard_split(&mut out, para, page.number);
                    continue;
                }

                if buf.fresh {
                    buf = self.flush(&mut out, buf);
                }
                buf.push(para, para_len, page.number);
            }
        }

        if buf.fresh {
            out.push(Draft {
                text: buf.text,
                page_start: buf.page_start,
                page_end: buf.page_end,
            });
        }

        out
    }

    /// Emit `buf` as a draft and return the overlap-seeded next buffer.
    fn flush(&self, out: &mut Vec<Draft>, buf: Buffer) -> Buffer {
        let next = self.seed_from(&buf.text, buf.page_end);
        out.push(Draft {
            text: buf.text,
            page_start: buf.page_start,
            page_end: buf.page_end,
        });
        next
    }

    fn hard_split(&self, out: &mut Vec<Draft>, para: &str, page: u32) -> Buffer {
        let chars: Vec<char> = para.chars().collect();
        let mut next = Buffer::empty();
        for segment in chars.chunks(self.size) {
            let text: String = segment.iter().collect();
            next = self.seed_from(&text, page);
            out.push(Draft {
                text,
                page_start: page,
                page_end: page,
            });
        }
        next
    }

    fn seed_from(&self, text: &str, page: u32) -> Buffer {
        if self.overlap == 0 {
            return Buffer::empty();
        }
        Buffer::seeded(tail_chars(text, self.overlap), page)
    }
}

/// Non-blank paragraphs of `text`, trimmed. Any line that is empty or
/// whitespace-only ends the current paragraph.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines().chain(std::iter::once("")) {
        if !line.trim().is_empty() {
            lines.push(line);
            continue;
        }
        if !lines.is_empty() {
            let para = lines.join("\n");
            out.push(para.trim().to_string());
            lines.clear();
        }
    }
    out
}

/// The last `n` characters of `s`.
fn tail_chars(s: &str, n: usize) -> &str {
    let total = s.chars().count();
    if n >= total {
        return s;
    }
    match s.char_indices().nth(total - n) {
        Some((byte, _)) => &s[byte..],
        None => s,
    }
}

fn classify(
    pages: &HashMap<u32, &Page>,
    page_start: u32,
    page_end: u32,
) -> (TextSource, ChunkMetadata) {
    let mut kinds: Vec<TextSource> = Vec::new();
    let mut metadata = ChunkMetadata::default();

    for number in page_start..=page_end {
        let Some(page) = pages.get(&number) else {
            continue;
        };
        if !kinds.contains(&page.text_source) {
            kinds.push(page.text_source);
        }
        if page.text_source != TextSource::Extract {
            metadata.ocr_pages.push(number);
        }
        if page.has_images {
            metadata.image_pages.push(number);
        }
    }

    let source = match kinds.as_slice() {
        [] => TextSource::Extract,
        [single] => *single,
        _ => TextSource::Mixed,
    };
    (source, metadata)
}
