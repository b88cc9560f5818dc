//! Paragraph-boundary text chunker.
//!
//! Splits source content into segments that respect a configurable
//! `max_chunk_size` (in characters). Splitting occurs on blank-line
//! paragraph boundaries to preserve semantic coherence within each chunk.
//! A single paragraph longer than the limit is emitted whole rather than
//! cut mid-sentence.

/// Separator inserted between paragraphs that share a chunk.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Split content into chunks on paragraph boundaries.
///
/// Paragraphs are greedily accumulated; when appending the next paragraph
/// would push the buffer past `max_chunk_size` and the buffer is non-empty,
/// the buffer is flushed. Output order is source order, which becomes the
/// `chunk_index`. Empty or whitespace-only content yields no chunks.
pub fn chunk_content(content: &str, max_chunk_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;
    let sep_chars = PARAGRAPH_SEPARATOR.chars().count();

    for para in paragraphs(content) {
        let para_chars = para.chars().count();
        let would_be = if buf.is_empty() {
            para_chars
        } else {
            buf_chars + sep_chars + para_chars
        };

        if would_be > max_chunk_size && !buf.is_empty() {
            chunks.push(std::mem::take(&mut buf));
            buf_chars = 0;
        }

        if !buf.is_empty() {
            buf.push_str(PARAGRAPH_SEPARATOR);
            buf_chars += sep_chars;
        }
        buf.push_str(&para);
        buf_chars += para_chars;
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }

    chunks
}

/// Blank-line delimited blocks, trimmed, empty blocks dropped.
fn paragraphs(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            flush_paragraph(&mut current, &mut out);
        } else {
            current.push(line);
        }
    }
    flush_paragraph(&mut current, &mut out);

    out
}

fn flush_paragraph(lines: &mut Vec<&str>, out: &mut Vec<String>) {
    if lines.is_empty() {
        return;
    }
    let joined = lines.join("\n");
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    lines.clear();
}

/// Derive the keyword-search representation of a chunk: lowercase, with
/// every run of non-alphanumeric characters folded to a single space.
pub fn extract_keywords(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}
