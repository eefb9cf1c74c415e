//! Paragraph chunking and tag extraction.

/// A slice of a normalized note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Byte offset into the normalized text
    pub offset: usize,
    pub text: String,
}

/// Split normalized text into paragraph-aligned chunks of at most
/// `max_chars` characters.
///
/// Consecutive paragraphs are packed together, joined by a blank line, so a
/// note shorter than `max_chars` yields exactly one chunk equal to the
/// whole text. Paragraphs longer than `max_chars` are split at whitespace,
/// or mid-word if a single word is too long.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<TextChunk> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current: Option<(usize, usize)> = None; // (start, end) byte range

    for (offset, paragraph) in paragraphs(text) {
        let len = paragraph.chars().count();
        if len > max_chars {
            if let Some((start, end)) = current.take() {
                chunks.push(chunk(text, start, end));
            }
            split_long(paragraph, offset, max_chars, &mut chunks);
            continue;
        }
        current = match current {
            Some((start, _))
                if text[start..offset + paragraph.len()].chars().count() <= max_chars =>
            {
                Some((start, offset + paragraph.len()))
            }
            Some((start, end)) => {
                chunks.push(chunk(text, start, end));
                Some((offset, offset + paragraph.len()))
            }
            None => Some((offset, offset + paragraph.len())),
        };
    }
    if let Some((start, end)) = current {
        chunks.push(chunk(text, start, end));
    }
    chunks
}

fn chunk(text: &str, start: usize, end: usize) -> TextChunk {
    TextChunk {
        offset: start,
        text: text[start..end].to_string(),
    }
}

/// Non-empty paragraphs with their byte offsets.
fn paragraphs(text: &str) -> Vec<(usize, &str)> {
    let mut found = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices("\n\n") {
        push_paragraph(text, start, idx, &mut found);
        start = idx + 2;
    }
    push_paragraph(text, start, text.len(), &mut found);
    found
}

fn push_paragraph<'a>(text: &'a str, start: usize, end: usize, out: &mut Vec<(usize, &'a str)>) {
    if start >= end {
        return;
    }
    let raw = &text[start..end];
    if raw.trim().is_empty() {
        return;
    }
    // Keep indentation; only stray newlines are dropped.
    let leading = raw.len() - raw.trim_start_matches('\n').len();
    out.push((start + leading, raw.trim_matches('\n')));
}

fn split_long(paragraph: &str, base: usize, max_chars: usize, out: &mut Vec<TextChunk>) {
    let mut start = 0;
    while start < paragraph.len() {
        let rest = &paragraph[start..];
        if rest.chars().count() <= max_chars {
            out.push(TextChunk {
                offset: base + start,
                text: rest.to_string(),
            });
            return;
        }
        let hard_end = rest
            .char_indices()
            .nth(max_chars)
            .map_or(rest.len(), |(i, _)| i);
        let cut = rest[..hard_end]
            .rfind(char::is_whitespace)
            .filter(|&i| i > 0)
            .unwrap_or(hard_end);
        out.push(TextChunk {
            offset: base + start,
            text: rest[..cut].trim_end().to_string(),
        });
        let skipped = rest[cut..].len() - rest[cut..].trim_start().len();
        start += cut + skipped;
    }
}

/// Derive up to `limit` tags: `#hashtags` first, then the first unique
/// alphabetic words longer than four characters, lowercased.
pub fn derive_tags(text: &str, limit: usize) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    let push = |tag: String, tags: &mut Vec<String>| {
        if tags.len() < limit && !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    };

    for word in text.split_whitespace() {
        if let Some(tag) = word.strip_prefix('#') {
            let tag: String = tag
                .chars()
                .take_while(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '/'))
                .collect();
            push(tag.to_lowercase(), &mut tags);
        }
    }

    for word in text.split_whitespace() {
        if word.starts_with('#') {
            continue;
        }
        let token = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if token.chars().count() > 4 && token.chars().all(char::is_alphabetic) {
            push(token, &mut tags);
        }
    }
    tags
}
