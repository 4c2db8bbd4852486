//! Output chunking for transport size limits

/// Discord rejects message content longer than this many characters
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

/// Split `text` into contiguous slices of at most `limit` characters.
///
/// Concatenating the result gives back `text` exactly. An empty input yields a single
/// empty chunk. When a newline falls in the second half of a window the chunk ends
/// right after it, so long replies break between lines where they can.
pub fn split(text: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(1);
    if text.is_empty() {
        return vec![""];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let (head, tail) = rest.split_at(cut_point(rest, limit));
        chunks.push(head);
        rest = tail;
    }
    chunks
}

/// Byte offset where the next chunk of `text` ends
fn cut_point(text: &str, limit: usize) -> usize {
    let mut after_newline = None;

    for (count, (idx, ch)) in text.char_indices().enumerate() {
        if count == limit {
            return after_newline.unwrap_or(idx);
        }
        if ch == '\n' && count >= limit / 2 {
            after_newline = Some(idx + ch.len_utf8());
        }
    }

    text.len()
}
