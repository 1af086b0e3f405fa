/// Split `text` into chunks of at most `max` characters.
///
/// Each cut prefers the last newline inside the window, then the last
/// space, then a hard cut. Cuts always land on a char boundary, and the
/// whitespace at a cut is dropped from the start of the next chunk.
pub fn split_chunks(text: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    let text = text.trim_end();
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while let Some((limit, _)) = remaining.char_indices().nth(max) {
        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&at| at > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].trim_end().to_string());
        remaining = remaining[split_at..].trim_start();
    }

    if !remaining.is_empty() {
        chunks.push(remaining.to_string());
    }
    chunks
}
