//! Character-window chunking.

/// Split `text` into fixed-size character windows with overlap.
///
/// Windows start every `chunk_size - overlap` characters; the final window
/// may be shorter. An overlap at or above the window size would stall the
/// walk, so the step is clamped to at least one character.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        start += step;
    }

    chunks
}
