//! Truncation Utilities
//!
//! UTF-8 safe shortening of error strings before they are stored or grouped.

/// Keep at most `max_chars` leading characters.
pub fn truncate_prefix(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}

/// Fit `content` in roughly `max_bytes`, keeping both ends and marking the cut.
pub fn truncate_middle(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }

    if max_bytes == 0 {
        return format!("... [{} bytes truncated] ...", content.len());
    }

    let half = max_bytes / 2;
    let mut prefix_end = 0;
    for (idx, c) in content.char_indices() {
        let char_end = idx + c.len_utf8();
        if char_end > half {
            break;
        }
        prefix_end = char_end;
    }

    let suffix_target = content.len().saturating_sub(half);
    let suffix_start = content
        .char_indices()
        .map(|(idx, _)| idx)
        .find(|idx| *idx >= suffix_target)
        .unwrap_or(content.len())
        .max(prefix_end);

    let prefix = &content[..prefix_end];
    let suffix = &content[suffix_start..];
    let dropped = content.len() - prefix.len() - suffix.len();

    format!("{} ... [{} bytes truncated] ... {}", prefix, dropped, suffix)
}
