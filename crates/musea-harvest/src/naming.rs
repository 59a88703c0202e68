//! Image filename generation
//!
//! Filenames have the form `{id}_{title}_{artist}.jpg`. Only the title is
//! shortened to fit the byte budget; the id and artist always appear in full.

use tracing::warn;

/// Default filesystem name budget in bytes
pub const DEFAULT_MAX_FILENAME_BYTES: usize = 255;

const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const EXTENSION: &str = ".jpg";
const ELLIPSIS: &str = "...";

/// Remove forbidden and control characters and collapse whitespace
pub fn clean_component(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !FORBIDDEN.contains(c) && !c.is_control())
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build a filesystem-safe image filename no longer than `max_len` bytes.
///
/// If the id and artist alone exceed the budget the result is returned over
/// budget with a warning rather than dropping either of them.
pub fn sanitize_filename(prefixed_id: &str, title: &str, artist: &str, max_len: usize) -> String {
    let id = clean_component(prefixed_id);
    let artist = clean_component(artist);
    let title = clean_component(title);

    let fixed = id.len() + artist.len() + 2 + EXTENSION.len();
    let title_budget = max_len.saturating_sub(fixed);

    let title = if title.len() <= title_budget {
        title
    } else if title_budget > ELLIPSIS.len() {
        let kept = truncate_bytes(&title, title_budget - ELLIPSIS.len()).trim_end();
        format!("{}{}", kept, ELLIPSIS)
    } else {
        truncate_bytes(&title, title_budget).to_string()
    };

    let name = format!("{}_{}_{}{}", id, title, artist, EXTENSION);
    if name.len() > max_len {
        warn!(
            id = %id,
            length = name.len(),
            max_len,
            "Filename exceeds budget even without a title"
        );
    }
    name
}

/// Longest prefix of `text` that is at most `max` bytes and ends on a char
/// boundary
fn truncate_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
