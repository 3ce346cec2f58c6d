//! Resource content preview helpers.

/// Preview length in characters.
pub const PREVIEW_CHARS: usize = 100;

const TEXT_MIME_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/yaml",
    "application/javascript",
];

/// Whether content of this MIME type should be shown as text.
#[must_use]
pub fn is_text_mime(mime: &str) -> bool {
    let essence = mime
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("text/")
        || TEXT_MIME_TYPES.contains(&essence.as_str())
        || essence.ends_with("+json")
        || essence.ends_with("+xml")
}

/// First [`PREVIEW_CHARS`] characters with runs of whitespace collapsed to a
/// single space, `...` appended when cut.
#[must_use]
pub fn text_preview(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
