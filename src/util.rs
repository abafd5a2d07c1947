#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Keeps ASCII-or-Unicode alphanumerics, space, hyphen and underscore, then
/// trims surrounding whitespace. Used for file and directory names derived
/// from student or course names.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Cuts `text` to at most `max_chars` characters, never splitting a char.
/// Returns the kept prefix and whether anything was dropped.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => (&text[..byte_index], true),
        None => (text, false),
    }
}
