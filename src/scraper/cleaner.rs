use crate::models::PageInfo;

// ── Text normalisation ────────────────────────────────────────────────────────

/// Collapse runs of whitespace into single spaces and trim.
/// "  Ada \n  Lovelace " → "Ada Lovelace"
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Join text fragments with single spaces, dropping blank ones.
pub fn join_fragments<'a>(fragments: impl IntoIterator<Item = &'a str>) -> String {
    fragments
        .into_iter()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(collapse_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trimmed text, or `None` when nothing is left.
pub fn non_empty(s: &str) -> Option<String> {
    let s = collapse_whitespace(s);
    if s.is_empty() { None } else { Some(s) }
}

// ── Filenames ─────────────────────────────────────────────────────────────────

/// Map a display name to a filesystem-safe token.
/// "Ada Lovelace" → "Ada_Lovelace" | "José María" → "Jos__Mar_a"
pub fn sanitize_filename(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    mapped.trim_matches('_').to_string()
}

// ── Page info line ────────────────────────────────────────────────────────────

/// Split "June 2025 | Bogotá" into date and location at the first delimiter.
/// Without a delimiter the whole text is the date.
pub fn split_info_line(text: &str, delimiter: char) -> PageInfo {
    match text.split_once(delimiter) {
        Some((date, location)) => PageInfo {
            date: non_empty(date),
            location: non_empty(location),
        },
        None => PageInfo {
            date: non_empty(text),
            location: None,
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
