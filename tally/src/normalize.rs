//! Canonical form for free-text categorical fields.

/// Trims, lowercases, and collapses internal whitespace runs to a single space.
///
/// Registry extracts spell the same district with different casing and stray
/// spaces across years (`"Senamiesčio "`, `"SENAMIESČIO"`); after this they
/// compare equal. Null values are filtered by the caller and never reach here.
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
