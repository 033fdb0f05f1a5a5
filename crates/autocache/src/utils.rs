/// Normalize a string by removing zero-width and special Unicode whitespace characters and lowercasing it.
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| {
            // Remove zero-width and non-breaking spaces, but keep regular spaces
            !matches!(
                *c,
                '\u{200B}' | // zero-width space
                '\u{200C}' | // zero-width non-joiner
                '\u{200D}' | // zero-width joiner
                '\u{00A0}' | // non-breaking space
                '\u{FEFF}' // zero-width no-break space
            )
        })
        .collect::<String>()
        .to_lowercase()
}

/// Case-insensitive substring test on normalized text.
///
/// This is the matching rule accessibility hosts apply to text queries: `"Clear cache"`
/// matches a node labelled `"CLEAR CACHE DATA"`. An empty needle never matches.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    let needle = normalize(needle);
    if needle.is_empty() {
        return false;
    }
    normalize(haystack).contains(&needle)
}

/// Whether a surface identifier (a package or window name) looks like the expected surface.
pub fn surface_matches(surface: &str, expected: &str) -> bool {
    contains_ignore_case(surface, expected)
}
