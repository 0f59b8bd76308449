//! Full-name normalization and slug derivation.
//!
//! The slug is a projection of the normalized full name and is always
//! recomputed from it, never edited on its own.

/// Collapse whitespace and capitalize the first letter of every word.
///
/// `"  jane   doe "` becomes `"Jane Doe"`. Characters after the first one in
/// each word are left as they are.
pub fn normalize_full_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Transliterate to ASCII, lowercase, keep alphanumerics, and turn every
/// other run into one `-`.
///
/// `"Émile Zola"` becomes `"emile-zola"` and `"Давид Мовас"` becomes
/// `"david-movas"`.
pub fn slugify(name: &str) -> String {
    let ascii = deunicode::deunicode(name);
    let mut slug = String::with_capacity(ascii.len());
    let mut pending_dash = false;

    for ch in ascii.chars().map(|ch| ch.to_ascii_lowercase()) {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }

    slug
}
