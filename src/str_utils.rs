/// Safely returns a prefix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Safely returns a suffix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn suffix_chars(s: &str, max_chars: usize) -> &str {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s;
    }
    match s.char_indices().nth(char_count - max_chars) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}
